pub mod catalog;
pub mod detector;
pub mod rewrite;

pub use catalog::{CatalogError, TermCatalog, TermCategory, TermRule};
pub use detector::{detect, detect_with, DetectedTerm};
pub use rewrite::{remove_term, strip_all, RewriteError};
