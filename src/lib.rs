pub mod config;
pub mod contamination;
pub mod generation;
pub mod providers;
pub mod state;
pub mod storage;
pub mod utils;
