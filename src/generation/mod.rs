pub mod builder;
pub mod dispatch;
pub mod error;
pub mod optimize;
pub mod routes;
pub mod types;

pub use builder::{
    apply_body_constraints, body_constraint_tag, RequestBuilder, ASPECT_RATIO_OPTIONS,
};
pub use dispatch::Dispatcher;
pub use error::{DispatchError, OptimizationFailure, ProviderError, ValidationError};
pub use optimize::{DownscaleOptimizer, ImageOptimizer};
pub use types::{
    DispatchState, GenerationDraft, GenerationMode, GenerationOutcome, GenerationRequest,
    GenerationResult, MediaPayload, Measurements, MotionSource, ReferenceImage, ReferenceOrigin,
    ReferenceRole, TerminalState, VideoSubMode,
};
