use super::types::GenerationMode;

/// A request that must never reach a provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Prompt is empty.")]
    EmptyPrompt,
    #[error("Animate mode needs a source image.")]
    MissingAnimateSource,
    #[error("Avatar mode needs at least one identity reference.")]
    MissingIdentityReferences,
    #[error("Unknown provider '{0}'.")]
    UnknownProvider(String),
    #[error("Provider '{provider}' does not support {mode:?} generation.")]
    UnsupportedMode {
        provider: String,
        mode: GenerationMode,
    },
    #[error("Unsupported aspect ratio '{0}'.")]
    InvalidAspectRatio(String),
    #[error("No dispatch route for {0}.")]
    NoRoute(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider request failed: {0}")]
    Transport(String),
    #[error("Provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Provider rejected the request: {0}")]
    Rejected(String),
    #[error("Provider response was invalid: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("Image optimization failed: {0}")]
pub struct OptimizationFailure(pub String);

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("A generation is already in progress, please wait.")]
    Busy,
    #[error("Reference images are still loading, please wait.")]
    ReferencesLoading,
    #[error(transparent)]
    Validation(#[from] ValidationError),
}
