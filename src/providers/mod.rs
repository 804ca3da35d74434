pub mod http;
pub mod registry;

use async_trait::async_trait;

use crate::generation::error::ProviderError;
use crate::generation::types::{GenerationResult, MediaPayload, MotionSource};
use registry::ProviderSpec;

pub use http::HttpGenerationBackend;
pub use registry::{ProviderCatalog, ProviderFamily};

/// The single outbound call a dispatch produces.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderCall {
    StillImage {
        prompt: String,
        references: Vec<MediaPayload>,
        aspect_ratio: String,
    },
    AnimateImage {
        prompt: String,
        source: MediaPayload,
        aspect_ratio: String,
        motion: Option<MotionSource>,
    },
    AvatarVideo {
        prompt: String,
        identity: Vec<MediaPayload>,
        aspect_ratio: String,
        motion: Option<MotionSource>,
    },
}

impl ProviderCall {
    pub fn operation(&self) -> &'static str {
        match self {
            ProviderCall::StillImage { .. } => "image",
            ProviderCall::AnimateImage { motion, .. } => match motion {
                None => "animate",
                Some(MotionSource::Preset(_)) => "animate/motion-preset",
                Some(MotionSource::UploadedClip(_)) => "animate/motion-clip",
                Some(MotionSource::ExternalUrl(_)) => "animate/motion-url",
            },
            ProviderCall::AvatarVideo { motion, .. } => match motion {
                None => "avatar",
                Some(MotionSource::Preset(_)) => "avatar/motion-preset",
                Some(MotionSource::UploadedClip(_)) => "avatar/motion-clip",
                Some(MotionSource::ExternalUrl(_)) => "avatar/motion-url",
            },
        }
    }

    pub fn prompt(&self) -> &str {
        match self {
            ProviderCall::StillImage { prompt, .. }
            | ProviderCall::AnimateImage { prompt, .. }
            | ProviderCall::AvatarVideo { prompt, .. } => prompt,
        }
    }

    pub fn image_count(&self) -> usize {
        match self {
            ProviderCall::StillImage { references, .. } => references.len(),
            ProviderCall::AnimateImage { .. } => 1,
            ProviderCall::AvatarVideo { identity, .. } => identity.len(),
        }
    }
}

/// An external image/video generation service.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn execute(
        &self,
        provider: &ProviderSpec,
        call: ProviderCall,
    ) -> Result<GenerationResult, ProviderError>;
}
