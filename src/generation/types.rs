use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::providers::registry::ProviderFamily;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    Image,
    Video,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoSubMode {
    #[default]
    Animate,
    Avatar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceRole {
    General,
    Face,
    Angle,
    Body,
    Pose,
}

impl ReferenceRole {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "general" => Some(ReferenceRole::General),
            "face" => Some(ReferenceRole::Face),
            "angle" => Some(ReferenceRole::Angle),
            "body" => Some(ReferenceRole::Body),
            "pose" => Some(ReferenceRole::Pose),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceOrigin {
    Uploaded,
    Generated,
    Storage,
}

/// Binary media plus its mime type. Bytes are shared and never mutated.
#[derive(Clone, PartialEq, Eq)]
pub struct MediaPayload {
    pub bytes: Arc<[u8]>,
    pub mime_type: String,
}

impl MediaPayload {
    pub fn new(bytes: impl Into<Arc<[u8]>>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_image(&self) -> bool {
        !self.bytes.is_empty() && self.mime_type.starts_with("image/")
    }
}

impl fmt::Debug for MediaPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaPayload")
            .field("len", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceImage {
    pub id: String,
    pub original: MediaPayload,
    pub downscaled: Option<MediaPayload>,
    pub role: ReferenceRole,
    pub origin: ReferenceOrigin,
}

impl ReferenceImage {
    pub fn new(
        id: impl Into<String>,
        original: MediaPayload,
        role: ReferenceRole,
        origin: ReferenceOrigin,
    ) -> Self {
        Self {
            id: id.into(),
            original,
            downscaled: None,
            role,
            origin,
        }
    }

    /// The payload to send: the downscaled variant when one exists.
    pub fn payload(&self) -> &MediaPayload {
        self.downscaled.as_ref().unwrap_or(&self.original)
    }

    pub fn is_loaded(&self) -> bool {
        self.original.is_image()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurements {
    #[serde(default)]
    pub body_type: Option<String>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub height: Option<String>,
    #[serde(default)]
    pub bust: Option<String>,
    #[serde(default)]
    pub waist: Option<String>,
    #[serde(default)]
    pub hips: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotionKind {
    None,
    Preset,
    Clip,
    Url,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MotionSource {
    Preset(String),
    UploadedClip(MediaPayload),
    ExternalUrl(Url),
}

impl MotionSource {
    pub fn kind(&self) -> MotionKind {
        match self {
            MotionSource::Preset(_) => MotionKind::Preset,
            MotionSource::UploadedClip(_) => MotionKind::Clip,
            MotionSource::ExternalUrl(_) => MotionKind::Url,
        }
    }
}

/// Everything the user has assembled for one generation, before validation.
#[derive(Debug, Clone)]
pub struct GenerationDraft {
    pub prompt: String,
    pub measurements: Measurements,
    pub mode: GenerationMode,
    pub video_sub_mode: VideoSubMode,
    pub references: Vec<ReferenceImage>,
    pub source_image: Option<ReferenceImage>,
    pub motion: Option<MotionSource>,
    pub aspect_ratio: String,
    pub provider_id: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderOptions {
    pub motion: Option<MotionSource>,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt_text: String,
    pub mode: GenerationMode,
    pub video_sub_mode: Option<VideoSubMode>,
    pub references: BTreeMap<ReferenceRole, Vec<ReferenceImage>>,
    pub source_image: Option<ReferenceImage>,
    pub aspect_ratio: String,
    pub provider_id: String,
    pub family: ProviderFamily,
    pub options: ProviderOptions,
}

impl GenerationRequest {
    pub fn reference_count(&self) -> usize {
        self.references.values().map(Vec::len).sum()
    }

    /// References flattened in role order.
    pub fn reference_payloads(&self) -> Vec<MediaPayload> {
        self.references
            .values()
            .flatten()
            .map(|reference| reference.payload().clone())
            .collect()
    }

    pub fn motion_kind(&self) -> MotionKind {
        self.options
            .motion
            .as_ref()
            .map(MotionSource::kind)
            .unwrap_or(MotionKind::None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationResult {
    Url(String),
    Binary(MediaPayload),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalState {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutcome {
    pub id: String,
    pub result: Option<GenerationResult>,
    pub echoed_prompt: String,
    pub timestamp: DateTime<Utc>,
    pub terminal_state: TerminalState,
    pub error_detail: Option<String>,
    pub mode: GenerationMode,
    pub provider_id: String,
}

impl GenerationOutcome {
    pub fn is_success(&self) -> bool {
        self.terminal_state == TerminalState::Success
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchState {
    #[default]
    Idle,
    Validating,
    InFlight,
    Success,
    Error,
}

impl DispatchState {
    pub fn is_busy(self) -> bool {
        matches!(self, DispatchState::Validating | DispatchState::InFlight)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DispatchState::Success | DispatchState::Error)
    }
}
