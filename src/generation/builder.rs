use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::error::ValidationError;
use super::optimize::ImageOptimizer;
use super::types::{
    GenerationDraft, GenerationMode, GenerationRequest, Measurements, ProviderOptions,
    ReferenceImage, VideoSubMode,
};
use crate::providers::registry::ProviderSpec;

pub const ASPECT_RATIO_OPTIONS: &[&str] = &[
    "1:1", "3:4", "4:3", "9:16", "16:9", "2:3", "3:2", "21:9",
];

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// `[BODY: ...]` tag from the measurement fields that are set, in fixed field
/// order. `None` when no field is set.
pub fn body_constraint_tag(measurements: &Measurements) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(body_type) = non_empty(measurements.body_type.as_deref()) {
        parts.push(body_type.to_string());
    }
    if let Some(age) = measurements.age {
        parts.push(format!("{age} years old"));
    }
    if let Some(height) = non_empty(measurements.height.as_deref()) {
        parts.push(format!("{height} tall"));
    }
    if let Some(bust) = non_empty(measurements.bust.as_deref()) {
        parts.push(format!("bust {bust}"));
    }
    if let Some(waist) = non_empty(measurements.waist.as_deref()) {
        parts.push(format!("waist {waist}"));
    }
    if let Some(hips) = non_empty(measurements.hips.as_deref()) {
        parts.push(format!("hips {hips}"));
    }

    if parts.is_empty() {
        None
    } else {
        Some(format!("[BODY: {}]", parts.join(", ")))
    }
}

pub fn apply_body_constraints(prompt: &str, measurements: &Measurements) -> String {
    let prompt = prompt.trim();
    match body_constraint_tag(measurements) {
        Some(tag) => format!("{tag} {prompt}"),
        None => prompt.to_string(),
    }
}

#[derive(Clone)]
pub struct RequestBuilder {
    optimizer: Arc<dyn ImageOptimizer>,
}

impl RequestBuilder {
    pub fn new(optimizer: Arc<dyn ImageOptimizer>) -> Self {
        Self { optimizer }
    }

    pub async fn build(
        &self,
        draft: &GenerationDraft,
        provider: &ProviderSpec,
    ) -> Result<GenerationRequest, ValidationError> {
        if draft.prompt.trim().is_empty() {
            return Err(ValidationError::EmptyPrompt);
        }
        if !provider.supports(draft.mode) {
            return Err(ValidationError::UnsupportedMode {
                provider: provider.id.clone(),
                mode: draft.mode,
            });
        }
        let aspect_ratio = draft.aspect_ratio.trim();
        if !ASPECT_RATIO_OPTIONS.contains(&aspect_ratio) {
            return Err(ValidationError::InvalidAspectRatio(aspect_ratio.to_string()));
        }

        let video_sub_mode = match draft.mode {
            GenerationMode::Image => None,
            GenerationMode::Video => Some(draft.video_sub_mode),
        };
        let source_image = match video_sub_mode {
            Some(VideoSubMode::Animate) => Some(
                draft
                    .source_image
                    .clone()
                    .filter(ReferenceImage::is_loaded)
                    .ok_or(ValidationError::MissingAnimateSource)?,
            ),
            _ => None,
        };

        let mut batch = draft
            .references
            .iter()
            .filter(|reference| reference.is_loaded())
            .cloned()
            .collect::<Vec<_>>();
        let skipped = draft.references.len() - batch.len();
        if skipped > 0 {
            debug!("Skipping {} references without image payloads", skipped);
        }
        let has_source = source_image.is_some();
        batch.extend(source_image);

        let mut optimized = self.optimize_all(batch).await;
        let source_image = if has_source { optimized.pop() } else { None };

        let mut references: BTreeMap<_, Vec<ReferenceImage>> = BTreeMap::new();
        for reference in optimized {
            references.entry(reference.role).or_default().push(reference);
        }

        let motion = match draft.mode {
            GenerationMode::Video => draft.motion.clone(),
            GenerationMode::Image => None,
        };

        Ok(GenerationRequest {
            prompt_text: apply_body_constraints(&draft.prompt, &draft.measurements),
            mode: draft.mode,
            video_sub_mode,
            references,
            source_image,
            aspect_ratio: aspect_ratio.to_string(),
            provider_id: provider.id.clone(),
            family: provider.family,
            options: ProviderOptions {
                motion,
                ..ProviderOptions::default()
            },
        })
    }

    /// Optimizes every reference as its own task; results keep input order.
    /// A failed optimization keeps the original payload.
    async fn optimize_all(&self, references: Vec<ReferenceImage>) -> Vec<ReferenceImage> {
        let tasks = references
            .into_iter()
            .map(|reference| {
                let optimizer = Arc::clone(&self.optimizer);
                let fallback = reference.clone();
                let handle = tokio::spawn(async move {
                    match optimizer.optimize(&reference.original).await {
                        Ok(payload) => ReferenceImage {
                            downscaled: Some(payload),
                            ..reference
                        },
                        Err(err) => {
                            warn!(reference = reference.id.as_str(), "{}; using original", err);
                            reference
                        }
                    }
                });
                (fallback, handle)
            })
            .collect::<Vec<_>>();

        let mut optimized = Vec::with_capacity(tasks.len());
        for (fallback, handle) in tasks {
            match handle.await {
                Ok(reference) => optimized.push(reference),
                Err(err) => {
                    warn!(
                        reference = fallback.id.as_str(),
                        "Optimization task aborted: {}; using original", err
                    );
                    optimized.push(fallback);
                }
            }
        }
        optimized
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::generation::error::OptimizationFailure;
    use crate::generation::optimize::tests::png_payload;
    use crate::generation::optimize::DownscaleOptimizer;
    use crate::generation::types::{MediaPayload, ReferenceOrigin, ReferenceRole};
    use crate::providers::registry::ProviderCatalog;
    use async_trait::async_trait;

    pub(crate) struct FailingOptimizer;

    #[async_trait]
    impl ImageOptimizer for FailingOptimizer {
        async fn optimize(
            &self,
            _payload: &MediaPayload,
        ) -> Result<MediaPayload, OptimizationFailure> {
            Err(OptimizationFailure("decoder unavailable".to_string()))
        }
    }

    pub(crate) fn reference(id: &str, role: ReferenceRole, width: u32) -> ReferenceImage {
        ReferenceImage::new(id, png_payload(width, width), role, ReferenceOrigin::Uploaded)
    }

    pub(crate) fn draft(prompt: &str, mode: GenerationMode, provider_id: &str) -> GenerationDraft {
        GenerationDraft {
            prompt: prompt.to_string(),
            measurements: Measurements::default(),
            mode,
            video_sub_mode: VideoSubMode::Animate,
            references: Vec::new(),
            source_image: None,
            motion: None,
            aspect_ratio: "1:1".to_string(),
            provider_id: provider_id.to_string(),
        }
    }

    fn builder() -> RequestBuilder {
        RequestBuilder::new(Arc::new(DownscaleOptimizer::new(64, 80)))
    }

    fn provider(id: &str) -> ProviderSpec {
        ProviderCatalog::default().get(id).unwrap().clone()
    }

    #[test]
    fn body_tag_follows_field_order() {
        let measurements = Measurements {
            body_type: Some("athletic".to_string()),
            age: Some(25),
            ..Measurements::default()
        };
        assert_eq!(
            apply_body_constraints("smiling", &measurements),
            "[BODY: athletic, 25 years old] smiling"
        );

        let full = Measurements {
            body_type: Some("curvy".to_string()),
            age: Some(31),
            height: Some("170cm".to_string()),
            bust: Some("90cm".to_string()),
            waist: Some(" ".to_string()),
            hips: Some("95cm".to_string()),
        };
        assert_eq!(
            body_constraint_tag(&full).unwrap(),
            "[BODY: curvy, 31 years old, 170cm tall, bust 90cm, hips 95cm]"
        );
        assert_eq!(body_constraint_tag(&Measurements::default()), None);
        assert_eq!(apply_body_constraints(" smiling ", &Measurements::default()), "smiling");
    }

    #[tokio::test]
    async fn builds_prefixed_prompt() {
        let mut draft = draft("smiling", GenerationMode::Image, "still");
        draft.measurements = Measurements {
            body_type: Some("athletic".to_string()),
            age: Some(25),
            ..Measurements::default()
        };
        let request = builder().build(&draft, &provider("still")).await.unwrap();
        assert_eq!(request.prompt_text, "[BODY: athletic, 25 years old] smiling");
        assert_eq!(request.video_sub_mode, None);
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected() {
        let draft = draft("   ", GenerationMode::Image, "still");
        let err = builder().build(&draft, &provider("still")).await.unwrap_err();
        assert_eq!(err, ValidationError::EmptyPrompt);
    }

    #[tokio::test]
    async fn animate_without_source_is_rejected() {
        let draft = draft("dance", GenerationMode::Video, "motion");
        let err = builder().build(&draft, &provider("motion")).await.unwrap_err();
        assert_eq!(err, ValidationError::MissingAnimateSource);
    }

    #[tokio::test]
    async fn avatar_mode_needs_no_source() {
        let mut draft = draft("talk to camera", GenerationMode::Video, "motion");
        draft.video_sub_mode = VideoSubMode::Avatar;
        draft.references = vec![reference("face-1", ReferenceRole::Face, 16)];
        let request = builder().build(&draft, &provider("motion")).await.unwrap();
        assert_eq!(request.video_sub_mode, Some(VideoSubMode::Avatar));
        assert!(request.source_image.is_none());
        assert_eq!(request.reference_count(), 1);
    }

    #[tokio::test]
    async fn rejects_mode_and_aspect_mismatches() {
        let draft_video = draft("dance", GenerationMode::Video, "still");
        assert!(matches!(
            builder().build(&draft_video, &provider("still")).await,
            Err(ValidationError::UnsupportedMode { .. })
        ));

        let mut odd = draft("portrait", GenerationMode::Image, "still");
        odd.aspect_ratio = "5:7".to_string();
        assert_eq!(
            builder().build(&odd, &provider("still")).await.unwrap_err(),
            ValidationError::InvalidAspectRatio("5:7".to_string())
        );
    }

    #[tokio::test]
    async fn unloaded_references_are_dropped_and_rest_downscaled() {
        let mut draft = draft("portrait", GenerationMode::Image, "still");
        draft.references = vec![
            reference("face-1", ReferenceRole::Face, 200),
            ReferenceImage::new(
                "pending",
                MediaPayload::new(Vec::<u8>::new(), "image/png"),
                ReferenceRole::Face,
                ReferenceOrigin::Storage,
            ),
            reference("body-1", ReferenceRole::Body, 32),
            reference("face-2", ReferenceRole::Face, 16),
        ];
        let request = builder().build(&draft, &provider("still")).await.unwrap();

        let faces = &request.references[&ReferenceRole::Face];
        assert_eq!(
            faces.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["face-1", "face-2"]
        );
        assert_eq!(faces[0].payload().mime_type, "image/jpeg");
        let decoded = image::load_from_memory(&faces[0].payload().bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 64));
        assert_eq!(request.references[&ReferenceRole::Body].len(), 1);
        assert_eq!(request.reference_count(), 3);
    }

    #[tokio::test]
    async fn optimization_failures_fall_back_to_original() {
        let builder = RequestBuilder::new(Arc::new(FailingOptimizer));
        let mut draft = draft("wave", GenerationMode::Video, "motion");
        let source = reference("src", ReferenceRole::General, 128);
        draft.source_image = Some(source.clone());
        let request = builder.build(&draft, &provider("motion")).await.unwrap();
        let built_source = request.source_image.unwrap();
        assert!(built_source.downscaled.is_none());
        assert_eq!(built_source.payload(), &source.original);
    }
}
