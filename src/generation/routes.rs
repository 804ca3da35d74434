use std::fmt;

use super::error::ValidationError;
use super::types::{GenerationMode, GenerationRequest, MotionKind, VideoSubMode};
use crate::providers::registry::ProviderFamily;
use crate::providers::ProviderCall;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub mode: GenerationMode,
    pub sub_mode: Option<VideoSubMode>,
    pub family: ProviderFamily,
    pub motion: MotionKind,
}

impl RouteKey {
    pub fn for_request(request: &GenerationRequest) -> Self {
        Self {
            mode: request.mode,
            sub_mode: request.video_sub_mode,
            family: request.family,
            motion: request.motion_kind(),
        }
    }

    fn without_motion(self) -> Self {
        Self {
            motion: MotionKind::None,
            ..self
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mode={:?} sub_mode={:?} family={:?} motion={:?}",
            self.mode, self.sub_mode, self.family, self.motion
        )
    }
}

pub type CallBuilder = fn(&GenerationRequest) -> Result<ProviderCall, ValidationError>;

pub struct Route {
    pub key: RouteKey,
    pub name: &'static str,
    pub build: CallBuilder,
}

const fn route(
    mode: GenerationMode,
    sub_mode: Option<VideoSubMode>,
    family: ProviderFamily,
    motion: MotionKind,
    name: &'static str,
    build: CallBuilder,
) -> Route {
    Route {
        key: RouteKey {
            mode,
            sub_mode,
            family,
            motion,
        },
        name,
        build,
    }
}

use GenerationMode::{Image, Video};
use ProviderFamily::{MotionControl, Standard};
use VideoSubMode::{Animate, Avatar};

/// Every supported (mode, sub-mode, family, motion) combination. A new
/// provider family is a new set of rows here.
pub static ROUTES: &[Route] = &[
    route(Image, None, Standard, MotionKind::None, "still-image", still_image),
    route(Image, None, MotionControl, MotionKind::None, "still-image", still_image),
    route(Video, Some(Animate), Standard, MotionKind::None, "animate", animate),
    route(Video, Some(Animate), MotionControl, MotionKind::None, "animate", animate),
    route(Video, Some(Animate), MotionControl, MotionKind::Preset, "animate-motion-preset", animate_with_motion),
    route(Video, Some(Animate), MotionControl, MotionKind::Clip, "animate-motion-clip", animate_with_motion),
    route(Video, Some(Animate), MotionControl, MotionKind::Url, "animate-motion-url", animate_with_motion),
    route(Video, Some(Avatar), Standard, MotionKind::None, "avatar", avatar),
    route(Video, Some(Avatar), MotionControl, MotionKind::None, "avatar", avatar),
    route(Video, Some(Avatar), MotionControl, MotionKind::Preset, "avatar-motion-preset", avatar_with_motion),
    route(Video, Some(Avatar), MotionControl, MotionKind::Clip, "avatar-motion-clip", avatar_with_motion),
    route(Video, Some(Avatar), MotionControl, MotionKind::Url, "avatar-motion-url", avatar_with_motion),
];

/// Exact key first, then the same key without a motion source (families
/// without motion control ignore it).
pub fn resolve(key: RouteKey) -> Option<&'static Route> {
    ROUTES
        .iter()
        .find(|route| route.key == key)
        .or_else(|| {
            let fallback = key.without_motion();
            ROUTES.iter().find(|route| route.key == fallback)
        })
}

pub fn plan_call(
    request: &GenerationRequest,
) -> Result<(&'static Route, ProviderCall), ValidationError> {
    let key = RouteKey::for_request(request);
    let route = resolve(key).ok_or_else(|| ValidationError::NoRoute(key.to_string()))?;
    let call = (route.build)(request)?;
    Ok((route, call))
}

fn still_image(request: &GenerationRequest) -> Result<ProviderCall, ValidationError> {
    Ok(ProviderCall::StillImage {
        prompt: request.prompt_text.clone(),
        references: request.reference_payloads(),
        aspect_ratio: request.aspect_ratio.clone(),
    })
}

fn animate_call(
    request: &GenerationRequest,
    with_motion: bool,
) -> Result<ProviderCall, ValidationError> {
    let source = request
        .source_image
        .as_ref()
        .ok_or(ValidationError::MissingAnimateSource)?;
    Ok(ProviderCall::AnimateImage {
        prompt: request.prompt_text.clone(),
        source: source.payload().clone(),
        aspect_ratio: request.aspect_ratio.clone(),
        motion: if with_motion {
            request.options.motion.clone()
        } else {
            None
        },
    })
}

fn animate(request: &GenerationRequest) -> Result<ProviderCall, ValidationError> {
    animate_call(request, false)
}

fn animate_with_motion(request: &GenerationRequest) -> Result<ProviderCall, ValidationError> {
    animate_call(request, true)
}

fn avatar_call(
    request: &GenerationRequest,
    with_motion: bool,
) -> Result<ProviderCall, ValidationError> {
    let identity = request.reference_payloads();
    if identity.is_empty() {
        return Err(ValidationError::MissingIdentityReferences);
    }
    Ok(ProviderCall::AvatarVideo {
        prompt: request.prompt_text.clone(),
        identity,
        aspect_ratio: request.aspect_ratio.clone(),
        motion: if with_motion {
            request.options.motion.clone()
        } else {
            None
        },
    })
}

fn avatar(request: &GenerationRequest) -> Result<ProviderCall, ValidationError> {
    avatar_call(request, false)
}

fn avatar_with_motion(request: &GenerationRequest) -> Result<ProviderCall, ValidationError> {
    avatar_call(request, true)
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashSet};

    use url::Url;

    use super::*;
    use crate::generation::builder::tests::reference;
    use crate::generation::types::{MotionSource, ProviderOptions, ReferenceRole};

    fn request(
        mode: GenerationMode,
        sub_mode: Option<VideoSubMode>,
        family: ProviderFamily,
        motion: Option<MotionSource>,
    ) -> GenerationRequest {
        let mut references = BTreeMap::new();
        references.insert(
            ReferenceRole::Face,
            vec![reference("face-1", ReferenceRole::Face, 8)],
        );
        GenerationRequest {
            prompt_text: "hello".to_string(),
            mode,
            video_sub_mode: sub_mode,
            references,
            source_image: Some(reference("src", ReferenceRole::General, 8)),
            aspect_ratio: "9:16".to_string(),
            provider_id: "p".to_string(),
            family,
            options: ProviderOptions {
                motion,
                ..ProviderOptions::default()
            },
        }
    }

    #[test]
    fn table_keys_are_unique() {
        let keys = ROUTES.iter().map(|route| route.key).collect::<HashSet<_>>();
        assert_eq!(keys.len(), ROUTES.len());
    }

    #[test]
    fn image_mode_is_a_still_call() {
        let (route, call) =
            plan_call(&request(Image, None, Standard, None)).unwrap();
        assert_eq!(route.name, "still-image");
        assert!(matches!(call, ProviderCall::StillImage { ref references, .. } if references.len() == 1));
    }

    #[test]
    fn motion_sources_branch_within_motion_family() {
        let preset = Some(MotionSource::Preset("wave".to_string()));
        let url = Some(MotionSource::ExternalUrl(
            Url::parse("https://clips.example.com/a.mp4").unwrap(),
        ));

        let (route, call) =
            plan_call(&request(Video, Some(Animate), MotionControl, preset.clone())).unwrap();
        assert_eq!(route.name, "animate-motion-preset");
        assert_eq!(call.operation(), "animate/motion-preset");

        let (route, _) =
            plan_call(&request(Video, Some(Avatar), MotionControl, url)).unwrap();
        assert_eq!(route.name, "avatar-motion-url");

        let (route, call) = plan_call(&request(Video, Some(Animate), Standard, preset)).unwrap();
        assert_eq!(route.name, "animate");
        assert!(matches!(call, ProviderCall::AnimateImage { motion: None, .. }));
    }

    #[test]
    fn avatar_without_identity_is_rejected() {
        let mut req = request(Video, Some(Avatar), Standard, None);
        req.references.clear();
        assert!(matches!(
            plan_call(&req),
            Err(ValidationError::MissingIdentityReferences)
        ));
    }

    #[test]
    fn video_without_sub_mode_has_no_route() {
        assert!(matches!(
            plan_call(&request(Video, None, Standard, None)),
            Err(ValidationError::NoRoute(_))
        ));
    }
}
