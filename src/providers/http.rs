use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::registry::ProviderSpec;
use super::{GenerationBackend, ProviderCall};
use crate::generation::error::ProviderError;
use crate::generation::types::{GenerationResult, MediaPayload, MotionSource};
use crate::storage::media::{detect_mime_type, truncate_for_log};
use crate::utils::http::get_generation_client;

const ERROR_BODY_LIMIT: usize = 800;

/// Posts a JSON envelope to `{base_url}/{provider_id}/{operation}`. Failed calls
/// are reported once; re-submission is up to the user.
#[derive(Debug, Clone)]
pub struct HttpGenerationBackend {
    base_url: String,
    api_key: String,
}

impl HttpGenerationBackend {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn endpoint(&self, provider_id: &str, operation: &str) -> String {
        format!("{}/{}/{}", self.base_url, provider_id, operation)
    }

    fn redact(&self, text: &str) -> String {
        let key = self.api_key.trim();
        if key.is_empty() {
            return text.to_string();
        }
        text.replace(key, "[redacted]")
    }
}

fn encode_media(payload: &MediaPayload) -> Value {
    json!({
        "mimeType": payload.mime_type,
        "data": general_purpose::STANDARD.encode(&payload.bytes),
    })
}

fn encode_motion(motion: &MotionSource) -> Value {
    match motion {
        MotionSource::Preset(name) => json!({ "type": "preset", "name": name }),
        MotionSource::UploadedClip(clip) => {
            let mut value = encode_media(clip);
            if let Some(object) = value.as_object_mut() {
                object.insert("type".to_string(), json!("clip"));
            }
            value
        }
        MotionSource::ExternalUrl(url) => json!({ "type": "url", "url": url.as_str() }),
    }
}

pub(crate) fn build_payload(call: &ProviderCall) -> Value {
    let mut payload = Map::new();
    payload.insert("prompt".to_string(), json!(call.prompt()));
    match call {
        ProviderCall::StillImage {
            references,
            aspect_ratio,
            ..
        } => {
            payload.insert("aspectRatio".to_string(), json!(aspect_ratio));
            payload.insert(
                "references".to_string(),
                Value::Array(references.iter().map(encode_media).collect()),
            );
        }
        ProviderCall::AnimateImage {
            source,
            aspect_ratio,
            motion,
            ..
        } => {
            payload.insert("aspectRatio".to_string(), json!(aspect_ratio));
            payload.insert("source".to_string(), encode_media(source));
            if let Some(motion) = motion {
                payload.insert("motion".to_string(), encode_motion(motion));
            }
        }
        ProviderCall::AvatarVideo {
            identity,
            aspect_ratio,
            motion,
            ..
        } => {
            payload.insert("aspectRatio".to_string(), json!(aspect_ratio));
            payload.insert(
                "identity".to_string(),
                Value::Array(identity.iter().map(encode_media).collect()),
            );
            if let Some(motion) = motion {
                payload.insert("motion".to_string(), encode_motion(motion));
            }
        }
    }
    Value::Object(payload)
}

pub(crate) fn parse_response(body: &Value) -> Result<GenerationResult, ProviderError> {
    if let Some(error) = body.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| error.as_str())
            .unwrap_or("unknown provider error");
        return Err(ProviderError::Rejected(message.to_string()));
    }

    if let Some(url) = body.get("url").and_then(Value::as_str) {
        let url = url.trim();
        if !url.is_empty() {
            return Ok(GenerationResult::Url(url.to_string()));
        }
    }

    if let Some(data) = body.get("data").and_then(Value::as_str) {
        let bytes = general_purpose::STANDARD
            .decode(data.trim())
            .map_err(|err| ProviderError::InvalidResponse(format!("bad base64 payload: {err}")))?;
        if bytes.is_empty() {
            return Err(ProviderError::InvalidResponse("empty payload".to_string()));
        }
        let mime_type = body
            .get("mimeType")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| detect_mime_type(&bytes))
            .unwrap_or_else(|| "application/octet-stream".to_string());
        return Ok(GenerationResult::Binary(MediaPayload::new(bytes, mime_type)));
    }

    Err(ProviderError::InvalidResponse(
        "response carried neither a url nor data".to_string(),
    ))
}

#[async_trait]
impl GenerationBackend for HttpGenerationBackend {
    async fn execute(
        &self,
        provider: &ProviderSpec,
        call: ProviderCall,
    ) -> Result<GenerationResult, ProviderError> {
        let url = self.endpoint(&provider.id, call.operation());
        let payload = build_payload(&call);
        debug!(
            provider = provider.id.as_str(),
            operation = call.operation(),
            images = call.image_count(),
            "Posting generation request to {}",
            url
        );

        let mut request = get_generation_client().post(&url).json(&payload);
        if !self.api_key.trim().is_empty() {
            request = request.bearer_auth(self.api_key.trim());
        }

        let response = request
            .send()
            .await
            .map_err(|err| ProviderError::Transport(self.redact(&err.to_string())))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body = truncate_for_log(&self.redact(&body), ERROR_BODY_LIMIT);
            warn!(
                provider = provider.id.as_str(),
                "Generation request failed with status {}: {}",
                status,
                body
            );
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| ProviderError::InvalidResponse(err.to_string()))?;
        parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[test]
    fn endpoint_joins_provider_and_operation() {
        let backend = HttpGenerationBackend::new("https://gen.example.com/v1/", "secret");
        assert_eq!(
            backend.endpoint("still", "image"),
            "https://gen.example.com/v1/still/image"
        );
        assert_eq!(backend.redact("token secret leaked"), "token [redacted] leaked");
    }

    #[test]
    fn payload_carries_motion_source() {
        let call = ProviderCall::AnimateImage {
            prompt: "wave hello".to_string(),
            source: MediaPayload::new(vec![1u8, 2, 3], "image/png"),
            aspect_ratio: "9:16".to_string(),
            motion: Some(MotionSource::ExternalUrl(
                Url::parse("https://clips.example.com/dance.mp4").unwrap(),
            )),
        };
        let payload = build_payload(&call);
        assert_eq!(payload["prompt"], "wave hello");
        assert_eq!(payload["source"]["data"], "AQID");
        assert_eq!(payload["motion"]["type"], "url");
        assert_eq!(payload["motion"]["url"], "https://clips.example.com/dance.mp4");
    }

    #[test]
    fn parses_url_binary_and_error_bodies() {
        assert_eq!(
            parse_response(&json!({ "url": "https://cdn.example.com/out.png" })).unwrap(),
            GenerationResult::Url("https://cdn.example.com/out.png".to_string())
        );

        match parse_response(&json!({ "data": "AQID", "mimeType": "image/webp" })).unwrap() {
            GenerationResult::Binary(payload) => {
                assert_eq!(&payload.bytes[..], &[1u8, 2, 3]);
                assert_eq!(payload.mime_type, "image/webp");
            }
            other => panic!("unexpected result {other:?}"),
        }

        let err = parse_response(&json!({ "error": { "message": "quota exceeded" } })).unwrap_err();
        assert_eq!(err.to_string(), "Provider rejected the request: quota exceeded");

        assert!(matches!(
            parse_response(&json!({})),
            Err(ProviderError::InvalidResponse(_))
        ));
    }
}
