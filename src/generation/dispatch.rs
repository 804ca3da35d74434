use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};

use super::builder::RequestBuilder;
use super::error::{DispatchError, ValidationError};
use super::routes::{plan_call, Route};
use super::types::{GenerationDraft, GenerationOutcome, GenerationRequest, TerminalState};
use crate::providers::registry::{ProviderCatalog, ProviderSpec};
use crate::providers::{GenerationBackend, ProviderCall};
use crate::state::StudioSession;
use crate::utils::timing::log_provider_timing;

static NEXT_OUTCOME_SEQ: AtomicU64 = AtomicU64::new(1);

fn next_outcome_id() -> String {
    format!(
        "gen-{}-{}",
        Utc::now().timestamp_millis(),
        NEXT_OUTCOME_SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

struct PlannedDispatch {
    provider: ProviderSpec,
    request: GenerationRequest,
    route: &'static Route,
    call: ProviderCall,
}

/// Turns a session's draft into exactly one provider call.
///
/// `IDLE -> VALIDATING -> IN_FLIGHT -> SUCCESS | ERROR`. Rejections before the
/// call leave the session idle; provider failures are terminal and never
/// retried.
pub struct Dispatcher {
    backend: Arc<dyn GenerationBackend>,
    builder: RequestBuilder,
    providers: ProviderCatalog,
}

impl Dispatcher {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        builder: RequestBuilder,
        providers: ProviderCatalog,
    ) -> Self {
        Self {
            backend,
            builder,
            providers,
        }
    }

    pub fn providers(&self) -> &ProviderCatalog {
        &self.providers
    }

    pub async fn generate(
        &self,
        session: &StudioSession,
    ) -> Result<GenerationOutcome, DispatchError> {
        let (draft, dispatch) = session.try_begin_dispatch().map_err(|err| {
            warn!("Generation rejected: {}", err);
            err
        })?;

        let planned = match self.plan(&draft).await {
            Ok(planned) => planned,
            Err(err) => {
                info!(provider = draft.provider_id.as_str(), "Generation request invalid: {}", err);
                dispatch.reject(&err);
                return Err(err.into());
            }
        };

        dispatch.mark_in_flight();
        let PlannedDispatch {
            provider,
            request,
            route,
            call,
        } = planned;
        let metadata = json!({
            "route": route.name,
            "images": call.image_count(),
            "aspect_ratio": request.aspect_ratio,
        });
        let result = log_provider_timing(&provider.id, call.operation(), Some(metadata), || {
            self.backend.execute(&provider, call)
        })
        .await;

        let outcome = match result {
            Ok(result) => {
                info!(
                    provider = provider.id.as_str(),
                    route = route.name,
                    "Generation succeeded"
                );
                GenerationOutcome {
                    id: next_outcome_id(),
                    result: Some(result),
                    echoed_prompt: request.prompt_text,
                    timestamp: Utc::now(),
                    terminal_state: TerminalState::Success,
                    error_detail: None,
                    mode: request.mode,
                    provider_id: provider.id,
                }
            }
            Err(err) => {
                error!(
                    provider = provider.id.as_str(),
                    route = route.name,
                    "Generation failed: {}",
                    err
                );
                GenerationOutcome {
                    id: next_outcome_id(),
                    result: None,
                    echoed_prompt: request.prompt_text,
                    timestamp: Utc::now(),
                    terminal_state: TerminalState::Error,
                    error_detail: Some(err.to_string()),
                    mode: request.mode,
                    provider_id: provider.id,
                }
            }
        };

        dispatch.finish(&outcome);
        Ok(outcome)
    }

    async fn plan(&self, draft: &GenerationDraft) -> Result<PlannedDispatch, ValidationError> {
        if draft.prompt.trim().is_empty() {
            return Err(ValidationError::EmptyPrompt);
        }
        let provider = self
            .providers
            .get(&draft.provider_id)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownProvider(draft.provider_id.clone()))?;
        let request = self.builder.build(draft, &provider).await?;
        let (route, call) = plan_call(&request)?;
        Ok(PlannedDispatch {
            provider,
            request,
            route,
            call,
        })
    }
}
