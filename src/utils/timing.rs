use std::future::Future;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::info;

/// Runs one provider call, logging request and response lines (with duration
/// and status) on the `studio.timing` target.
pub async fn log_provider_timing<T, E, F, Fut>(
    provider: &str,
    operation: &str,
    metadata: Option<JsonValue>,
    call: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started_at = Utc::now();
    let started_perf = Instant::now();
    let metadata_text = metadata
        .as_ref()
        .map(|value| value.to_string())
        .unwrap_or_else(|| "{}".to_string());
    info!(
        target: "studio.timing",
        "event=provider_request provider={} operation={} started_at={} metadata={}",
        provider,
        operation,
        started_at.to_rfc3339(),
        metadata_text
    );

    let result = call().await;
    let status = if result.is_ok() { "success" } else { "error" };

    let completed_at = Utc::now();
    let duration = started_perf.elapsed().as_secs_f64();
    info!(
        target: "studio.timing",
        "event=provider_response provider={} operation={} completed_at={} duration_s={:.3} status={} metadata={}",
        provider,
        operation,
        completed_at.to_rfc3339(),
        duration,
        status,
        metadata_text
    );

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_results_through() {
        let ok: Result<u32, String> =
            log_provider_timing("still", "image", None, || async { Ok(7) }).await;
        assert_eq!(ok, Ok(7));

        let err: Result<u32, String> = log_provider_timing(
            "still",
            "image",
            Some(serde_json::json!({ "images": 2 })),
            || async { Err("boom".to_string()) },
        )
        .await;
        assert_eq!(err, Err("boom".to_string()));
    }
}
