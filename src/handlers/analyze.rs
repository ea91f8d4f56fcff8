//! Whole-body loop analysis and configuration endpoints
//!
//! POST /v1/loop-detection/analyze checks a complete response for loops.
//! GET /v1/loop-detection/config returns the effective detection configuration.

use crate::error::{AppError, AppResult};
use crate::handlers::AppState;
use crate::loop_detection::{AnalysisReport, DetectionConfig};
use crate::metrics::{DetectionMode, Endpoint};
use crate::middleware::RequestId;
use axum::{Extension, Json, extract::State};
use serde::Deserialize;
use std::time::Instant;

/// Largest accepted `content`, in characters
pub const MAX_CONTENT_CHARS: usize = 1_000_000;

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub content: String,
}

impl AnalyzeRequest {
    fn validate(&self) -> AppResult<()> {
        if self.content.is_empty() {
            return Err(AppError::Validation(
                "content must not be empty".to_string(),
            ));
        }

        let length = self.content.chars().count();
        if length > MAX_CONTENT_CHARS {
            return Err(AppError::Validation(format!(
                "content exceeds maximum length of {} characters (got {})",
                MAX_CONTENT_CHARS, length
            )));
        }

        Ok(())
    }
}

/// POST /v1/loop-detection/analyze handler
///
/// Runs a fresh detector over the complete content and returns
/// `{loop_detected, event, stats}`.
pub async fn handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(request): Json<AnalyzeRequest>,
) -> AppResult<Json<AnalysisReport>> {
    state.record_request(Endpoint::Analyze, request_id);
    request.validate()?;

    let mut detector = state.new_detector()?;
    let started = Instant::now();
    let event = detector.analyze_complete(&request.content);
    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

    if let Err(e) = state.metrics().record_analysis_duration(duration_ms) {
        tracing::warn!(request_id = %request_id, error = %e, "Failed to record analysis duration");
    }

    match &event {
        Some(event) => {
            if let Err(e) = state.metrics().record_detection(DetectionMode::Complete) {
                tracing::warn!(request_id = %request_id, error = %e, "Failed to record detection");
            }
            tracing::info!(
                request_id = %request_id,
                repetition_count = event.repetition_count,
                duration_ms = %duration_ms,
                "Loop detected in submitted content"
            );
        }
        None => tracing::debug!(
            request_id = %request_id,
            duration_ms = %duration_ms,
            "No loop detected in submitted content"
        ),
    }

    Ok(Json(AnalysisReport::new(event, detector.stats())))
}

/// GET /v1/loop-detection/config handler
pub async fn config_handler(State(state): State<AppState>) -> Json<DetectionConfig> {
    Json(state.config().loop_detection.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::str::FromStr;
    use std::sync::Arc;

    fn create_test_state() -> AppState {
        let config = Config::from_str(
            "[loop_detection]\ncontent_chunk_size = 10\ncontent_loop_threshold = 3\n",
        )
        .unwrap();
        AppState::new(Arc::new(config)).unwrap()
    }

    async fn analyze(state: &AppState, content: String) -> AppResult<Json<AnalysisReport>> {
        handler(
            State(state.clone()),
            Extension(RequestId::new()),
            Json(AnalyzeRequest { content }),
        )
        .await
    }

    #[tokio::test]
    async fn test_detects_loop_and_counts_it() {
        let state = create_test_state();
        let Json(report) = analyze(&state, "abcdefghij".repeat(3)).await.unwrap();

        assert!(report.loop_detected);
        assert_eq!(report.event.as_ref().unwrap().pattern, "abcdefghij");
        assert_eq!(report.stats.total_processed, 30);
        assert_eq!(state.metrics().detections_count(DetectionMode::Complete), 1);
    }

    #[tokio::test]
    async fn test_clean_content_reports_no_loop() {
        let state = create_test_state();
        let Json(report) = analyze(&state, "A short, honest answer.".to_string())
            .await
            .unwrap();
        assert!(!report.loop_detected);
        assert!(report.event.is_none());
    }

    #[tokio::test]
    async fn test_rejects_empty_content() {
        let state = create_test_state();
        let err = analyze(&state, String::new()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_rejects_oversized_content() {
        let state = create_test_state();
        let err = analyze(&state, "x".repeat(MAX_CONTENT_CHARS + 1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("maximum length"));
    }

    #[tokio::test]
    async fn test_config_handler_returns_effective_config() {
        let state = create_test_state();
        let Json(config) = config_handler(State(state)).await;
        assert_eq!(config.content_chunk_size(), 10);
        assert_eq!(config.content_loop_threshold(), 3);
    }
}
