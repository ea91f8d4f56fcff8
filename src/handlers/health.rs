//! Health check endpoint
//!
//! Provides a simple health check for monitoring and load balancers.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::handlers::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// "operational", or "degraded" once any detector has failed open
    pub detection_status: &'static str,
}

/// Health check handler
///
/// Always returns 200 OK. A detector failing open never takes the service
/// down, so it is reported as `detection_status` rather than a failed check.
pub async fn handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let detection_status = if state.metrics().detector_failures_count() > 0 {
        "degraded"
    } else {
        "operational"
    };

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "OK",
            detection_status,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::Arc;

    fn create_test_state() -> AppState {
        AppState::new(Arc::new(Config::default())).expect("should create AppState")
    }

    #[tokio::test]
    async fn test_health_handler_returns_ok() {
        let (status, Json(body)) = handler(State(create_test_state())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "OK");
        assert_eq!(body.detection_status, "operational");
    }

    #[tokio::test]
    async fn test_health_handler_shows_degraded_after_detector_failure() {
        let state = create_test_state();
        state.metrics().record_detector_failure();

        let (status, Json(body)) = handler(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "OK");
        assert_eq!(body.detection_status, "degraded");
    }
}
