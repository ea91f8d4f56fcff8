//! HTTP request handlers for the loopguard API

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::loop_detection::LoopDetector;
use crate::metrics::{Endpoint, Metrics};
use crate::middleware::{RequestId, request_id_middleware};
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod analyze;
pub mod health;
pub mod metrics;
pub mod stream;

/// Application state shared across all handlers
///
/// Detectors are never shared; each request gets its own from
/// [`AppState::new_detector`].
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    metrics: Arc<Metrics>,
}

impl AppState {
    /// Create a new AppState from configuration
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Metrics`] if metric registration fails.
    pub fn new(config: Arc<Config>) -> AppResult<Self> {
        let metrics = Metrics::new().map_err(|e| AppError::Metrics(e.to_string()))?;
        Ok(Self {
            config,
            metrics: Arc::new(metrics),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Build a detector for one response, reporting into the shared metrics
    pub fn new_detector(&self) -> AppResult<LoopDetector> {
        let detector = LoopDetector::new(self.config.loop_detection.clone())?;
        Ok(detector.with_metrics(self.metrics.as_ref().clone()))
    }

    /// Count a request, logging instead of failing if the metric is unavailable
    pub(crate) fn record_request(&self, endpoint: Endpoint, request_id: RequestId) {
        if let Err(e) = self.metrics.record_request(endpoint) {
            tracing::warn!(
                request_id = %request_id,
                endpoint = endpoint.as_str(),
                error = %e,
                "Failed to record request metric"
            );
        }
    }
}

/// Build the application router
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::handler))
        .route("/metrics", get(metrics::handler))
        .route("/v1/loop-detection/config", get(analyze::config_handler))
        .route("/v1/loop-detection/analyze", post(analyze::handler))
        .route("/v1/loop-detection/stream", post(stream::handler))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
