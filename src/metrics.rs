//! Prometheus metrics collection for loopguard
//!
//! This module provides metrics instrumentation for tracking:
//! - Requests by API endpoint
//! - Confirmed loops by detection mode
//! - Fragments processed and detector failures
//! - Callback failures in the streaming guard
//! - Whole-body analysis latency
//!
//! Metrics are exposed via the `/metrics` endpoint in Prometheus text format.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::fmt;
use std::sync::Arc;

/// API endpoint label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Analyze,
    Stream,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Analyze => "analyze",
            Endpoint::Stream => "stream",
        }
    }
}

/// How the detector was driven when a loop was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMode {
    /// Whole response body at once
    Complete,
    /// Fragment by fragment while streaming
    Streaming,
}

impl DetectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMode::Complete => "complete",
            DetectionMode::Streaming => "streaming",
        }
    }
}

/// Streaming guard hook that can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    OnDetected,
    CancelUpstream,
}

impl CallbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackKind::OnDetected => "on_detected",
            CallbackKind::CancelUpstream => "cancel_upstream",
        }
    }
}

/// Metrics collector for loopguard
///
/// Cloning is cheap; clones share the same registry and counters.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    requests_total: IntCounterVec,
    loop_detections: IntCounterVec,
    fragments_processed: IntCounter,
    detector_failures: IntCounter,
    callback_failures: IntCounterVec,
    analysis_duration: Histogram,
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("fragments_processed", &self.fragments_processed.get())
            .field("detector_failures", &self.detector_failures.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create a new Metrics instance with its own registry
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Cardinality: 2 endpoints
        let requests_total = IntCounterVec::new(
            Opts::new(
                "loopguard_requests_total",
                "Total number of loop detection requests by endpoint",
            ),
            &["endpoint"],
        )?;

        let loop_detections = IntCounterVec::new(
            Opts::new(
                "loopguard_loop_detections_total",
                "Total number of confirmed loops by detection mode",
            ),
            &["mode"],
        )?;

        let fragments_processed = IntCounter::with_opts(Opts::new(
            "loopguard_fragments_processed_total",
            "Total number of non-empty output fragments fed to detectors",
        ))?;

        // Alert on any increment: a detector disabled itself after an internal error
        let detector_failures = IntCounter::with_opts(Opts::new(
            "loopguard_detector_failures_total",
            "Total number of detectors that failed open after an internal analysis error",
        ))?;

        let callback_failures = IntCounterVec::new(
            Opts::new(
                "loopguard_callback_failures_total",
                "Total number of failed streaming guard callbacks by callback",
            ),
            &["callback"],
        )?;

        let analysis_duration = Histogram::with_opts(
            HistogramOpts::new(
                "loopguard_analysis_duration_ms",
                "Whole-body loop analysis latency in milliseconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0]),
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(loop_detections.clone()))?;
        registry.register(Box::new(fragments_processed.clone()))?;
        registry.register(Box::new(detector_failures.clone()))?;
        registry.register(Box::new(callback_failures.clone()))?;
        registry.register(Box::new(analysis_duration.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            requests_total,
            loop_detections,
            fragments_processed,
            detector_failures,
            callback_failures,
            analysis_duration,
        })
    }

    /// Record a request to an API endpoint
    ///
    /// # Errors
    ///
    /// Returns an error if the metric is not registered.
    pub fn record_request(&self, endpoint: Endpoint) -> Result<(), prometheus::Error> {
        self.requests_total
            .get_metric_with_label_values(&[endpoint.as_str()])?
            .inc();
        Ok(())
    }

    /// Record a confirmed loop
    ///
    /// # Errors
    ///
    /// Returns an error if the metric is not registered.
    pub fn record_detection(&self, mode: DetectionMode) -> Result<(), prometheus::Error> {
        self.loop_detections
            .get_metric_with_label_values(&[mode.as_str()])?
            .inc();
        Ok(())
    }

    pub fn record_fragment(&self) {
        self.fragments_processed.inc();
    }

    pub fn record_detector_failure(&self) {
        self.detector_failures.inc();
    }

    /// Record a failed streaming guard callback
    ///
    /// # Errors
    ///
    /// Returns an error if the metric is not registered.
    pub fn record_callback_failure(&self, callback: CallbackKind) -> Result<(), prometheus::Error> {
        self.callback_failures
            .get_metric_with_label_values(&[callback.as_str()])?
            .inc();
        Ok(())
    }

    /// Record whole-body analysis duration
    ///
    /// # Errors
    ///
    /// Returns an error if `duration_ms` is NaN, infinite, or negative. Such
    /// values would corrupt every percentile of the histogram.
    pub fn record_analysis_duration(&self, duration_ms: f64) -> Result<(), prometheus::Error> {
        if !duration_ms.is_finite() {
            return Err(prometheus::Error::Msg(format!(
                "Histogram value must be finite (not NaN or Infinity), got: {}",
                duration_ms
            )));
        }

        if duration_ms < 0.0 {
            return Err(prometheus::Error::Msg(format!(
                "Histogram value must be non-negative (duration cannot be negative), got: {}",
                duration_ms
            )));
        }

        self.analysis_duration.observe(duration_ms);
        Ok(())
    }

    pub fn fragments_processed_count(&self) -> u64 {
        self.fragments_processed.get()
    }

    pub fn detector_failures_count(&self) -> u64 {
        self.detector_failures.get()
    }

    pub fn detections_count(&self, mode: DetectionMode) -> u64 {
        self.loop_detections.with_label_values(&[mode.as_str()]).get()
    }

    pub fn callback_failures_count(&self, callback: CallbackKind) -> u64 {
        self.callback_failures
            .with_label_values(&[callback.as_str()])
            .get()
    }

    /// Gather all metrics and encode them in Prometheus text format
    ///
    /// # Errors
    ///
    /// Returns an error if metric encoding fails.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();
        let metric_count = metric_families.len();

        tracing::debug!(
            metric_family_count = metric_count,
            "Encoding metrics to Prometheus text format"
        );

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    metric_family_count = metric_count,
                    "Prometheus text encoder failed"
                );
                prometheus::Error::Msg(format!(
                    "Failed to encode {} metric families: {}",
                    metric_count, e
                ))
            })?;

        String::from_utf8(buffer).map_err(|e| {
            let valid_up_to = e.utf8_error().valid_up_to();
            tracing::error!(
                invalid_byte_index = valid_up_to,
                "Prometheus encoder produced invalid UTF-8"
            );
            prometheus::Error::Msg(format!(
                "Failed to convert metrics to UTF-8 at byte {}: {}",
                valid_up_to, e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new_registers_all_families() {
        let metrics = Metrics::new().expect("Failed to create metrics");

        metrics.record_request(Endpoint::Analyze).unwrap();
        metrics.record_detection(DetectionMode::Complete).unwrap();
        metrics.record_fragment();
        metrics.record_detector_failure();
        metrics
            .record_callback_failure(CallbackKind::OnDetected)
            .unwrap();
        metrics.record_analysis_duration(1.0).unwrap();

        let names: Vec<String> = metrics
            .registry
            .gather()
            .iter()
            .map(|m| m.name().to_string())
            .collect();
        assert_eq!(names.len(), 6);
        for expected in [
            "loopguard_requests_total",
            "loopguard_loop_detections_total",
            "loopguard_fragments_processed_total",
            "loopguard_detector_failures_total",
            "loopguard_callback_failures_total",
            "loopguard_analysis_duration_ms",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn test_label_values() {
        assert_eq!(Endpoint::Analyze.as_str(), "analyze");
        assert_eq!(Endpoint::Stream.as_str(), "stream");
        assert_eq!(DetectionMode::Complete.as_str(), "complete");
        assert_eq!(DetectionMode::Streaming.as_str(), "streaming");
        assert_eq!(CallbackKind::OnDetected.as_str(), "on_detected");
        assert_eq!(CallbackKind::CancelUpstream.as_str(), "cancel_upstream");
    }

    #[test]
    fn test_gather_produces_prometheus_text_format() {
        let metrics = Metrics::new().unwrap();
        metrics.record_request(Endpoint::Stream).unwrap();
        let output = metrics.gather().unwrap();

        assert!(output.contains("# HELP loopguard_requests_total"));
        assert!(output.contains("# TYPE loopguard_requests_total counter"));
        assert!(output.contains("endpoint=\"stream\""));
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = Metrics::new().unwrap();
        let cloned = metrics.clone();

        metrics.record_fragment();
        metrics.record_fragment();
        metrics.record_detection(DetectionMode::Streaming).unwrap();

        assert_eq!(cloned.fragments_processed_count(), 2);
        assert_eq!(cloned.detections_count(DetectionMode::Streaming), 1);
        assert_eq!(cloned.detections_count(DetectionMode::Complete), 0);
    }

    #[test]
    fn test_callback_failures_counted_per_callback() {
        let metrics = Metrics::new().unwrap();
        metrics
            .record_callback_failure(CallbackKind::CancelUpstream)
            .unwrap();
        assert_eq!(metrics.callback_failures_count(CallbackKind::CancelUpstream), 1);
        assert_eq!(metrics.callback_failures_count(CallbackKind::OnDetected), 0);
    }

    #[test]
    fn test_histogram_rejects_invalid_durations() {
        let metrics = Metrics::new().unwrap();

        let err = metrics.record_analysis_duration(f64::NAN).unwrap_err();
        assert!(err.to_string().contains("finite"));
        assert!(metrics.record_analysis_duration(f64::INFINITY).is_err());
        let err = metrics.record_analysis_duration(-1.0).unwrap_err();
        assert!(err.to_string().contains("non-negative"));

        assert!(metrics.record_analysis_duration(0.0).is_ok());
        assert!(metrics.record_analysis_duration(250.0).is_ok());
    }

    #[test]
    fn test_histogram_buckets_configured() {
        let metrics = Metrics::new().unwrap();
        metrics.record_analysis_duration(0.1).unwrap();
        metrics.record_analysis_duration(100.0).unwrap();

        let output = metrics.gather().unwrap();
        assert!(output.contains("le=\"0.1\""));
        assert!(output.contains("le=\"100\""));
        assert!(output.contains("le=\"+Inf\""));
    }

    #[test]
    fn test_concurrent_recording_loses_no_updates() {
        use std::thread;

        let metrics = Arc::new(Metrics::new().unwrap());
        let handles: Vec<_> = (0..50)
            .map(|_| {
                let m = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..20 {
                        m.record_fragment();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("Thread should not panic");
        }
        assert_eq!(metrics.fragments_processed_count(), 1000);
    }

    #[test]
    fn test_debug_does_not_dump_registry() {
        let metrics = Metrics::new().unwrap();
        metrics.record_fragment();
        let debug = format!("{metrics:?}");
        assert!(debug.contains("fragments_processed: 1"));
    }
}
