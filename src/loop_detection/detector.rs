//! Per-response loop detector.
//!
//! One [`LoopDetector`] is created for each in-flight response and dropped when
//! the response completes. It is driven synchronously, one fragment at a time,
//! and is never shared between concurrent responses.

use super::analyzer::PatternAnalyzer;
use super::buffer::ResponseBuffer;
use super::config::DetectionConfig;
use super::error::LoopDetectionError;
use super::event::{DetectorStats, LoopDetectionEvent};
use crate::metrics::Metrics;
use tracing::{debug, error, warn};

/// Feed-a-fragment, get-an-event-or-nothing loop detector
#[derive(Debug, Clone)]
pub struct LoopDetector {
    config: DetectionConfig,
    enabled: bool,
    analyzer: PatternAnalyzer,
    buffer: ResponseBuffer,
    /// Output received before the minimum content floor was reached
    pending: String,
    total_processed: usize,
    last_detection_position: Option<usize>,
    metrics: Option<Metrics>,
}

impl LoopDetector {
    /// Create a detector for one response
    ///
    /// # Errors
    ///
    /// Returns [`LoopDetectionError::InvalidConfig`] if the configuration
    /// violates the detector invariants.
    pub fn new(config: DetectionConfig) -> Result<Self, LoopDetectionError> {
        config.validate()?;
        Ok(Self {
            enabled: config.enabled(),
            analyzer: PatternAnalyzer::new(config.clone()),
            buffer: ResponseBuffer::new(config.buffer_size()),
            pending: String::new(),
            total_processed: 0,
            last_detection_position: None,
            metrics: None,
            config,
        })
    }

    /// Report fragment counts and internal failures to `metrics`
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Process the next fragment of output
    ///
    /// Returns `None` when disabled, for empty fragments, and while fewer than
    /// [`DetectionConfig::min_content_length`] characters have been seen. Output
    /// held back by that floor is analyzed together with the fragment that
    /// crosses it.
    pub fn process_chunk(&mut self, fragment: &str) -> Option<LoopDetectionEvent> {
        if !self.enabled || fragment.is_empty() {
            return None;
        }

        self.buffer.append(fragment);
        self.total_processed += fragment.chars().count();
        if let Some(metrics) = &self.metrics {
            metrics.record_fragment();
        }

        if self.total_processed < self.config.min_content_length() {
            self.pending.push_str(fragment);
            return None;
        }

        let result = if self.pending.is_empty() {
            self.analyzer.analyze(fragment, &self.buffer)
        } else {
            let mut held = std::mem::take(&mut self.pending);
            held.push_str(fragment);
            self.analyzer.analyze(&held, &self.buffer)
        };

        match result {
            Ok(Some(event)) => {
                self.last_detection_position = Some(self.total_processed);
                warn!(
                    pattern = %event.pattern_preview(),
                    repetition_count = event.repetition_count,
                    total_length = event.total_length,
                    position = self.total_processed,
                    "Loop detected in response output"
                );
                Some(event)
            }
            Ok(None) => None,
            Err(e) => {
                error!(
                    error = %e,
                    total_processed = self.total_processed,
                    "Loop analysis failed, disabling detection for this response"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_detector_failure();
                }
                self.enabled = false;
                None
            }
        }
    }

    /// Analyze a complete (non-streaming) response body
    ///
    /// Resets the detector first. Must not be interleaved with streaming use
    /// of the same instance.
    pub fn analyze_complete(&mut self, text: &str) -> Option<LoopDetectionEvent> {
        self.reset();
        self.process_chunk(text)
    }

    /// Clear all analysis state, keeping configuration and the enabled flag
    pub fn reset(&mut self) {
        self.analyzer.reset();
        self.buffer.clear();
        self.pending.clear();
        self.total_processed = 0;
        self.last_detection_position = None;
    }

    /// Resume analysis; accumulated state is kept
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Stop analysis; accumulated state is kept
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Replace the configuration
    ///
    /// The detector adopts the new `enabled` flag, shrinks the response buffer
    /// to the new capacity (keeping the most recent output) and reconfigures
    /// the analyzer.
    ///
    /// # Errors
    ///
    /// Returns [`LoopDetectionError::InvalidConfig`] and leaves the detector
    /// untouched if `config` is invalid.
    pub fn update_config(&mut self, config: DetectionConfig) -> Result<(), LoopDetectionError> {
        config.validate()?;

        debug!(
            enabled = config.enabled(),
            content_chunk_size = config.content_chunk_size(),
            content_loop_threshold = config.content_loop_threshold(),
            max_history_length = config.max_history_length(),
            buffer_size = config.buffer_size(),
            "Updating loop detection configuration"
        );

        if config.buffer_size() != self.buffer.capacity() {
            self.buffer.set_capacity(config.buffer_size());
        }
        self.analyzer.reconfigure(config.clone());
        self.enabled = config.enabled();
        self.config = config;
        Ok(())
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Current response buffer contents
    pub fn buffer_content(&self) -> String {
        self.buffer.content()
    }

    /// Characters of analyzer history currently retained
    pub fn history_len(&self) -> usize {
        self.analyzer.history_len()
    }

    /// Snapshot for diagnostics endpoints
    pub fn stats(&self) -> DetectorStats {
        DetectorStats {
            enabled: self.enabled,
            total_processed: self.total_processed,
            last_detection_position: self.last_detection_position,
            buffered: self.buffer.size(),
            config: self.config.clone(),
        }
    }
}
