//! Detection events and detector statistics.

use super::config::DetectionConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Characters of the pattern quoted in cancellation notices
const PATTERN_PREVIEW_CHARS: usize = 50;

/// A confirmed loop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopDetectionEvent {
    /// The repeating window
    pub pattern: String,
    /// Recorded occurrences of the window when the loop was confirmed
    pub repetition_count: usize,
    /// `repetition_count * pattern length`, in characters
    pub total_length: usize,
    /// Detection confidence in `[0, 1]`
    pub confidence: f64,
    /// Response buffer contents at detection time
    pub buffer_content: String,
    pub timestamp: DateTime<Utc>,
}

impl LoopDetectionEvent {
    /// Build an event for `pattern` seen `repetition_count` times
    pub fn new(pattern: String, repetition_count: usize, buffer_content: String) -> Self {
        let total_length = repetition_count.saturating_mul(pattern.chars().count());
        Self {
            pattern,
            repetition_count,
            total_length,
            confidence: 1.0,
            buffer_content,
            timestamp: Utc::now(),
        }
    }

    /// Pattern truncated for display, with an ellipsis when shortened
    pub fn pattern_preview(&self) -> String {
        let mut preview: String = self.pattern.chars().take(PATTERN_PREVIEW_CHARS).collect();
        if self.pattern.chars().count() > PATTERN_PREVIEW_CHARS {
            preview.push_str("...");
        }
        preview
    }

    /// Text of the synthetic fragment that ends a cancelled stream
    pub fn cancellation_message(&self) -> String {
        format!(
            "\n\n[Response cancelled: loop detected - pattern \"{}\" repeated {} times]",
            self.pattern_preview(),
            self.repetition_count
        )
    }
}

/// Read-only snapshot of a detector for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectorStats {
    pub enabled: bool,
    /// Characters processed since the last reset
    pub total_processed: usize,
    /// `total_processed` when the most recent loop was detected
    pub last_detection_position: Option<usize>,
    /// Characters currently held by the response buffer
    pub buffered: usize,
    pub config: DetectionConfig,
}

/// Outcome of analyzing one response, as reported by the API and the CLI
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub loop_detected: bool,
    pub event: Option<LoopDetectionEvent>,
    pub stats: DetectorStats,
}

impl AnalysisReport {
    pub fn new(event: Option<LoopDetectionEvent>, stats: DetectorStats) -> Self {
        Self {
            loop_detected: event.is_some(),
            event,
            stats,
        }
    }
}
