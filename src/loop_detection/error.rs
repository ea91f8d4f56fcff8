//! Errors produced by loop detection components.

use thiserror::Error;

/// Errors raised by the loop detection engine
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoopDetectionError {
    /// Configuration violates one of the detector invariants.
    ///
    /// Raised at construction time and by `LoopDetector::update_config`; the
    /// previous configuration stays in effect.
    #[error("Invalid loop detection configuration: {0}")]
    InvalidConfig(String),

    /// Analyzer reached a state that should be unreachable.
    ///
    /// The owning detector fails open: it logs the error and stops analyzing
    /// the current response instead of aborting it.
    #[error("Loop detection internal error: {0}")]
    Internal(String),
}
