//! Loop detection engine
//!
//! Recognizes degenerate repetition in LLM output, either one fragment at a
//! time while a response streams, or over a complete response body.
//!
//! ```
//! use loopguard::loop_detection::{DetectionConfig, LoopDetector};
//!
//! let config = DetectionConfig::builder()
//!     .content_chunk_size(10)
//!     .content_loop_threshold(3)
//!     .max_history_length(200)
//!     .build()
//!     .unwrap();
//! let mut detector = LoopDetector::new(config).unwrap();
//!
//! let event = detector.analyze_complete(&"abcdefghij".repeat(3)).unwrap();
//! assert_eq!(event.pattern, "abcdefghij");
//! assert_eq!(event.repetition_count, 3);
//! ```

pub mod analyzer;
pub mod buffer;
pub mod config;
pub mod detector;
pub mod error;
pub mod event;
pub mod hasher;
pub mod stream;
pub mod structure;

pub use analyzer::PatternAnalyzer;
pub use buffer::ResponseBuffer;
pub use config::{DetectionConfig, DetectionConfigBuilder};
pub use detector::LoopDetector;
pub use error::LoopDetectionError;
pub use event::{AnalysisReport, DetectorStats, LoopDetectionEvent};
pub use hasher::{ContentDigest, ContentHasher};
pub use stream::{BoxError, StreamGuard, UpstreamCancel, guard_stream};
