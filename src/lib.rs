//! loopguard - loop detection for LLM API gateways
//!
//! Watches model output for degenerate repetition, either over a complete
//! response or fragment by fragment while it streams, and cancels streams
//! that have fallen into a loop. The engine lives in [`loop_detection`]; the
//! remaining modules expose it as an HTTP service and a CLI.

pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod loop_detection;
pub mod metrics;
pub mod middleware;
pub mod telemetry;
