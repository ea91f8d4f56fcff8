//! Command-line interface for loopguard
//!
//! Provides argument parsing and subcommand handling for the loopguard binary.

use crate::error::{AppError, AppResult};
use crate::loop_detection::{AnalysisReport, DetectionConfig, LoopDetector};
use clap::{Parser, Subcommand};

/// Loop detection service for LLM API gateways
#[derive(Parser)]
#[command(name = "loopguard")]
#[command(version)]
#[command(about = "Loop detection service for LLM API gateways")]
#[command(
    long_about = "loopguard watches LLM output for degenerate repetition, either over a \
    complete response or fragment by fragment while it streams, and cancels looping streams."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,

    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Check a response body for loops and print the report as JSON
    Scan {
        /// File to read (reads stdin if not specified)
        #[arg(short, long)]
        input: Option<String>,

        /// Feed the text in fragments of this many characters, as a stream would
        #[arg(short, long)]
        fragment_size: Option<usize>,
    },
}

/// Run loop detection over `text`
///
/// Without `fragment_size` the whole text is analyzed at once. With it, the
/// text is split into fragments of that many characters and fed one at a time,
/// stopping at the first detected loop.
///
/// # Errors
///
/// Returns an error if `config` is invalid or `fragment_size` is zero.
pub fn scan(
    config: DetectionConfig,
    text: &str,
    fragment_size: Option<usize>,
) -> AppResult<AnalysisReport> {
    let mut detector = LoopDetector::new(config)?;

    let event = match fragment_size {
        None => detector.analyze_complete(text),
        Some(0) => {
            return Err(AppError::Validation(
                "--fragment-size must be greater than 0".to_string(),
            ));
        }
        Some(size) => {
            let chars: Vec<char> = text.chars().collect();
            chars
                .chunks(size)
                .map(|fragment| fragment.iter().collect::<String>())
                .find_map(|fragment| detector.process_chunk(&fragment))
        }
    };

    Ok(AnalysisReport::new(event, detector.stats()))
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# loopguard Configuration
# =======================
#
# Every section is optional; omitted values use the defaults shown here.

# ─────────────────────────────────────────────────────────────────────────────
# SERVER CONFIGURATION
# ─────────────────────────────────────────────────────────────────────────────

[server]
# IP address to bind to (0.0.0.0 for all interfaces, 127.0.0.1 for localhost only)
host = "0.0.0.0"

# Port to listen on
port = 3000

# ─────────────────────────────────────────────────────────────────────────────
# LOOP DETECTION
# ─────────────────────────────────────────────────────────────────────────────
#
# Each value can be overridden from the environment:
#   LOOP_DETECTION_ENABLED, LOOP_DETECTION_CHUNK_SIZE, LOOP_DETECTION_THRESHOLD,
#   LOOP_DETECTION_MAX_HISTORY, LOOP_DETECTION_BUFFER_SIZE,
#   LOOP_DETECTION_WHITELIST (comma-separated)

[loop_detection]
enabled = true

# Window length in characters hashed to find repeats
content_chunk_size = 50

# Periodic repetitions of a window needed to declare a loop (at least 2)
content_loop_threshold = 10

# Characters of output history kept for analysis
# (at least content_chunk_size * content_loop_threshold)
max_history_length = 5000

# Characters of recent output kept for diagnostics
buffer_size = 16384

# Repeating text made only of these tokens is never reported
whitelist = ["...", "---", "```", "***", "==="]

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# Log level: "trace", "debug", "info", "warn", "error"
log_level = "info"

# Prometheus metrics are always available at /metrics on the server port
"#
}
