//! Loop detection configuration.
//!
//! A [`DetectionConfig`] is immutable once built. All fields are private and
//! every construction path (builder, deserialization) runs [`DetectionConfig::validate`],
//! so an instance that violates the detector invariants cannot exist.

use super::error::LoopDetectionError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const DEFAULT_CHUNK_SIZE: usize = 50;
const DEFAULT_LOOP_THRESHOLD: usize = 10;
const DEFAULT_MAX_HISTORY_LENGTH: usize = 5000;
const DEFAULT_BUFFER_SIZE: usize = 16384;
const DEFAULT_WHITELIST: [&str; 5] = ["...", "---", "```", "***", "==="];

/// Tunable parameters for a loop detector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDetectionConfig")]
pub struct DetectionConfig {
    enabled: bool,
    /// Window length (characters) used for periodicity hashing
    content_chunk_size: usize,
    /// Minimum periodic recurrences of a window to declare a loop
    content_loop_threshold: usize,
    /// Cap on retained analyzer history (characters)
    max_history_length: usize,
    /// Capacity of the response buffer (characters)
    buffer_size: usize,
    /// Substrings that never trigger detection on their own
    whitelist: BTreeSet<String>,
}

/// Unvalidated mirror of [`DetectionConfig`] used during deserialization
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawDetectionConfig {
    enabled: bool,
    content_chunk_size: usize,
    content_loop_threshold: usize,
    max_history_length: usize,
    buffer_size: usize,
    whitelist: BTreeSet<String>,
}

impl Default for RawDetectionConfig {
    fn default() -> Self {
        let defaults = DetectionConfig::default();
        Self {
            enabled: defaults.enabled,
            content_chunk_size: defaults.content_chunk_size,
            content_loop_threshold: defaults.content_loop_threshold,
            max_history_length: defaults.max_history_length,
            buffer_size: defaults.buffer_size,
            whitelist: defaults.whitelist,
        }
    }
}

impl TryFrom<RawDetectionConfig> for DetectionConfig {
    type Error = LoopDetectionError;

    fn try_from(raw: RawDetectionConfig) -> Result<Self, Self::Error> {
        let config = Self {
            enabled: raw.enabled,
            content_chunk_size: raw.content_chunk_size,
            content_loop_threshold: raw.content_loop_threshold,
            max_history_length: raw.max_history_length,
            buffer_size: raw.buffer_size,
            whitelist: raw.whitelist,
        };
        config.validate()?;
        Ok(config)
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            content_chunk_size: DEFAULT_CHUNK_SIZE,
            content_loop_threshold: DEFAULT_LOOP_THRESHOLD,
            max_history_length: DEFAULT_MAX_HISTORY_LENGTH,
            buffer_size: DEFAULT_BUFFER_SIZE,
            whitelist: DEFAULT_WHITELIST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl DetectionConfig {
    /// Start building a configuration from the defaults
    pub fn builder() -> DetectionConfigBuilder {
        DetectionConfigBuilder::default()
    }

    /// Start a builder pre-filled with this configuration's values
    pub fn to_builder(&self) -> DetectionConfigBuilder {
        DetectionConfigBuilder {
            config: self.clone(),
        }
    }

    /// Whether detection is switched on
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Window length in characters
    pub fn content_chunk_size(&self) -> usize {
        self.content_chunk_size
    }

    /// Periodic recurrences required to declare a loop
    pub fn content_loop_threshold(&self) -> usize {
        self.content_loop_threshold
    }

    /// Maximum retained history in characters
    pub fn max_history_length(&self) -> usize {
        self.max_history_length
    }

    /// Response buffer capacity in characters
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Whitelisted tokens
    pub fn whitelist(&self) -> &BTreeSet<String> {
        &self.whitelist
    }

    /// Processed characters required before analysis starts
    pub fn min_content_length(&self) -> usize {
        self.content_chunk_size.saturating_mul(2)
    }

    /// Check the detector invariants
    ///
    /// # Errors
    ///
    /// Returns [`LoopDetectionError::InvalidConfig`] when the chunk size is zero,
    /// the threshold is below 2, the history cannot hold `threshold` windows,
    /// or the buffer capacity is zero. Values are never clamped.
    pub fn validate(&self) -> Result<(), LoopDetectionError> {
        if self.content_chunk_size < 1 {
            return Err(LoopDetectionError::InvalidConfig(
                "content_chunk_size must be at least 1".to_string(),
            ));
        }

        if self.content_loop_threshold < 2 {
            return Err(LoopDetectionError::InvalidConfig(format!(
                "content_loop_threshold must be at least 2, got {}",
                self.content_loop_threshold
            )));
        }

        let required = self
            .content_chunk_size
            .checked_mul(self.content_loop_threshold)
            .ok_or_else(|| {
                LoopDetectionError::InvalidConfig(format!(
                    "content_chunk_size ({}) * content_loop_threshold ({}) overflows",
                    self.content_chunk_size, self.content_loop_threshold
                ))
            })?;
        if self.max_history_length < required {
            return Err(LoopDetectionError::InvalidConfig(format!(
                "max_history_length ({}) must be at least content_chunk_size * content_loop_threshold ({}), \
                otherwise a loop is truncated before it can be observed",
                self.max_history_length, required
            )));
        }

        if self.buffer_size < 1 {
            return Err(LoopDetectionError::InvalidConfig(
                "buffer_size must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether a repeating window is benign according to the whitelist
    ///
    /// Both sides are trimmed and have whitespace runs collapsed. A window
    /// matches when it is empty after normalization, is contained in a token,
    /// or is made up solely of a token repeated at any alignment.
    pub fn is_whitelisted(&self, pattern: &str) -> bool {
        let pattern = normalize_whitespace(pattern);
        if pattern.is_empty() {
            return true;
        }

        self.whitelist.iter().any(|token| {
            let token = normalize_whitespace(token);
            if token.is_empty() {
                return false;
            }
            if token.contains(&pattern) {
                return true;
            }
            let token_len = token.chars().count();
            let pattern_len = pattern.chars().count();
            let copies = pattern_len / token_len + 2;
            token.repeat(copies).contains(&pattern)
        })
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Builder for [`DetectionConfig`]
#[derive(Debug, Clone, Default)]
pub struct DetectionConfigBuilder {
    config: DetectionConfig,
}

impl DetectionConfigBuilder {
    /// Toggle detection
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    /// Set the window length
    pub fn content_chunk_size(mut self, size: usize) -> Self {
        self.config.content_chunk_size = size;
        self
    }

    /// Set the repetition threshold
    pub fn content_loop_threshold(mut self, threshold: usize) -> Self {
        self.config.content_loop_threshold = threshold;
        self
    }

    /// Set the history cap
    pub fn max_history_length(mut self, length: usize) -> Self {
        self.config.max_history_length = length;
        self
    }

    /// Set the response buffer capacity
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    /// Replace the whitelist
    pub fn whitelist<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.whitelist = tokens.into_iter().map(Into::into).collect();
        self
    }

    /// Add one whitelisted token
    pub fn whitelist_token(mut self, token: impl Into<String>) -> Self {
        self.config.whitelist.insert(token.into());
        self
    }

    /// Validate and build
    ///
    /// # Errors
    ///
    /// Returns [`LoopDetectionError::InvalidConfig`] if any invariant is violated.
    pub fn build(self) -> Result<DetectionConfig, LoopDetectionError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
