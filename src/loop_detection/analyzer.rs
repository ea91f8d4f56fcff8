//! Periodicity analysis over a rolling window of output.
//!
//! The analyzer keeps the trailing `max_history_length` characters of output
//! and an index from the digest of every `content_chunk_size` window to the
//! offsets where that window starts. A window that recurs `content_loop_threshold`
//! times with spacing in `[chunk, 2 * chunk]` is a loop.

use super::buffer::ResponseBuffer;
use super::config::DetectionConfig;
use super::error::LoopDetectionError;
use super::event::LoopDetectionEvent;
use super::hasher::{ContentDigest, ContentHasher};
use super::structure::{count_fences, detect_structure};
use std::collections::HashMap;
use tracing::debug;

/// Online loop analyzer, owned by a single detector
#[derive(Debug, Clone)]
pub struct PatternAnalyzer {
    config: DetectionConfig,
    history: Vec<char>,
    window_index: HashMap<ContentDigest, Vec<usize>>,
    next_window_offset: usize,
    in_code_block: bool,
}

impl PatternAnalyzer {
    pub fn new(config: DetectionConfig) -> Self {
        Self {
            config,
            history: Vec::new(),
            window_index: HashMap::new(),
            next_window_offset: 0,
            in_code_block: false,
        }
    }

    /// Analyze the next fragment of output
    ///
    /// `buffer` is only read when a loop is confirmed, to fill the event's
    /// `buffer_content`.
    ///
    /// # Errors
    ///
    /// Returns [`LoopDetectionError::Internal`] if a recorded window offset no
    /// longer lies inside the retained history.
    pub fn analyze(
        &mut self,
        fragment: &str,
        buffer: &ResponseBuffer,
    ) -> Result<Option<LoopDetectionEvent>, LoopDetectionError> {
        let fences = count_fences(fragment);
        if fences % 2 == 1 {
            self.in_code_block = !self.in_code_block;
        }

        if fences > 0 || self.in_code_block {
            debug!(
                in_code_block = self.in_code_block,
                fences, "Skipping loop analysis inside code block"
            );
            self.reset_tracking();
            return Ok(None);
        }

        if let Some(kind) = detect_structure(fragment) {
            debug!(
                structure = kind.as_str(),
                "Skipping loop analysis for structured content"
            );
            self.reset();
            return Ok(None);
        }

        self.history.extend(fragment.chars());
        self.truncate_history();
        self.scan(buffer)
    }

    /// Clear all state, including code block tracking
    pub fn reset(&mut self) {
        self.reset_tracking();
        self.in_code_block = false;
    }

    /// Clear history and window index but keep code block state
    pub fn reset_tracking(&mut self) {
        self.history.clear();
        self.window_index.clear();
        self.next_window_offset = 0;
    }

    /// Swap in a new configuration
    ///
    /// Offsets recorded for the old window length are meaningless for a new
    /// one, so a chunk size change clears tracking. Otherwise history is kept
    /// and trimmed to the new cap.
    pub fn reconfigure(&mut self, config: DetectionConfig) {
        let chunk_changed = config.content_chunk_size() != self.config.content_chunk_size();
        self.config = config;
        if chunk_changed {
            self.reset_tracking();
        } else {
            self.truncate_history();
        }
    }

    /// Characters of retained history
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn in_code_block(&self) -> bool {
        self.in_code_block
    }

    /// Distinct windows currently indexed
    pub fn tracked_windows(&self) -> usize {
        self.window_index.len()
    }

    #[cfg(test)]
    pub(crate) fn insert_window_offset(&mut self, digest: ContentDigest, offset: usize) {
        self.window_index.insert(digest, vec![offset]);
    }

    fn truncate_history(&mut self) {
        let max = self.config.max_history_length();
        if self.history.len() <= max {
            return;
        }

        let excess = self.history.len() - max;
        self.history.drain(..excess);

        self.window_index.retain(|_, offsets| {
            offsets.retain_mut(|offset| {
                if *offset >= excess {
                    *offset -= excess;
                    true
                } else {
                    false
                }
            });
            !offsets.is_empty()
        });

        self.next_window_offset = self.next_window_offset.saturating_sub(excess);
    }

    fn scan(
        &mut self,
        buffer: &ResponseBuffer,
    ) -> Result<Option<LoopDetectionEvent>, LoopDetectionError> {
        let chunk_size = self.config.content_chunk_size();

        while self.next_window_offset + chunk_size <= self.history.len() {
            let offset = self.next_window_offset;
            let event = self.check_window(offset, buffer)?;
            self.next_window_offset += 1;

            if let Some(event) = event {
                return Ok(Some(event));
            }
        }

        Ok(None)
    }

    fn window(&self, start: usize) -> Result<&[char], LoopDetectionError> {
        let end = start + self.config.content_chunk_size();
        self.history.get(start..end).ok_or_else(|| {
            LoopDetectionError::Internal(format!(
                "window {}..{} outside retained history of {} chars",
                start,
                end,
                self.history.len()
            ))
        })
    }

    fn check_window(
        &mut self,
        offset: usize,
        buffer: &ResponseBuffer,
    ) -> Result<Option<LoopDetectionEvent>, LoopDetectionError> {
        let threshold = self.config.content_loop_threshold();
        let chunk_size = self.config.content_chunk_size();

        let window = self.window(offset)?;
        let digest = ContentHasher::hash_chars(window);

        let first_offset = self
            .window_index
            .get(&digest)
            .and_then(|offsets| offsets.first().copied());
        if let Some(first_offset) = first_offset
            && self.window(first_offset)? != window
        {
            debug!(
                digest = %digest.short(),
                offset,
                first_offset,
                "Digest collision, window ignored"
            );
            return Ok(None);
        }

        let offsets = self.window_index.entry(digest).or_default();
        offsets.push(offset);

        let occurrences = offsets.len();
        if occurrences < threshold {
            return Ok(None);
        }

        let recent = &offsets[occurrences - threshold..];
        let periodic = is_periodic(recent, chunk_size);

        debug!(
            digest = %digest.short(),
            occurrences,
            threshold,
            periodic,
            "Window reached repetition threshold"
        );

        if !periodic {
            return Ok(None);
        }

        let pattern: String = self.window(offset)?.iter().collect();
        if self.config.is_whitelisted(&pattern) {
            debug!(
                pattern = %pattern,
                occurrences,
                "Periodic window matches whitelist, not reporting"
            );
            return Ok(None);
        }

        Ok(Some(LoopDetectionEvent::new(
            pattern,
            occurrences,
            buffer.content(),
        )))
    }
}

/// Spacing check over the most recent occurrences of a window
///
/// Every gap must lie in `[chunk_size, 2 * chunk_size]` and the mean gap
/// must not exceed `2 * chunk_size`.
fn is_periodic(offsets: &[usize], chunk_size: usize) -> bool {
    if offsets.len() < 2 {
        return false;
    }

    let max_gap = chunk_size.saturating_mul(2);
    let gaps: Vec<usize> = offsets
        .windows(2)
        .map(|pair| pair[1].saturating_sub(pair[0]))
        .collect();

    let all_in_range = gaps.iter().all(|gap| (chunk_size..=max_gap).contains(gap));
    let total: usize = gaps.iter().sum();

    all_in_range && total <= max_gap.saturating_mul(gaps.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATTERN: &str = "abcdefghij";

    fn config(chunk: usize, threshold: usize, history: usize) -> DetectionConfig {
        DetectionConfig::builder()
            .content_chunk_size(chunk)
            .content_loop_threshold(threshold)
            .max_history_length(history)
            .build()
            .expect("valid test config")
    }

    fn analyzer() -> PatternAnalyzer {
        PatternAnalyzer::new(config(10, 3, 200))
    }

    fn feed(analyzer: &mut PatternAnalyzer, fragment: &str) -> Option<LoopDetectionEvent> {
        let buffer = ResponseBuffer::new(1024);
        analyzer.analyze(fragment, &buffer).expect("analysis succeeds")
    }

    #[test]
    fn test_detects_exact_repetition_in_one_fragment() {
        let mut analyzer = analyzer();
        let event = feed(&mut analyzer, &PATTERN.repeat(3)).expect("loop detected");
        assert_eq!(event.pattern, PATTERN);
        assert_eq!(event.repetition_count, 3);
        assert_eq!(event.total_length, 30);
        assert_eq!(event.confidence, 1.0);
    }

    #[test]
    fn test_detects_repetition_char_by_char() {
        let mut analyzer = analyzer();
        let input = PATTERN.repeat(3);
        let total = input.chars().count();
        for (i, c) in input.chars().enumerate() {
            let result = feed(&mut analyzer, &c.to_string());
            if i + 1 < total {
                assert!(result.is_none(), "early detection at char {}", i);
            } else {
                let event = result.expect("loop detected on last char");
                assert_eq!(event.pattern, PATTERN);
                assert_eq!(event.repetition_count, 3);
            }
        }
    }

    #[test]
    fn test_below_threshold_is_not_a_loop() {
        let mut analyzer = analyzer();
        assert!(feed(&mut analyzer, &PATTERN.repeat(2)).is_none());
    }

    #[test]
    fn test_self_periodic_window_is_rejected() {
        // Every window of "aaaa..." recurs one character later, far below the chunk spacing.
        let mut analyzer = analyzer();
        assert!(feed(&mut analyzer, &"a".repeat(150)).is_none());
    }

    #[test]
    fn test_noise_up_to_chunk_size_still_detects() {
        let mut analyzer = analyzer();
        let input = format!("{PATTERN}0123456789").repeat(3);
        let event = feed(&mut analyzer, &input).expect("loop detected");
        assert_eq!(event.pattern, PATTERN);
        assert_eq!(event.repetition_count, 3);
    }

    #[test]
    fn test_noise_beyond_chunk_size_suppresses() {
        let mut analyzer = analyzer();
        let input = format!("{PATTERN}0123456789!").repeat(4);
        assert!(feed(&mut analyzer, &input).is_none());
    }

    #[test]
    fn test_sparse_recurrence_suppresses() {
        let mut analyzer = analyzer();
        let filler = "KLMNOPQRSTUVWXYZklmnopqrstuvwxyz";
        let input = format!("{PATTERN}{filler}").repeat(4);
        assert!(feed(&mut analyzer, &input).is_none());
    }

    #[test]
    fn test_whitelisted_pattern_is_not_reported() {
        let mut analyzer = PatternAnalyzer::new(
            config(10, 3, 200)
                .to_builder()
                .whitelist(["Thank you!"])
                .build()
                .unwrap(),
        );
        assert!(feed(&mut analyzer, &"Thank you!".repeat(6)).is_none());
    }

    #[test]
    fn test_code_block_content_is_ignored() {
        let mut analyzer = analyzer();
        assert!(feed(&mut analyzer, "```python\n").is_none());
        assert!(analyzer.in_code_block());
        for _ in 0..5 {
            assert!(feed(&mut analyzer, PATTERN).is_none());
        }
        assert_eq!(analyzer.history_len(), 0);

        assert!(feed(&mut analyzer, "```\n").is_none());
        assert!(!analyzer.in_code_block());

        let event = feed(&mut analyzer, &PATTERN.repeat(3)).expect("analysis resumes after fence");
        assert_eq!(event.pattern, PATTERN);
    }

    #[test]
    fn test_fragment_with_complete_fence_is_ignored() {
        let mut analyzer = analyzer();
        let fragment = format!("```{}```", PATTERN.repeat(5));
        assert!(feed(&mut analyzer, &fragment).is_none());
        assert!(!analyzer.in_code_block());
        assert_eq!(analyzer.history_len(), 0);
    }

    #[test]
    fn test_structure_resets_everything() {
        let mut analyzer = analyzer();
        feed(&mut analyzer, &PATTERN.repeat(2));
        assert!(analyzer.history_len() > 0);

        assert!(feed(&mut analyzer, "| col | col |\n").is_none());
        assert_eq!(analyzer.history_len(), 0);
        assert_eq!(analyzer.tracked_windows(), 0);

        // Two more repeats are not enough once the first two were discarded.
        assert!(feed(&mut analyzer, &PATTERN.repeat(2)).is_none());
    }

    #[test]
    fn test_reset_clears_code_block_flag() {
        let mut analyzer = analyzer();
        analyzer.in_code_block = true;
        analyzer.reset();
        assert!(!analyzer.in_code_block());
    }

    #[test]
    fn test_reset_tracking_keeps_code_block_flag() {
        let mut analyzer = analyzer();
        feed(&mut analyzer, "```");
        analyzer.reset_tracking();
        assert!(analyzer.in_code_block());
    }

    #[test]
    fn test_history_is_bounded_and_offsets_rebased() {
        let mut analyzer = PatternAnalyzer::new(config(10, 3, 40));
        let text: String = ('a'..='z').chain('A'..='Z').collect();
        for _ in 0..10 {
            feed(&mut analyzer, &text);
            assert!(analyzer.history_len() <= 40);
        }
        let max_offset = analyzer
            .window_index
            .values()
            .flatten()
            .copied()
            .max()
            .unwrap_or(0);
        assert!(max_offset + 10 <= analyzer.history_len());
        assert!(analyzer.next_window_offset <= analyzer.history_len());
    }

    #[test]
    fn test_loop_survives_truncation() {
        let mut analyzer = PatternAnalyzer::new(config(10, 3, 30));
        let prefix: String = ('A'..='Z').collect();
        assert!(feed(&mut analyzer, &prefix).is_none());
        let event = feed(&mut analyzer, &PATTERN.repeat(3)).expect("loop detected");
        assert_eq!(event.pattern, PATTERN);
        assert!(analyzer.history_len() <= 30);
    }

    #[test]
    fn test_digest_collision_is_not_counted() {
        let mut analyzer = analyzer();
        feed(&mut analyzer, PATTERN);

        // Pretend another window hashes to the same digest as offset 0.
        let other = "klmnopqrst";
        let digest = ContentHasher::hash(other);
        analyzer.window_index.insert(digest, vec![0]);

        let input = format!("{other}0{other}1{other}2{other}3");
        assert!(feed(&mut analyzer, &input).is_none());
        assert_eq!(analyzer.window_index.get(&digest), Some(&vec![0]));
    }

    #[test]
    fn test_stale_offset_is_an_internal_error() {
        let mut analyzer = analyzer();
        feed(&mut analyzer, PATTERN);
        let digest = ContentHasher::hash("klmnopqrst");
        analyzer.window_index.insert(digest, vec![500]);

        let buffer = ResponseBuffer::new(64);
        let err = analyzer.analyze("klmnopqrst", &buffer).unwrap_err();
        assert!(matches!(err, LoopDetectionError::Internal(_)));
    }

    #[test]
    fn test_event_carries_buffer_content() {
        let mut analyzer = analyzer();
        let mut buffer = ResponseBuffer::new(1024);
        buffer.append("earlier output ");
        buffer.append(&PATTERN.repeat(3));
        let event = analyzer
            .analyze(&PATTERN.repeat(3), &buffer)
            .unwrap()
            .expect("loop detected");
        assert_eq!(event.buffer_content, buffer.content());
    }

    #[test]
    fn test_reconfigure_chunk_size_clears_tracking() {
        let mut analyzer = analyzer();
        feed(&mut analyzer, &PATTERN.repeat(2));
        analyzer.reconfigure(config(5, 3, 200));
        assert_eq!(analyzer.history_len(), 0);
    }

    #[test]
    fn test_reconfigure_same_chunk_trims_history() {
        let mut analyzer = PatternAnalyzer::new(config(10, 3, 200));
        let text: String = ('a'..='z').chain('A'..='Z').collect();
        feed(&mut analyzer, &text);
        analyzer.reconfigure(config(10, 3, 30));
        assert_eq!(analyzer.history_len(), 30);
    }

    #[test]
    fn test_is_periodic_bounds() {
        assert!(is_periodic(&[0, 10, 20], 10));
        assert!(is_periodic(&[0, 20, 40], 10));
        assert!(!is_periodic(&[0, 9, 18], 10));
        assert!(!is_periodic(&[0, 21, 42], 10));
        assert!(!is_periodic(&[0, 10, 31], 10));
        assert!(!is_periodic(&[5], 10));
    }
}
