//! Bounded window over the most recent response output.

use std::collections::VecDeque;

/// FIFO of the last `capacity` characters of a response
///
/// Used for reporting (`buffer_content` on events) and observability. The
/// pattern analyzer keeps its own history and never reads this buffer except
/// to copy it into a detection event.
#[derive(Debug, Clone)]
pub struct ResponseBuffer {
    chars: VecDeque<char>,
    capacity: usize,
}

impl ResponseBuffer {
    /// Create an empty buffer holding at most `capacity` characters
    pub fn new(capacity: usize) -> Self {
        Self {
            chars: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Append a fragment, evicting the oldest characters beyond capacity
    pub fn append(&mut self, fragment: &str) {
        let incoming = fragment.chars().count();
        if incoming >= self.capacity {
            self.chars.clear();
            self.chars
                .extend(fragment.chars().skip(incoming - self.capacity));
            return;
        }

        self.chars.extend(fragment.chars());
        let excess = self.chars.len().saturating_sub(self.capacity);
        self.chars.drain(..excess);
    }

    /// Current contents, oldest first
    pub fn content(&self) -> String {
        self.chars.iter().collect()
    }

    /// Number of characters held
    pub fn size(&self) -> usize {
        self.chars.len()
    }

    /// Maximum number of characters held
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn clear(&mut self) {
        self.chars.clear();
    }

    /// Change the capacity, keeping only the most recent characters on shrink
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        let excess = self.chars.len().saturating_sub(capacity);
        self.chars.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_within_capacity() {
        let mut buffer = ResponseBuffer::new(10);
        buffer.append("abc");
        buffer.append("def");
        assert_eq!(buffer.content(), "abcdef");
        assert_eq!(buffer.size(), 6);
    }

    #[test]
    fn test_append_evicts_oldest() {
        let mut buffer = ResponseBuffer::new(5);
        buffer.append("abc");
        buffer.append("defg");
        assert_eq!(buffer.content(), "cdefg");
        assert_eq!(buffer.size(), 5);
    }

    #[test]
    fn test_oversized_fragment_keeps_tail() {
        let mut buffer = ResponseBuffer::new(4);
        buffer.append("x");
        buffer.append("0123456789");
        assert_eq!(buffer.content(), "6789");
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        let mut buffer = ResponseBuffer::new(3);
        buffer.append("日本語テキスト");
        assert_eq!(buffer.content(), "キスト");
        assert_eq!(buffer.size(), 3);
    }

    #[test]
    fn test_shrink_keeps_most_recent() {
        let mut buffer = ResponseBuffer::new(10);
        buffer.append("0123456789");
        buffer.set_capacity(3);
        assert_eq!(buffer.content(), "789");
        assert_eq!(buffer.capacity(), 3);

        buffer.set_capacity(8);
        buffer.append("ab");
        assert_eq!(buffer.content(), "789ab");
    }

    #[test]
    fn test_clear() {
        let mut buffer = ResponseBuffer::new(10);
        buffer.append("abc");
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.content(), "");
    }
}
