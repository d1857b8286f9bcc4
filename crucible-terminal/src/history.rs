//! Bounded scrollback buffer

use std::collections::VecDeque;

/// Byte ring holding the most recent PTY output up to a fixed capacity.
/// Late-joining subscribers replay this before live frames.
#[derive(Debug)]
pub(crate) struct HistoryRing {
    buf: VecDeque<u8>,
    capacity: usize,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity.min(64 * 1024)),
            capacity,
        }
    }

    /// Append a chunk, discarding the oldest bytes past capacity.
    pub fn push(&mut self, chunk: &[u8]) {
        if self.capacity == 0 {
            return;
        }
        if chunk.len() >= self.capacity {
            self.buf.clear();
            self.buf.extend(&chunk[chunk.len() - self.capacity..]);
            return;
        }
        let overflow = (self.buf.len() + chunk.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            self.buf.drain(..overflow);
        }
        self.buf.extend(chunk);
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.buf.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_most_recent_bytes() {
        let mut ring = HistoryRing::new(8);
        ring.push(b"abcdef");
        ring.push(b"ghij");
        assert_eq!(ring.snapshot(), b"cdefghij");
        assert_eq!(ring.len(), 8);
    }

    #[test]
    fn oversized_chunk_keeps_its_tail() {
        let mut ring = HistoryRing::new(4);
        ring.push(b"0123456789");
        assert_eq!(ring.snapshot(), b"6789");
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let mut ring = HistoryRing::new(0);
        ring.push(b"data");
        assert!(ring.snapshot().is_empty());
    }
}
