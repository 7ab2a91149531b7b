//! Timestamped byte FIFO
//!
//! An ordered queue of byte segments, each tagged with the timestamp of its
//! first byte. Reads are non-destructive and may span segment boundaries;
//! consumption happens separately through [`TimestampedByteQueue::flush`],
//! which frees whole segments and remembers how far into the head segment
//! the consumer already is.

use bytes::Bytes;
use std::collections::VecDeque;

use crate::clock::ClockTick;

/// A run of bytes plus the timestamp of its first byte
#[derive(Debug, Clone)]
pub struct ByteSegment {
    pub data: Bytes,
    pub timestamp: ClockTick,
}

impl ByteSegment {
    pub fn new(data: impl Into<Bytes>, timestamp: ClockTick) -> Self {
        Self {
            data: data.into(),
            timestamp,
        }
    }
}

/// FIFO of timestamped byte segments
///
/// Invariant: `offset < segments[0].data.len()`, or the queue is empty and
/// `offset == 0`.
#[derive(Debug, Default)]
pub struct TimestampedByteQueue {
    segments: VecDeque<ByteSegment>,
    /// Bytes of the head segment already consumed
    offset: usize,
    /// Unconsumed bytes across all segments
    remaining: usize,
}

impl TimestampedByteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment. Empty segments carry no samples and are dropped.
    pub fn push(&mut self, segment: ByteSegment) {
        if segment.data.is_empty() {
            return;
        }
        self.remaining += segment.data.len();
        self.segments.push_back(segment);
    }

    /// Copy up to `count` bytes (bounded by `dst.len()`) into `dst`, after
    /// skipping `skip` unconsumed bytes. Returns the number of bytes copied,
    /// which is short when the queue runs out of data.
    pub fn peek_read(&self, dst: &mut [u8], skip: usize, count: usize) -> usize {
        let mut count = count.min(dst.len());
        let mut skip = skip + self.offset;
        let mut copied = 0;

        for segment in &self.segments {
            if count == 0 {
                break;
            }
            let len = segment.data.len();
            if skip >= len {
                skip -= len;
                continue;
            }
            let n = (len - skip).min(count);
            dst[copied..copied + n].copy_from_slice(&segment.data[skip..skip + n]);
            skip = 0;
            copied += n;
            count -= n;
        }
        copied
    }

    /// Consume `count` bytes from the head. Flushing past the end empties
    /// the queue. Returns the number of bytes actually consumed.
    pub fn flush(&mut self, count: usize) -> usize {
        let mut left = count;
        while left > 0 {
            let Some(head) = self.segments.front() else {
                break;
            };
            let head_left = head.data.len() - self.offset;
            if head_left <= left {
                left -= head_left;
                self.remaining -= head_left;
                self.segments.pop_front();
                self.offset = 0;
            } else {
                self.offset += left;
                self.remaining -= left;
                left = 0;
            }
        }
        count - left
    }

    /// Drop every segment
    pub fn clear(&mut self) {
        self.segments.clear();
        self.offset = 0;
        self.remaining = 0;
    }

    pub fn remaining_bytes(&self) -> usize {
        self.remaining
    }

    /// Unconsumed bytes left in the head segment
    pub fn head_segment_remaining(&self) -> usize {
        self.segments
            .front()
            .map(|s| s.data.len() - self.offset)
            .unwrap_or(0)
    }

    /// Bytes of the head segment consumed so far
    pub fn head_consumed(&self) -> usize {
        self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Timestamp of the head segment's first byte
    pub fn head_timestamp(&self) -> Option<ClockTick> {
        self.segments.front().map(|s| s.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn queue_of(parts: &[&[u8]]) -> TimestampedByteQueue {
        let mut q = TimestampedByteQueue::new();
        for (i, p) in parts.iter().enumerate() {
            q.push(ByteSegment::new(p.to_vec(), i as ClockTick * 1000));
        }
        q
    }

    #[test]
    fn test_peek_spans_segments() {
        let q = queue_of(&[b"abc", b"de", b"fghi"]);
        let mut dst = [0u8; 4];
        assert_eq!(q.peek_read(&mut dst, 2, 4), 4);
        assert_eq!(&dst, b"cdef");

        // skipping a whole segment and more
        let mut dst = [0u8; 8];
        assert_eq!(q.peek_read(&mut dst, 5, 8), 4);
        assert_eq!(&dst[..4], b"fghi");
    }

    #[test]
    fn test_peek_past_end_is_short() {
        let q = queue_of(&[b"abc"]);
        let mut dst = [0u8; 4];
        assert_eq!(q.peek_read(&mut dst, 3, 4), 0);
        assert_eq!(q.peek_read(&mut dst, 1, 4), 2);
    }

    #[test]
    fn test_flush_partial_head() {
        let mut q = queue_of(&[b"abc", b"de"]);
        assert_eq!(q.flush(2), 2);
        assert_eq!(q.head_consumed(), 2);
        assert_eq!(q.head_segment_remaining(), 1);
        assert_eq!(q.remaining_bytes(), 3);
        assert_eq!(q.head_timestamp(), Some(0));

        let mut dst = [0u8; 3];
        assert_eq!(q.peek_read(&mut dst, 0, 3), 3);
        assert_eq!(&dst, b"cde");

        assert_eq!(q.flush(1), 1);
        assert_eq!(q.head_consumed(), 0);
        assert_eq!(q.head_timestamp(), Some(1000));
    }

    #[test]
    fn test_flush_past_end_truncates() {
        let mut q = queue_of(&[b"abc", b"de"]);
        assert_eq!(q.flush(100), 5);
        assert!(q.is_empty());
        assert_eq!(q.remaining_bytes(), 0);
        assert_eq!(q.head_timestamp(), None);
        assert_eq!(q.flush(1), 0);
    }

    #[test]
    fn test_empty_segment_ignored() {
        let mut q = TimestampedByteQueue::new();
        q.push(ByteSegment::new(Vec::new(), 7));
        assert!(q.is_empty());
        assert_eq!(q.head_timestamp(), None);
    }

    proptest! {
        #[test]
        fn prop_flush_saturates(
            parts in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 0..8),
            flushes in proptest::collection::vec(0usize..100, 0..8),
        ) {
            let mut q = TimestampedByteQueue::new();
            for (i, p) in parts.iter().enumerate() {
                q.push(ByteSegment::new(p.clone(), i as ClockTick));
            }
            for n in flushes {
                let before = q.remaining_bytes();
                q.flush(n);
                prop_assert_eq!(q.remaining_bytes(), before.saturating_sub(n));
                prop_assert!(q.is_empty() || q.head_segment_remaining() > 0);
            }
        }

        #[test]
        fn prop_peek_is_idempotent_and_concatenates(
            parts in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 0..8),
            skip in 0usize..32,
        ) {
            let mut q = TimestampedByteQueue::new();
            for (i, p) in parts.iter().enumerate() {
                q.push(ByteSegment::new(p.clone(), i as ClockTick));
            }
            let all: Vec<u8> = parts.concat();

            let mut whole = vec![0u8; all.len()];
            prop_assert_eq!(q.peek_read(&mut whole, 0, all.len()), all.len());
            prop_assert_eq!(&whole, &all);

            let mut a = vec![0u8; 64];
            let mut b = vec![0u8; 64];
            let na = q.peek_read(&mut a, skip, 64);
            let nb = q.peek_read(&mut b, skip, 64);
            prop_assert_eq!(na, nb);
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(na, all.len().saturating_sub(skip).min(64));
            prop_assert_eq!(q.remaining_bytes(), all.len());
        }
    }
}
