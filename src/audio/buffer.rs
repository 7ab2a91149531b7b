//! Subframe-addressable PCM buffer
//!
//! Wraps a [`TimestampedByteQueue`] holding interleaved 16-bit little-endian
//! PCM and adds sample-rate arithmetic, so a consumer can address one
//! channel (subframe) at a time and reason about the buffered interval in
//! clock ticks.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::audio::fifo::{ByteSegment, TimestampedByteQueue};
use crate::clock::{ClockTick, CLOCK_FREQ};
use crate::constants::{BYTES_PER_SAMPLE, MULTIPLEX_SAMPLE_RATE};
use crate::error::AudioError;

/// Interleaved PCM buffer with per-subframe reads
#[derive(Debug)]
pub struct SubframeBuffer {
    fifo: TimestampedByteQueue,
    subframes: usize,
    sample_rate: u32,
    /// Reused de-interleave scratch space
    scratch: Vec<u8>,
}

/// Buffer shared between a producer and the multiplex
pub type SharedSubframeBuffer = Arc<Mutex<SubframeBuffer>>;

impl SubframeBuffer {
    /// Create a buffer for `subframes` interleaved channels at the
    /// multiplex rate.
    pub fn new(subframes: usize) -> Self {
        Self::with_rate(subframes, MULTIPLEX_SAMPLE_RATE)
    }

    pub fn with_rate(subframes: usize, sample_rate: u32) -> Self {
        Self {
            fifo: TimestampedByteQueue::new(),
            subframes: subframes.max(1),
            sample_rate,
            scratch: Vec::new(),
        }
    }

    pub fn shared(subframes: usize) -> SharedSubframeBuffer {
        Arc::new(Mutex::new(Self::new(subframes)))
    }

    pub fn subframes(&self) -> usize {
        self.subframes
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Queue a block of interleaved PCM starting at `timestamp`
    pub fn push(&mut self, timestamp: ClockTick, data: impl Into<Bytes>) {
        self.fifo.push(ByteSegment::new(data, timestamp));
    }

    pub fn frames_to_bytes(&self, frames: usize) -> usize {
        frames * BYTES_PER_SAMPLE * self.subframes
    }

    pub fn bytes_to_frames(&self, bytes: usize) -> usize {
        bytes / (BYTES_PER_SAMPLE * self.subframes)
    }

    pub fn duration_of_frames(&self, frames: usize) -> ClockTick {
        (frames as i128 * CLOCK_FREQ as i128 / self.sample_rate as i128) as ClockTick
    }

    /// Whole frames that fit in `duration`; zero for non-positive durations
    pub fn frames_for_duration(&self, duration: ClockTick) -> usize {
        if duration <= 0 {
            return 0;
        }
        (duration as i128 * self.sample_rate as i128 / CLOCK_FREQ as i128) as usize
    }

    /// Whole frames buffered and not yet consumed
    pub fn available_frames(&self) -> usize {
        self.bytes_to_frames(self.fifo.remaining_bytes())
    }

    pub fn is_empty(&self) -> bool {
        self.available_frames() == 0
    }

    /// Time of the first unconsumed frame
    pub fn buffer_start(&self) -> Option<ClockTick> {
        self.fifo.head_timestamp().map(|head| {
            head + self.duration_of_frames(self.bytes_to_frames(self.fifo.head_consumed()))
        })
    }

    /// Time just past the last buffered frame
    pub fn buffer_end(&self) -> Option<ClockTick> {
        self.buffer_start()
            .map(|start| start + self.duration_of_frames(self.available_frames()))
    }

    /// Copy `frames` samples of `subframe` into `dst`, one sample every
    /// `dst_stride` entries starting at `dst[0]`.
    ///
    /// Returns the number of samples written, short when either the buffer
    /// or `dst` runs out.
    pub fn read(
        &mut self,
        dst: &mut [i16],
        frames: usize,
        subframe: usize,
        dst_stride: usize,
    ) -> Result<usize, AudioError> {
        if subframe >= self.subframes {
            return Err(AudioError::InvalidSubframe {
                index: subframe,
                count: self.subframes,
            });
        }
        let dst_stride = dst_stride.max(1);
        let fit = if dst.is_empty() {
            0
        } else {
            (dst.len() - 1) / dst_stride + 1
        };
        let frames = frames.min(self.available_frames()).min(fit);

        let bytes = self.frames_to_bytes(frames);
        self.scratch.resize(bytes, 0);
        let copied = self.fifo.peek_read(&mut self.scratch, 0, bytes);
        let frames = self.bytes_to_frames(copied);

        let frame_bytes = BYTES_PER_SAMPLE * self.subframes;
        for i in 0..frames {
            let src = i * frame_bytes + subframe * BYTES_PER_SAMPLE;
            dst[i * dst_stride] = i16::from_le_bytes([self.scratch[src], self.scratch[src + 1]]);
        }
        Ok(frames)
    }

    /// Consume `frames` whole frames
    pub fn forward_by(&mut self, frames: usize) -> usize {
        let bytes = self.frames_to_bytes(frames);
        let flushed = self.fifo.flush(bytes);
        self.bytes_to_frames(flushed)
    }

    /// Discard every whole frame that starts before `t`
    pub fn forward_to(&mut self, t: ClockTick) -> usize {
        match self.buffer_start() {
            Some(start) if t > start => self.forward_by(self.frames_for_duration(t - start)),
            _ => 0,
        }
    }

    pub fn clear(&mut self) {
        self.fifo.clear();
    }
}
