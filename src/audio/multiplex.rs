//! Embedded audio multiplex
//!
//! Gathers independently timed PCM buffers into one interleaved block of
//! `2 * width` 16-bit subframes (AES pairs). Each output subframe slot is
//! bound weakly to one channel of one [`SubframeBuffer`]; a buffer that has
//! been dropped simply turns its slots silent.
//!
//! Extraction aligns every source on the earliest buffered timestamp: a
//! source starting later is written further into the block, so all slots of
//! one block cover the same interval.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

use crate::audio::buffer::{SharedSubframeBuffer, SubframeBuffer};
use crate::clock::{ClockTick, CLOCK_FREQ};
use crate::constants::{MAX_AUDIO_PAIRS, MULTIPLEX_SAMPLE_RATE};
use crate::error::AudioError;

/// Number of AES pairs carried by the multiplex
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameWidth {
    One = 1,
    Four = 4,
    Eight = 8,
}

impl FrameWidth {
    pub fn pairs(self) -> usize {
        self as usize
    }

    pub fn subframes(self) -> usize {
        2 * self.pairs()
    }
}

impl TryFrom<u8> for FrameWidth {
    type Error = AudioError;

    fn try_from(pairs: u8) -> Result<Self, Self::Error> {
        match pairs {
            1 => Ok(Self::One),
            4 => Ok(Self::Four),
            8 => Ok(Self::Eight),
            other => Err(AudioError::InvalidFrameWidth(other)),
        }
    }
}

/// One mono channel of a buffer, referenced without ownership
#[derive(Debug, Clone, Default)]
pub struct SubFrameSource {
    buffer: Option<Weak<Mutex<SubframeBuffer>>>,
    index: usize,
}

impl SubFrameSource {
    pub fn bound(buffer: &SharedSubframeBuffer, index: usize) -> Self {
        Self {
            buffer: Some(Arc::downgrade(buffer)),
            index,
        }
    }

    pub fn unbound() -> Self {
        Self::default()
    }

    /// Buffer channel this source reads
    pub fn index(&self) -> usize {
        self.index
    }

    /// The referenced buffer, if bound and still alive
    pub fn buffer(&self) -> Option<SharedSubframeBuffer> {
        self.buffer.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_available(&self) -> bool {
        self.buffer().is_some()
    }
}

/// An AES pair: two subframe sources
#[derive(Debug, Clone, Default)]
pub struct FrameSource {
    pub subframes: [SubFrameSource; 2],
}

impl FrameSource {
    /// Active unless both subframes are unbound or dead
    pub fn is_active(&self) -> bool {
        self.subframes.iter().any(SubFrameSource::is_available)
    }

    /// Earliest start among bound subframes holding data
    pub fn buffer_start(&self) -> Option<ClockTick> {
        self.subframes
            .iter()
            .filter_map(|s| s.buffer().and_then(|b| b.lock().buffer_start()))
            .min()
    }

    /// Frames available from every bound subframe; unbound ones don't gate
    pub fn available_frames(&self) -> Option<usize> {
        self.subframes
            .iter()
            .filter_map(|s| s.buffer().map(|b| b.lock().available_frames()))
            .min()
    }
}

/// A block of interleaved multiplexed audio
#[derive(Debug, Clone, PartialEq)]
pub struct MultiplexedBlock {
    /// Time of the first frame; `None` when no source held data
    pub timestamp: Option<ClockTick>,
    pub frames: usize,
    pub channels: usize,
    /// `frames * channels` interleaved samples
    pub samples: Vec<i16>,
}

impl MultiplexedBlock {
    pub fn silent(frames: usize, channels: usize, timestamp: Option<ClockTick>) -> Self {
        Self {
            timestamp,
            frames,
            channels,
            samples: vec![0; frames * channels],
        }
    }

    /// Samples of one channel, in order
    pub fn channel(&self, index: usize) -> impl Iterator<Item = i16> + '_ {
        self.samples
            .iter()
            .skip(index)
            .step_by(self.channels.max(1))
            .copied()
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

/// Fixed-width multiplex of weakly bound subframe sources
pub struct AudioMultiplex {
    width: FrameWidth,
    sources: Vec<FrameSource>,
    /// End time of the last extracted block
    cursor: Option<ClockTick>,
    sample_rate: u32,
}

impl AudioMultiplex {
    pub fn new(width: FrameWidth) -> Self {
        debug_assert!(width.pairs() <= MAX_AUDIO_PAIRS);
        Self {
            width,
            sources: vec![FrameSource::default(); width.pairs()],
            cursor: None,
            sample_rate: MULTIPLEX_SAMPLE_RATE,
        }
    }

    pub fn width(&self) -> FrameWidth {
        self.width
    }

    pub fn channels(&self) -> usize {
        self.width.subframes()
    }

    pub fn cursor(&self) -> Option<ClockTick> {
        self.cursor
    }

    fn check_slot(&self, slot: usize) -> Result<(), AudioError> {
        if slot >= self.channels() {
            return Err(AudioError::InvalidSlot {
                slot,
                width: self.channels(),
            });
        }
        Ok(())
    }

    /// Bind output `slot` to channel `index` of `buffer`
    pub fn set_subframe_source(
        &mut self,
        slot: usize,
        buffer: &SharedSubframeBuffer,
        index: usize,
    ) -> Result<(), AudioError> {
        self.check_slot(slot)?;
        let subframes = buffer.lock().subframes();
        if index >= subframes {
            return Err(AudioError::InvalidSubframe {
                index,
                count: subframes,
            });
        }
        self.sources[slot / 2].subframes[slot % 2] = SubFrameSource::bound(buffer, index);
        Ok(())
    }

    pub fn clear_subframe_source(&mut self, slot: usize) -> Result<(), AudioError> {
        self.check_slot(slot)?;
        self.sources[slot / 2].subframes[slot % 2] = SubFrameSource::unbound();
        Ok(())
    }

    pub fn source(&self, pair: usize) -> Option<&FrameSource> {
        self.sources.get(pair)
    }

    fn active_sources(&self) -> impl Iterator<Item = &FrameSource> {
        self.sources.iter().filter(|s| s.is_active())
    }

    /// Every distinct live buffer bound anywhere in the multiplex
    fn bound_buffers(&self) -> Vec<SharedSubframeBuffer> {
        let mut buffers: Vec<SharedSubframeBuffer> = Vec::new();
        for source in self.active_sources() {
            for buffer in source.subframes.iter().filter_map(SubFrameSource::buffer) {
                if !buffers.iter().any(|b| Arc::ptr_eq(b, &buffer)) {
                    buffers.push(buffer);
                }
            }
        }
        buffers
    }

    /// Earliest buffered timestamp over active sources with data
    pub fn buffer_start(&self) -> Option<ClockTick> {
        self.active_sources().filter_map(FrameSource::buffer_start).min()
    }

    /// Frames every active source can deliver
    pub fn available_samples(&self) -> usize {
        self.active_sources()
            .filter_map(FrameSource::available_frames)
            .min()
            .unwrap_or(0)
    }

    fn frames_between(&self, from: ClockTick, to: ClockTick) -> usize {
        if to <= from {
            return 0;
        }
        ((to - from) as i128 * self.sample_rate as i128 / CLOCK_FREQ as i128) as usize
    }

    fn duration_of_frames(&self, frames: usize) -> ClockTick {
        (frames as i128 * CLOCK_FREQ as i128 / self.sample_rate as i128) as ClockTick
    }

    /// Produce `frames` frames of multiplexed audio.
    ///
    /// Slots without a source, and the region before a late source's first
    /// frame, are silent. Every bound buffer is advanced by `frames` frames
    /// afterwards.
    pub fn extract(&mut self, frames: usize) -> MultiplexedBlock {
        let channels = self.channels();
        let buffers = self.bound_buffers();

        if let Some(cursor) = self.cursor {
            for buffer in &buffers {
                let dropped = buffer.lock().forward_to(cursor);
                if dropped > 0 {
                    tracing::debug!("Dropped {} late audio frames before {}", dropped, cursor);
                }
            }
        }

        let start = self.buffer_start();
        let mut block = MultiplexedBlock::silent(frames, channels, start.or(self.cursor));

        if let Some(start) = start {
            for (pair, source) in self.sources.iter().enumerate() {
                for (sub, subframe) in source.subframes.iter().enumerate() {
                    let Some(buffer) = subframe.buffer() else {
                        continue;
                    };
                    let mut buffer = buffer.lock();
                    // the two sides of a pair may be fed by different buffers
                    let Some(first) = buffer.buffer_start() else {
                        continue;
                    };
                    let skip = self.frames_between(start, first);
                    if skip >= frames {
                        continue;
                    }
                    let count = buffer.available_frames().min(frames - skip);

                    let slot = pair * 2 + sub;
                    let offset = skip * channels + slot;
                    if let Err(e) = buffer.read(&mut block.samples[offset..], count, subframe.index(), channels) {
                        tracing::warn!("Slot {} read failed: {}", slot, e);
                    }
                }
            }
            self.cursor = Some(start + self.duration_of_frames(frames));
        }

        for buffer in &buffers {
            buffer.lock().forward_by(frames);
        }
        block
    }

    /// Forget the output position, e.g. after a discontinuity
    pub fn reset(&mut self) {
        self.cursor = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ticks_from_ms;

    fn stereo_block(frames: usize, left: i16, right: i16) -> Vec<u8> {
        (0..frames)
            .flat_map(|_| [left.to_le_bytes(), right.to_le_bytes()])
            .flatten()
            .collect()
    }

    #[test]
    fn test_frame_width_parse() {
        assert_eq!(FrameWidth::try_from(4), Ok(FrameWidth::Four));
        assert_eq!(FrameWidth::Eight.subframes(), 16);
        assert_eq!(
            FrameWidth::try_from(3),
            Err(AudioError::InvalidFrameWidth(3))
        );
    }

    #[test]
    fn test_slot_bounds() {
        let mut mux = AudioMultiplex::new(FrameWidth::One);
        let buf = SubframeBuffer::shared(2);
        assert!(mux.set_subframe_source(1, &buf, 1).is_ok());
        assert_eq!(
            mux.set_subframe_source(2, &buf, 0),
            Err(AudioError::InvalidSlot { slot: 2, width: 2 })
        );
        assert_eq!(
            mux.set_subframe_source(0, &buf, 2),
            Err(AudioError::InvalidSubframe { index: 2, count: 2 })
        );
    }

    #[test]
    fn test_empty_multiplex_is_silent() {
        let mut mux = AudioMultiplex::new(FrameWidth::Four);
        assert_eq!(mux.buffer_start(), None);
        assert_eq!(mux.available_samples(), 0);
        let block = mux.extract(16);
        assert_eq!(block.timestamp, None);
        assert_eq!(block.samples.len(), 16 * 8);
        assert!(block.samples.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_staggered_sources_are_aligned() {
        let t = 1_000_000;
        let mut mux = AudioMultiplex::new(FrameWidth::Four);
        let buffers: Vec<_> = (0..3).map(|_| SubframeBuffer::shared(2)).collect();
        for (i, buffer) in buffers.iter().enumerate() {
            let v = (i as i16 + 1) * 100;
            buffer
                .lock()
                .push(t + ticks_from_ms(5 * i as i64), stereo_block(960, v, -v));
            mux.set_subframe_source(2 * i, buffer, 0).unwrap();
            mux.set_subframe_source(2 * i + 1, buffer, 1).unwrap();
        }

        assert_eq!(mux.buffer_start(), Some(t));
        assert_eq!(mux.available_samples(), 960);

        let block = mux.extract(960);
        assert_eq!(block.timestamp, Some(t));

        let first_data = |ch: usize| block.channel(ch).position(|s| s != 0);
        assert_eq!(first_data(0), Some(0));
        assert_eq!(first_data(2), Some(240));
        assert_eq!(first_data(4), Some(480));
        assert_eq!(first_data(6), None);

        let ch3: Vec<i16> = block.channel(3).collect();
        assert!(ch3[..240].iter().all(|&s| s == 0));
        assert!(ch3[240..].iter().all(|&s| s == -200));

        // every buffer advanced by the full request
        for buffer in &buffers {
            assert_eq!(buffer.lock().available_frames(), 0);
        }
        assert_eq!(mux.cursor(), Some(t + ticks_from_ms(20)));
    }

    #[test]
    fn test_source_too_far_ahead_is_skipped() {
        let mut mux = AudioMultiplex::new(FrameWidth::One);
        let early = SubframeBuffer::shared(1);
        let late = SubframeBuffer::shared(1);
        early.lock().push(0, vec![1u8; 2 * 480]);
        late.lock().push(ticks_from_ms(50), vec![1u8; 2 * 480]);
        mux.set_subframe_source(0, &early, 0).unwrap();
        mux.set_subframe_source(1, &late, 0).unwrap();

        let block = mux.extract(480);
        assert!(block.channel(1).all(|s| s == 0));
        assert!(block.channel(0).all(|s| s != 0));
    }

    #[test]
    fn test_pair_fed_by_two_buffers_keeps_each_offset() {
        let mut mux = AudioMultiplex::new(FrameWidth::One);
        let left = SubframeBuffer::shared(1);
        let right = SubframeBuffer::shared(1);
        left.lock().push(0, (0..960).flat_map(|_| 7i16.to_le_bytes()).collect::<Vec<_>>());
        right
            .lock()
            .push(ticks_from_ms(5), (0..960).flat_map(|_| 9i16.to_le_bytes()).collect::<Vec<_>>());
        mux.set_subframe_source(0, &left, 0).unwrap();
        mux.set_subframe_source(1, &right, 0).unwrap();

        let block = mux.extract(960);
        assert_eq!(block.timestamp, Some(0));
        assert!(block.channel(0).all(|s| s == 7));
        let right_samples: Vec<i16> = block.channel(1).collect();
        assert!(right_samples[..240].iter().all(|&s| s == 0));
        assert!(right_samples[240..].iter().all(|&s| s == 9));
    }

    #[test]
    fn test_constant_stagger_loses_skip_every_block() {
        let mut mux = AudioMultiplex::new(FrameWidth::One);
        let early = SubframeBuffer::shared(1);
        let late = SubframeBuffer::shared(1);
        early.lock().push(0, vec![1u8; 2 * 3840]);
        late.lock().push(ticks_from_ms(5), vec![1u8; 2 * 3840]);
        mux.set_subframe_source(0, &early, 0).unwrap();
        mux.set_subframe_source(1, &late, 0).unwrap();

        let mut emitted = [0usize; 2];
        for _ in 0..4 {
            let block = mux.extract(960);
            for (ch, total) in emitted.iter_mut().enumerate() {
                *total += block.channel(ch).filter(|&s| s != 0).count();
            }
        }
        assert_eq!(emitted, [3840, 4 * (960 - 240)]);
    }

    #[test]
    fn test_half_bound_pair_gates_on_bound_side() {
        let mut mux = AudioMultiplex::new(FrameWidth::One);
        let mono = SubframeBuffer::shared(1);
        mono.lock().push(0, vec![0u8; 2 * 100]);
        mux.set_subframe_source(0, &mono, 0).unwrap();

        assert!(mux.source(0).unwrap().is_active());
        assert_eq!(mux.available_samples(), 100);
    }

    #[test]
    fn test_dropped_buffer_becomes_silent() {
        let mut mux = AudioMultiplex::new(FrameWidth::One);
        let buffer = SubframeBuffer::shared(2);
        buffer.lock().push(0, stereo_block(10, 5, 5));
        mux.set_subframe_source(0, &buffer, 0).unwrap();
        mux.set_subframe_source(1, &buffer, 1).unwrap();
        drop(buffer);

        assert!(!mux.source(0).unwrap().is_active());
        assert_eq!(mux.available_samples(), 0);
        assert!(mux.extract(10).samples.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_late_data_is_discarded_by_cursor() {
        let mut mux = AudioMultiplex::new(FrameWidth::One);
        let buffer = SubframeBuffer::shared(2);
        buffer.lock().push(0, stereo_block(480, 1, 1));
        mux.set_subframe_source(0, &buffer, 0).unwrap();
        mux.set_subframe_source(1, &buffer, 1).unwrap();
        mux.extract(480);

        // arrives 5ms before the emitted end
        buffer
            .lock()
            .push(ticks_from_ms(5), stereo_block(480, 2, 2));
        let block = mux.extract(240);
        assert_eq!(block.timestamp, Some(ticks_from_ms(10)));
        assert!(block.channel(0).all(|s| s == 2));
    }
}
