//! Multiplex slot allocation
//!
//! Tracks which mono slots of the embedded audio multiplex belong to which
//! stream. The slot bitmap and the mapping table are updated together, and
//! every operation either fully succeeds or leaves both untouched.

use std::fmt;

use crate::audio::buffer::SharedSubframeBuffer;
use crate::constants::MAX_AUDIO_SLOTS;
use crate::error::SlotError;

/// Index of one mono slot in the multiplex
pub type SlotIndex = usize;

/// Identity of one logical audio stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId {
    pub es_id: i32,
    pub seq: Option<u32>,
}

impl StreamId {
    pub fn new(es_id: i32) -> Self {
        Self { es_id, seq: None }
    }

    pub fn with_seq(es_id: i32, seq: u32) -> Self {
        Self {
            es_id,
            seq: Some(seq),
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.seq {
            Some(seq) => write!(f, "#{}:{}", self.es_id, seq),
            None => write!(f, "#{}", self.es_id),
        }
    }
}

/// Negotiated PCM format of a mapped stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    pub fn s16(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample: 16,
        }
    }
}

/// Slots owned by one stream
#[derive(Debug, Clone)]
pub struct SlotMapping {
    pub id: StreamId,
    pub slots: Vec<SlotIndex>,
    /// Filled once the stream's format is negotiated
    pub format: Option<AudioFormat>,
    pub buffer: Option<SharedSubframeBuffer>,
}

/// Allocator for the mono slots of one multiplex
#[derive(Debug)]
pub struct SlotAllocator {
    /// Valid slots are `[0, max_slots)`
    max_slots: usize,
    /// Bit `n` set when slot `n` is owned
    used: u16,
    mappings: Vec<SlotMapping>,
}

impl SlotAllocator {
    pub fn new(max_slots: usize) -> Self {
        Self {
            max_slots: max_slots.min(MAX_AUDIO_SLOTS),
            used: 0,
            mappings: Vec::new(),
        }
    }

    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    pub fn is_used(&self, slot: SlotIndex) -> bool {
        slot < self.max_slots && self.used & (1 << slot) != 0
    }

    /// Unowned slots in ascending order
    pub fn free_slots(&self) -> Vec<SlotIndex> {
        (0..self.max_slots).filter(|&s| !self.is_used(s)).collect()
    }

    /// Reserve exactly `slots` for `id`
    pub fn add_mapping(&mut self, id: StreamId, slots: &[SlotIndex]) -> Result<(), SlotError> {
        if self.get(&id).is_some() {
            return Err(SlotError::AlreadyMapped(id.to_string()));
        }
        if slots.is_empty() {
            return Err(SlotError::EmptyRequest);
        }
        let mut mask = 0u16;
        for &slot in slots {
            if slot >= self.max_slots {
                return Err(SlotError::OutOfRange {
                    slot,
                    max: self.max_slots,
                });
            }
            if self.is_used(slot) || mask & (1 << slot) != 0 {
                return Err(SlotError::SlotInUse(slot));
            }
            mask |= 1 << slot;
        }

        self.used |= mask;
        self.mappings.push(SlotMapping {
            id,
            slots: slots.to_vec(),
            format: None,
            buffer: None,
        });
        tracing::debug!("Mapped stream {} to slots {:?}", id, slots);
        Ok(())
    }

    /// Reserve the first `channels` free slots for `id`
    pub fn add_mapping_channels(&mut self, id: StreamId, channels: usize) -> Result<Vec<SlotIndex>, SlotError> {
        if channels == 0 {
            return Err(SlotError::EmptyRequest);
        }
        let free = self.free_slots();
        if free.len() < channels {
            return Err(SlotError::Exhausted {
                requested: channels,
                free: free.len(),
            });
        }
        let slots = free[..channels].to_vec();
        self.add_mapping(id, &slots)?;
        Ok(slots)
    }

    /// Release the slots of `id`
    pub fn remove_mapping(&mut self, id: &StreamId) -> Option<SlotMapping> {
        let pos = self.mappings.iter().position(|m| m.id == *id)?;
        let mapping = self.mappings.remove(pos);
        for &slot in &mapping.slots {
            self.used &= !(1 << slot);
        }
        tracing::debug!("Released slots {:?} of stream {}", mapping.slots, id);
        Some(mapping)
    }

    pub fn get(&self, id: &StreamId) -> Option<&SlotMapping> {
        self.mappings.iter().find(|m| m.id == *id)
    }

    pub fn get_slots(&self, id: &StreamId) -> Option<&[SlotIndex]> {
        self.get(id).map(|m| m.slots.as_slice())
    }

    pub fn get_buffer(&self, id: &StreamId) -> Option<SharedSubframeBuffer> {
        self.get(id).and_then(|m| m.buffer.clone())
    }

    pub fn set_buffer(&mut self, id: &StreamId, buffer: SharedSubframeBuffer) -> Result<(), SlotError> {
        let mapping = self.get_mut(id)?;
        mapping.buffer = Some(buffer);
        Ok(())
    }

    pub fn set_format(&mut self, id: &StreamId, format: AudioFormat) -> Result<(), SlotError> {
        let mapping = self.get_mut(id)?;
        mapping.format = Some(format);
        Ok(())
    }

    fn get_mut(&mut self, id: &StreamId) -> Result<&mut SlotMapping, SlotError> {
        self.mappings
            .iter_mut()
            .find(|m| m.id == *id)
            .ok_or_else(|| SlotError::NotMapped(id.to_string()))
    }

    pub fn mappings(&self) -> &[SlotMapping] {
        &self.mappings
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}
