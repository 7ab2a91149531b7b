//! Stream-to-slot mapping for the embedded audio multiplex

pub mod manager;
pub mod mapping;

pub use manager::{AudioFormat, SlotAllocator, SlotIndex, SlotMapping, StreamId};
pub use mapping::{MappingConfig, MappingRule, SlotRequest};
