//! Audio subsystem: timestamped PCM buffering and the embedded multiplex

pub mod buffer;
pub mod fifo;
pub mod multiplex;

pub use buffer::{SharedSubframeBuffer, SubframeBuffer};
pub use fifo::{ByteSegment, TimestampedByteQueue};
pub use multiplex::{AudioMultiplex, FrameSource, FrameWidth, MultiplexedBlock, SubFrameSource};
