//! # SDI Playout
//!
//! Core of an SDI playout output: embeds independently timed audio streams
//! into one multiplexed block, encodes AFD and closed-caption ancillary
//! packets into the blanking lines, and schedules frames on a device whose
//! clock drifts from ours.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                          DECODE / FILTER PIPELINE                         │
//! │   Audio ES #1      Audio ES #2      Audio ES #n       Video + captions    │
//! └───────┬────────────────┬────────────────┬──────────────────┬─────────────┘
//!         │ push_audio     │                │                  │ push_video_frame
//!         ▼                ▼                ▼                  │
//! ┌──────────────────────────────────────────────────────┐     │
//! │              DeviceSession (session)                  │     │
//! │  ┌────────────────┐ ┌────────────────┐               │     │
//! │  │ SubframeBuffer │ │ SubframeBuffer │  ...          │     │
//! │  │ (audio::buffer)│ │                │               │     │
//! │  │  ByteQueue     │ │  ByteQueue     │               │     │
//! │  └───────▲────────┘ └───────▲────────┘               │     │
//! │          │ weak             │ weak                   │     │
//! │  ┌───────┴──────────────────┴─────────────────────┐  │     │
//! │  │  Shared (one lock)                              │  │     │
//! │  │   SlotAllocator (tracks)  ◀── MappingConfig     │  │     │
//! │  │   AudioMultiplex (audio::multiplex)             │  │     │
//! │  └───────────────────────┬─────────────────────────┘  │     │
//! │                          │ extract                    │     │
//! │                          ▼                            ▼     │
//! │                 ┌──────────────────────────────────────────┐│
//! │                 │ FrameScheduler (video::scheduler)         ││
//! │                 │  pacing · no-signal · v210 · drift slew   ││
//! │                 │  AFD / CDP packets (ancillary)            ││
//! │                 └──────────────────┬───────────────────────┘│
//! └────────────────────────────────────┼────────────────────────┘
//!                                      ▼
//!                     OutputDevice (device) ── SDI out
//! ```

pub mod ancillary;
pub mod audio;
pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod session;
pub mod tracks;
pub mod video;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use crate::clock::{ticks_from_ms, ClockTick};

    /// Rate of the embedded audio multiplex
    pub const MULTIPLEX_SAMPLE_RATE: u32 = 48000;

    /// Bytes of one s16 sample
    pub const BYTES_PER_SAMPLE: usize = 2;

    /// Widest multiplex, in AES pairs
    pub const MAX_AUDIO_PAIRS: usize = 8;

    /// Mono slots of the widest multiplex
    pub const MAX_AUDIO_SLOTS: usize = 2 * MAX_AUDIO_PAIRS;

    pub const DEFAULT_AUDIO_PAIRS: u8 = 4;

    /// Caption triplets carried by one CDP
    pub const MAX_CC_TRIPLETS: usize = 20;

    /// Pictures due later than this are paced
    pub const EARLY_THRESHOLD: ClockTick = ticks_from_ms(5);

    /// Longest single pacing sleep
    pub const MAX_PACING_SLEEP: ClockTick = ticks_from_ms(1000);

    /// Device clock divergence that triggers a drift correction
    pub const DRIFT_THRESHOLD: ClockTick = ticks_from_ms(400);

    /// Drift correction step
    pub const DRIFT_STEP: ClockTick = ticks_from_ms(50);

    pub const DEFAULT_NOSIGNAL_DELAY_SECS: i64 = 5;

    pub const DEFAULT_AFD_LINE: u32 = 16;

    pub const DEFAULT_CC_LINE: u32 = 15;

    /// AFD code 8: full frame
    pub const DEFAULT_AFD: u8 = 8;

    /// 16:9
    pub const DEFAULT_AR: u8 = 1;
}
