//! Error types for the playout engine

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Slot error: {0}")]
    Slot(#[from] SlotError),

    #[error("Video error: {0}")]
    Video(#[from] VideoError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio buffering and multiplexing errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AudioError {
    #[error("Subframe {index} out of range for a {count}-subframe buffer")]
    InvalidSubframe { index: usize, count: usize },

    #[error("Slot {slot} outside multiplex of {width} subframes")]
    InvalidSlot { slot: usize, width: usize },

    #[error("Unsupported frame width: {0} pairs")]
    InvalidFrameWidth(u8),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),
}

/// Slot allocation errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SlotError {
    #[error("Stream already mapped: {0}")]
    AlreadyMapped(String),

    #[error("Slot {0} already in use")]
    SlotInUse(usize),

    #[error("Slot {slot} outside [0, {max})")]
    OutOfRange { slot: usize, max: usize },

    #[error("Not enough free slots: {requested} requested, {free} free")]
    Exhausted { requested: usize, free: usize },

    #[error("Empty slot request")]
    EmptyRequest,

    #[error("Stream not mapped: {0}")]
    NotMapped(String),

    #[error("Stream rejected by mapping policy: {0}")]
    Rejected(String),
}

/// Video path errors
#[derive(Error, Debug)]
pub enum VideoError {
    #[error("Scheduler is not configured")]
    NotConfigured,

    #[error("Scheduler already running")]
    AlreadyRunning,

    #[error("No compatible display mode for {width}x{height}")]
    NoDisplayMode { width: u32, height: u32 },

    #[error("Invalid display mode: {0}")]
    InvalidMode(String),

    #[error("Picture format mismatch: {0}")]
    FormatMismatch(String),
}

/// Errors reported by the output device collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Frame allocation failed: {0}")]
    FrameAllocation(String),

    #[error("No ancillary buffer for line {0}")]
    AncillaryLine(u32),

    #[error("Frame dropped: {0}")]
    Dropped(String),

    #[error("Audio schedule failed: {0}")]
    AudioRejected(String),

    #[error("Playback control failed: {0}")]
    Playback(String),

    #[error("Device clock unavailable")]
    ClockUnavailable,
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
