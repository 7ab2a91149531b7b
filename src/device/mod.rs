//! Output device collaborator
//!
//! The hardware SDK sits behind [`OutputDevice`]. Frames are owned values:
//! a frame handed to [`OutputDevice::schedule_frame`] belongs to the device,
//! and a frame dropped on any error path is released by its `Drop`.

pub mod memory;

pub use memory::{MemoryDevice, MemoryFrame};

use std::fmt;
use std::str::FromStr;

use crate::clock::ClockTick;
use crate::error::DeviceError;
use crate::video::mode::DisplayMode;
use crate::video::picture::PixelFormat;

/// A video frame allocated by the device
pub trait DeviceFrame: Send {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    fn format(&self) -> PixelFormat;

    /// Bytes per picture row
    fn row_bytes(&self) -> usize;

    /// Picture memory, `row_bytes * height` bytes
    fn bytes_mut(&mut self) -> &mut [u8];

    /// Buffer of vertical blanking line `line`, allocated on first use
    fn ancillary_line_mut(&mut self, line: u32) -> Result<&mut [u8], DeviceError>;
}

/// Playout device
pub trait OutputDevice: Send {
    type Frame: DeviceFrame;

    /// Modes the device can output
    fn display_modes(&self) -> Vec<DisplayMode>;

    fn enable_video(&mut self, mode: &DisplayMode, format: PixelFormat) -> Result<(), DeviceError>;

    fn enable_audio(&mut self, sample_rate: u32, channels: usize) -> Result<(), DeviceError>;

    fn create_frame(&mut self, width: u32, height: u32, format: PixelFormat) -> Result<Self::Frame, DeviceError>;

    /// Queue `frame` for display at `timestamp` for `duration`, both in
    /// `timescale` units per second
    fn schedule_frame(
        &mut self,
        frame: Self::Frame,
        timestamp: i64,
        duration: i64,
        timescale: i64,
    ) -> Result<(), DeviceError>;

    /// Queue interleaved audio; returns the frames accepted
    fn schedule_audio(
        &mut self,
        samples: &[i16],
        frames: usize,
        timestamp: i64,
        timescale: i64,
    ) -> Result<usize, DeviceError>;

    /// Playout clock in `timescale` units
    fn device_clock(&self, timescale: i64) -> Result<i64, DeviceError>;

    fn start_playback(&mut self, start: ClockTick, timescale: i64) -> Result<(), DeviceError>;

    fn stop_playback(&mut self) -> Result<(), DeviceError>;
}

/// Physical video connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoConnection {
    #[default]
    Sdi,
    Hdmi,
    OpticalSdi,
    Component,
    Composite,
    SVideo,
}

impl FromStr for VideoConnection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sdi" => Ok(Self::Sdi),
            "hdmi" => Ok(Self::Hdmi),
            "opticalsdi" => Ok(Self::OpticalSdi),
            "component" => Ok(Self::Component),
            "composite" => Ok(Self::Composite),
            "svideo" => Ok(Self::SVideo),
            other => Err(format!("unknown video connection '{}'", other)),
        }
    }
}

impl fmt::Display for VideoConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sdi => "SDI",
            Self::Hdmi => "HDMI",
            Self::OpticalSdi => "Optical SDI",
            Self::Component => "Component",
            Self::Composite => "Composite",
            Self::SVideo => "S-video",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_names() {
        assert_eq!("opticalsdi".parse(), Ok(VideoConnection::OpticalSdi));
        assert!("scart".parse::<VideoConnection>().is_err());
        assert_eq!(VideoConnection::SVideo.to_string(), "S-video");
    }
}
