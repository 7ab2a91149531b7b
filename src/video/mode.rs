//! Display modes and mode negotiation

use std::fmt;

use crate::ancillary::cdp::{gcd, CdpFrameRate};
use crate::clock::{ticks_from_timescale, ClockTick};
use crate::error::VideoError;

/// Four-character display mode code, e.g. `Hp50`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    /// Parse up to four characters, space padded
    pub fn parse(s: &str) -> Result<Self, VideoError> {
        let bytes = s.as_bytes();
        if bytes.is_empty() || bytes.len() > 4 {
            return Err(VideoError::InvalidMode(s.to_string()));
        }
        let mut code = [b' '; 4];
        code[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(code))
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// An output mode offered by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMode {
    pub id: FourCc,
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Frame duration in `timescale` units
    pub frame_duration: u64,
    pub timescale: u64,
}

impl DisplayMode {
    pub fn new(id: &str, name: &str, width: u32, height: u32, frame_duration: u64, timescale: u64) -> Self {
        Self {
            id: FourCc::parse(id).unwrap_or(FourCc(*b"    ")),
            name: name.to_string(),
            width,
            height,
            frame_duration,
            timescale,
        }
    }

    pub fn frame_duration_ticks(&self) -> ClockTick {
        ticks_from_timescale(self.frame_duration as i64, self.timescale as i64)
    }

    /// Frame rate as a reduced fraction
    pub fn reduced_rate(&self) -> (u64, u64) {
        reduce(self.timescale, self.frame_duration)
    }

    pub fn cdp_rate(&self) -> Option<CdpFrameRate> {
        CdpFrameRate::from_timescale(self.timescale, self.frame_duration)
    }

    /// Usual set of SD and HD modes
    pub fn standard_modes() -> Vec<Self> {
        vec![
            Self::new("ntsc", "NTSC", 720, 486, 1001, 30000),
            Self::new("pal ", "PAL", 720, 576, 1000, 25000),
            Self::new("Hp25", "HD 1080p 25", 1920, 1080, 1000, 25000),
            Self::new("Hp29", "HD 1080p 29.97", 1920, 1080, 1001, 30000),
            Self::new("Hp30", "HD 1080p 30", 1920, 1080, 1000, 30000),
            Self::new("Hi50", "HD 1080i 50", 1920, 1080, 1000, 25000),
            Self::new("Hp50", "HD 1080p 50", 1920, 1080, 1000, 50000),
            Self::new("Hp59", "HD 1080p 59.94", 1920, 1080, 1001, 60000),
            Self::new("hp50", "HD 720p 50", 1280, 720, 1000, 50000),
            Self::new("hp59", "HD 720p 59.94", 1280, 720, 1001, 60000),
        ]
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' {} ({}x{}, {:.3} fps)",
            self.id,
            self.name,
            self.width,
            self.height,
            self.timescale as f64 / self.frame_duration.max(1) as f64
        )
    }
}

/// Incoming video geometry and rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub visible_width: u32,
    pub visible_height: u32,
    pub frame_rate: u64,
    pub frame_rate_base: u64,
}

impl VideoFormat {
    pub fn new(width: u32, height: u32, frame_rate: u64, frame_rate_base: u64) -> Self {
        Self {
            width,
            height,
            visible_width: width,
            visible_height: height,
            frame_rate,
            frame_rate_base,
        }
    }
}

fn reduce(num: u64, den: u64) -> (u64, u64) {
    if num == 0 || den == 0 {
        return (num, den);
    }
    let g = gcd(num, den);
    (num / g, den / g)
}

/// Pick the output mode for `format`.
///
/// A forced mode is taken as is when the device offers it. Otherwise the
/// first mode whose size matches (coded size, then visible size, then both
/// again at 1/16 precision) and whose reduced rate equals the stream's wins.
pub fn match_display_mode<'a>(
    modes: &'a [DisplayMode],
    format: &VideoFormat,
    forced: Option<FourCc>,
) -> Option<&'a DisplayMode> {
    if let Some(forced) = forced {
        tracing::debug!("Forced mode '{}'", forced);
        return modes.iter().find(|m| m.id == forced);
    }

    let stream_rate = reduce(format.frame_rate, format.frame_rate_base);
    let passes = [
        (format.width, format.height, 0),
        (format.visible_width, format.visible_height, 0),
        (format.width, format.height, 4),
        (format.visible_width, format.visible_height, 4),
    ];

    for (width, height, shift) in passes {
        let found = modes.iter().find(|m| {
            width >> shift == m.width >> shift
                && height >> shift == m.height >> shift
                && m.reduced_rate() == stream_rate
        });
        if let Some(mode) = found {
            tracing::info!("Mode {} matches incoming stream", mode);
            return Some(mode);
        }
    }
    None
}
