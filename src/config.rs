//! Output configuration
//!
//! Read from a TOML file; every field is optional and falls back to its
//! default.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ancillary::afd::{is_valid_afd, VALID_AFD_CODES};
use crate::audio::multiplex::FrameWidth;
use crate::clock::ticks_from_secs;
use crate::constants::*;
use crate::device::VideoConnection;
use crate::error::{Error, Result};
use crate::tracks::MappingConfig;
use crate::video::mode::FourCc;
use crate::video::scheduler::SchedulerSettings;

const CONFIG_FILE: &str = "playout.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output card number
    pub card_index: u32,
    /// Forced display mode FourCC, empty to match the stream
    pub mode: String,
    pub video_connection: VideoConnection,
    /// v210 with blanking data when set, 8-bit UYVY otherwise
    pub tenbits: bool,
    /// Seconds of lateness before the no-signal picture is shown
    pub nosignal_delay_secs: i64,
    pub afd_line: u32,
    pub cc_line: u32,
    pub afd: u8,
    /// Aspect ratio bit: 0 = 4:3, 1 = 16:9
    pub ar: u8,
    /// 0 disables audio output
    pub audio_rate: u32,
    /// Embedded stereo pairs: 1, 4 or 8
    pub audio_pairs: u8,
    /// Stream to slot mapping, e.g. `only;#1:0,1;#2:chans=2`
    pub audio_mapping: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            card_index: 0,
            mode: String::new(),
            video_connection: VideoConnection::Sdi,
            tenbits: true,
            nosignal_delay_secs: DEFAULT_NOSIGNAL_DELAY_SECS,
            afd_line: DEFAULT_AFD_LINE,
            cc_line: DEFAULT_CC_LINE,
            afd: DEFAULT_AFD,
            ar: DEFAULT_AR,
            audio_rate: MULTIPLEX_SAMPLE_RATE,
            audio_pairs: DEFAULT_AUDIO_PAIRS,
            audio_mapping: String::new(),
        }
    }
}

impl OutputConfig {
    /// Per-user config file location
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("tv", "sdi-playout", "sdi-playout")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        tracing::info!("Loaded config from {}", path.display());
        Self::from_toml(&text)
    }

    /// Load `path`, or the default file if it exists, or the defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                tracing::debug!("No config file, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !is_valid_afd(self.afd) {
            return Err(Error::Config(format!(
                "afd {} not one of {:?}",
                self.afd, VALID_AFD_CODES
            )));
        }
        if self.ar > 1 {
            return Err(Error::Config(format!("ar must be 0 or 1, got {}", self.ar)));
        }
        if FrameWidth::try_from(self.audio_pairs).is_err() {
            return Err(Error::Config(format!(
                "audio_pairs must be 1, 4 or 8, got {}",
                self.audio_pairs
            )));
        }
        if self.audio_rate != 0 && self.audio_rate != MULTIPLEX_SAMPLE_RATE {
            return Err(Error::Config(format!(
                "audio_rate must be 0 or {}, got {}",
                MULTIPLEX_SAMPLE_RATE, self.audio_rate
            )));
        }
        if self.nosignal_delay_secs < 0 {
            return Err(Error::Config("nosignal_delay_secs must not be negative".into()));
        }
        if self.afd_line == 0 || self.cc_line == 0 {
            return Err(Error::Config("ancillary lines start at 1".into()));
        }
        self.forced_mode()?;
        Ok(())
    }

    pub fn forced_mode(&self) -> Result<Option<FourCc>> {
        if self.mode.is_empty() {
            return Ok(None);
        }
        Ok(Some(FourCc::parse(&self.mode)?))
    }

    pub fn frame_width(&self) -> Result<FrameWidth> {
        FrameWidth::try_from(self.audio_pairs).map_err(Error::from)
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_rate != 0
    }

    pub fn mapping(&self) -> MappingConfig {
        MappingConfig::parse(&self.audio_mapping)
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            ten_bits: self.tenbits,
            nosignal_threshold: ticks_from_secs(self.nosignal_delay_secs),
            afd: self.afd,
            ar: self.ar,
            afd_line: self.afd_line,
            cc_line: self.cc_line,
            ..SchedulerSettings::default()
        }
    }
}
