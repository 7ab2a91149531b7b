//! In-memory output device
//!
//! Stands in for playout hardware in dry runs and tests: frames are kept in
//! a bounded queue, audio is recorded, and the device clock is the shared
//! reference clock plus an adjustable skew.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crate::clock::{ticks_from_timescale, ticks_to_timescale, Clock, ClockTick};
use crate::device::{DeviceFrame, OutputDevice};
use crate::error::DeviceError;
use crate::video::mode::DisplayMode;
use crate::video::picture::PixelFormat;
use crate::video::v210;

/// Scheduled frames held before the device reports a full queue
pub const DEFAULT_QUEUE_DEPTH: usize = 16;

/// Audio writes kept for inspection
const AUDIO_LOG_DEPTH: usize = 256;

/// Highest blanking line a frame will allocate
const MAX_ANCILLARY_LINE: u32 = 42;

/// Frame allocated by [`MemoryDevice`]
#[derive(Debug, Clone)]
pub struct MemoryFrame {
    width: u32,
    height: u32,
    format: PixelFormat,
    row_bytes: usize,
    data: Vec<u8>,
    vanc: BTreeMap<u32, Vec<u8>>,
}

impl MemoryFrame {
    fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let row_bytes = match format {
            PixelFormat::Uyvy => width as usize * 2,
            PixelFormat::Yuv422p10 => v210::row_bytes(width),
        };
        Self {
            width,
            height,
            format,
            row_bytes,
            data: vec![0; row_bytes * height as usize],
            vanc: BTreeMap::new(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Blanking line contents, if the line was written
    pub fn ancillary_line(&self, line: u32) -> Option<&[u8]> {
        self.vanc.get(&line).map(Vec::as_slice)
    }

    /// Lines that were allocated
    pub fn ancillary_lines(&self) -> impl Iterator<Item = u32> + '_ {
        self.vanc.keys().copied()
    }
}

impl DeviceFrame for MemoryFrame {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn format(&self) -> PixelFormat {
        self.format
    }

    fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn ancillary_line_mut(&mut self, line: u32) -> Result<&mut [u8], DeviceError> {
        if line == 0 || line > MAX_ANCILLARY_LINE {
            return Err(DeviceError::AncillaryLine(line));
        }
        let row_bytes = self.row_bytes;
        Ok(self.vanc.entry(line).or_insert_with(|| vec![0; row_bytes]).as_mut_slice())
    }
}

/// A frame accepted by the device
#[derive(Debug, Clone)]
pub struct ScheduledFrame {
    pub frame: MemoryFrame,
    /// Presentation time in ticks
    pub timestamp: ClockTick,
    pub duration: ClockTick,
}

/// An accepted audio write
#[derive(Debug, Clone)]
pub struct ScheduledAudio {
    pub timestamp: ClockTick,
    pub frames: usize,
    pub samples: Vec<i16>,
}

/// Counters kept by [`MemoryDevice`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub frames_scheduled: u64,
    pub frames_rejected: u64,
    pub frames_completed: u64,
    pub audio_frames: u64,
}

pub struct MemoryDevice {
    clock: Arc<dyn Clock>,
    modes: Vec<DisplayMode>,
    video: Option<(DisplayMode, PixelFormat)>,
    audio: Option<(u32, usize)>,
    skew: ClockTick,
    playing: bool,
    playback_start: Option<ClockTick>,
    queue: VecDeque<ScheduledFrame>,
    queue_depth: usize,
    fail_frames: usize,
    audio_log: VecDeque<ScheduledAudio>,
    last_completed: Option<ScheduledFrame>,
    stats: DeviceStats,
}

impl MemoryDevice {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_modes(clock, DisplayMode::standard_modes())
    }

    pub fn with_modes(clock: Arc<dyn Clock>, modes: Vec<DisplayMode>) -> Self {
        Self {
            clock,
            modes,
            video: None,
            audio: None,
            skew: 0,
            playing: false,
            playback_start: None,
            queue: VecDeque::new(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
            fail_frames: 0,
            audio_log: VecDeque::new(),
            last_completed: None,
            stats: DeviceStats::default(),
        }
    }

    pub fn set_queue_depth(&mut self, depth: usize) {
        self.queue_depth = depth.max(1);
    }

    /// Offset the device clock from the reference clock
    pub fn set_clock_skew(&mut self, skew: ClockTick) {
        self.skew = skew;
    }

    /// Reject the next `n` scheduled frames
    pub fn fail_next_frames(&mut self, n: usize) {
        self.fail_frames = n;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn playback_start(&self) -> Option<ClockTick> {
        self.playback_start
    }

    pub fn video_mode(&self) -> Option<&DisplayMode> {
        self.video.as_ref().map(|(mode, _)| mode)
    }

    pub fn audio_config(&self) -> Option<(u32, usize)> {
        self.audio
    }

    pub fn queued_frames(&self) -> &VecDeque<ScheduledFrame> {
        &self.queue
    }

    /// Most recent frame whose display interval has ended
    pub fn last_completed(&self) -> Option<&ScheduledFrame> {
        self.last_completed.as_ref()
    }

    /// Most recent audio writes, oldest first
    pub fn audio_log(&self) -> &VecDeque<ScheduledAudio> {
        &self.audio_log
    }

    pub fn stats(&self) -> DeviceStats {
        self.stats
    }

    fn clock_ticks(&self) -> ClockTick {
        self.clock.now() + self.skew
    }

    /// Retire frames whose display interval has passed
    fn retire(&mut self) {
        let now = self.clock_ticks();
        while let Some(front) = self.queue.front() {
            if front.timestamp + front.duration > now {
                break;
            }
            self.last_completed = self.queue.pop_front();
            self.stats.frames_completed += 1;
        }
    }
}

impl OutputDevice for MemoryDevice {
    type Frame = MemoryFrame;

    fn display_modes(&self) -> Vec<DisplayMode> {
        self.modes.clone()
    }

    fn enable_video(&mut self, mode: &DisplayMode, format: PixelFormat) -> Result<(), DeviceError> {
        if !self.modes.contains(mode) {
            return Err(DeviceError::Playback(format!("mode {} not supported", mode)));
        }
        tracing::debug!("Video enabled: {} {:?}", mode, format);
        self.video = Some((mode.clone(), format));
        Ok(())
    }

    fn enable_audio(&mut self, sample_rate: u32, channels: usize) -> Result<(), DeviceError> {
        tracing::debug!("Audio enabled: {} Hz, {} channels", sample_rate, channels);
        self.audio = Some((sample_rate, channels));
        Ok(())
    }

    fn create_frame(&mut self, width: u32, height: u32, format: PixelFormat) -> Result<MemoryFrame, DeviceError> {
        if width == 0 || height == 0 {
            return Err(DeviceError::FrameAllocation(format!("{}x{}", width, height)));
        }
        Ok(MemoryFrame::new(width, height, format))
    }

    fn schedule_frame(
        &mut self,
        frame: MemoryFrame,
        timestamp: i64,
        duration: i64,
        timescale: i64,
    ) -> Result<(), DeviceError> {
        self.retire();
        if self.fail_frames > 0 {
            self.fail_frames -= 1;
            self.stats.frames_rejected += 1;
            return Err(DeviceError::Dropped("injected failure".into()));
        }
        if self.queue.len() >= self.queue_depth {
            self.stats.frames_rejected += 1;
            return Err(DeviceError::Dropped(format!("queue full ({} frames)", self.queue.len())));
        }
        self.queue.push_back(ScheduledFrame {
            frame,
            timestamp: ticks_from_timescale(timestamp, timescale),
            duration: ticks_from_timescale(duration, timescale),
        });
        self.stats.frames_scheduled += 1;
        Ok(())
    }

    fn schedule_audio(
        &mut self,
        samples: &[i16],
        frames: usize,
        timestamp: i64,
        timescale: i64,
    ) -> Result<usize, DeviceError> {
        let Some((_, channels)) = self.audio else {
            return Err(DeviceError::AudioRejected("audio not enabled".into()));
        };
        let frames = frames.min(samples.len() / channels.max(1));
        if self.audio_log.len() == AUDIO_LOG_DEPTH {
            self.audio_log.pop_front();
        }
        self.audio_log.push_back(ScheduledAudio {
            timestamp: ticks_from_timescale(timestamp, timescale),
            frames,
            samples: samples[..frames * channels].to_vec(),
        });
        self.stats.audio_frames += frames as u64;
        Ok(frames)
    }

    fn device_clock(&self, timescale: i64) -> Result<i64, DeviceError> {
        if timescale <= 0 {
            return Err(DeviceError::ClockUnavailable);
        }
        Ok(ticks_to_timescale(self.clock_ticks(), timescale))
    }

    fn start_playback(&mut self, start: ClockTick, _timescale: i64) -> Result<(), DeviceError> {
        if self.video.is_none() {
            return Err(DeviceError::Playback("video output not enabled".into()));
        }
        self.playing = true;
        self.playback_start = Some(start);
        Ok(())
    }

    fn stop_playback(&mut self) -> Result<(), DeviceError> {
        self.playing = false;
        self.playback_start = None;
        self.queue.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ticks_from_ms, ManualClock};

    fn device(clock: &Arc<ManualClock>) -> MemoryDevice {
        let clock: Arc<dyn Clock> = clock.clone();
        let mut dev = MemoryDevice::new(clock);
        let mode = dev.display_modes()[2].clone();
        dev.enable_video(&mode, PixelFormat::Yuv422p10).unwrap();
        dev
    }

    #[test]
    fn test_frame_layout() {
        let frame = MemoryFrame::new(1920, 2, PixelFormat::Yuv422p10);
        assert_eq!(frame.row_bytes(), 5120);
        assert_eq!(frame.bytes().len(), 10240);

        let mut frame = MemoryFrame::new(720, 1, PixelFormat::Uyvy);
        assert_eq!(frame.row_bytes(), 1440);
        assert_eq!(frame.ancillary_line_mut(9).unwrap().len(), 1440);
        assert!(frame.ancillary_line_mut(0).is_err());
        assert_eq!(frame.ancillary_lines().collect::<Vec<_>>(), vec![9]);
    }

    #[test]
    fn test_queue_full_and_retire() {
        let clock = Arc::new(ManualClock::new(0));
        let mut dev = device(&clock);
        dev.set_queue_depth(2);

        for i in 0..2 {
            let f = dev.create_frame(16, 2, PixelFormat::Uyvy).unwrap();
            dev.schedule_frame(f, i * 40, 40, 1000).unwrap();
        }
        let f = dev.create_frame(16, 2, PixelFormat::Uyvy).unwrap();
        assert!(matches!(dev.schedule_frame(f, 80, 40, 1000), Err(DeviceError::Dropped(_))));

        clock.set(ticks_from_ms(40));
        let f = dev.create_frame(16, 2, PixelFormat::Uyvy).unwrap();
        dev.schedule_frame(f, 80, 40, 1000).unwrap();
        assert_eq!(dev.last_completed().unwrap().timestamp, 0);
        assert_eq!(dev.stats().frames_rejected, 1);
        assert_eq!(dev.stats().frames_scheduled, 3);
    }

    #[test]
    fn test_injected_failures() {
        let clock = Arc::new(ManualClock::new(0));
        let mut dev = device(&clock);
        dev.fail_next_frames(1);
        let f = dev.create_frame(16, 2, PixelFormat::Uyvy).unwrap();
        assert!(dev.schedule_frame(f, 0, 40, 1000).is_err());
        let f = dev.create_frame(16, 2, PixelFormat::Uyvy).unwrap();
        assert!(dev.schedule_frame(f, 0, 40, 1000).is_ok());
    }

    #[test]
    fn test_clock_skew_and_audio() {
        let clock = Arc::new(ManualClock::new(ticks_from_ms(1000)));
        let mut dev = device(&clock);
        dev.set_clock_skew(-ticks_from_ms(500));
        assert_eq!(dev.device_clock(1000).unwrap(), 500);
        assert!(dev.device_clock(0).is_err());

        assert!(dev.schedule_audio(&[0; 8], 4, 0, 48000).is_err());
        dev.enable_audio(48000, 2).unwrap();
        assert_eq!(dev.schedule_audio(&[1; 8], 10, 48000, 48000).unwrap(), 4);
        assert_eq!(dev.audio_log()[0].timestamp, 1_000_000);
        assert_eq!(dev.stats().audio_frames, 4);
    }

    #[test]
    fn test_playback_needs_video() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        let mut dev = MemoryDevice::new(clock);
        assert!(dev.start_playback(0, 1000).is_err());
        let mode = dev.display_modes()[0].clone();
        dev.enable_video(&mode, PixelFormat::Uyvy).unwrap();
        dev.start_playback(5, 1000).unwrap();
        assert!(dev.is_playing());
        dev.stop_playback().unwrap();
        assert!(!dev.is_playing());
    }
}
