//! Frame scheduling
//!
//! ```text
//!   Idle ──configure──▶ Configured ──start / first frame──▶ Running
//!    ▲                                                        │
//!    └──────────────────────────close─────────────────────────┘
//! ```
//!
//! Each submitted picture is paced, replaced by a no-signal picture when it
//! is hopelessly late, rendered into a device frame (with AFD and caption
//! packets in its blanking lines when in 10-bit mode), shifted by the drift
//! offset and scheduled. After every scheduled frame the device clock is
//! compared with the reference clock and the drift offset slewed upward in
//! fixed steps while the device lags behind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::ancillary::{encode_afd, write_line, CdpEncoder, CdpFrameRate};
use crate::clock::{ticks_from_secs, ticks_from_timescale, Clock, ClockTick, CLOCK_FREQ};
use crate::constants::{
    DEFAULT_AFD, DEFAULT_AFD_LINE, DEFAULT_AR, DEFAULT_CC_LINE, DEFAULT_NOSIGNAL_DELAY_SECS, DRIFT_STEP,
    DRIFT_THRESHOLD, EARLY_THRESHOLD, MAX_PACING_SLEEP,
};
use crate::device::{DeviceFrame, OutputDevice};
use crate::error::VideoError;
use crate::video::mode::DisplayMode;
use crate::video::picture::{Picture, PictureData, PixelFormat};
use crate::video::v210;

/// Output tuning fixed for the lifetime of a scheduler
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub ten_bits: bool,
    /// Lateness after which a picture is replaced by the no-signal picture
    pub nosignal_threshold: ClockTick,
    /// Longest single pacing sleep
    pub max_pacing: ClockTick,
    pub afd: u8,
    pub ar: u8,
    pub afd_line: u32,
    pub cc_line: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            ten_bits: true,
            nosignal_threshold: ticks_from_secs(DEFAULT_NOSIGNAL_DELAY_SECS),
            max_pacing: MAX_PACING_SLEEP,
            afd: DEFAULT_AFD,
            ar: DEFAULT_AR,
            afd_line: DEFAULT_AFD_LINE,
            cc_line: DEFAULT_CC_LINE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Configured,
    Running,
}

/// What happened to a submitted picture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Scheduled at the given device timestamp
    Scheduled(ClockTick),
    /// Replaced by the no-signal picture, scheduled at the given timestamp
    NoSignal(ClockTick),
    /// Discarded; the pipeline carries on
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub frames_scheduled: u64,
    pub frames_dropped: u64,
    pub nosignal_frames: u64,
    pub drift_corrections: u64,
}

pub struct FrameScheduler {
    clock: Arc<dyn Clock>,
    cancel: Arc<AtomicBool>,
    settings: SchedulerSettings,
    state: SchedulerState,
    mode: Option<DisplayMode>,
    frame_duration: ClockTick,
    drift: ClockTick,
    last_scheduled: Option<ClockTick>,
    nosignal: Option<Picture>,
    cdp: CdpEncoder,
    cdp_rate: Option<CdpFrameRate>,
    stats: SchedulerStats,
}

impl FrameScheduler {
    pub fn new(clock: Arc<dyn Clock>, settings: SchedulerSettings) -> Self {
        Self {
            clock,
            cancel: Arc::new(AtomicBool::new(false)),
            settings,
            state: SchedulerState::Idle,
            mode: None,
            frame_duration: 0,
            drift: 0,
            last_scheduled: None,
            nosignal: None,
            cdp: CdpEncoder::new(),
            cdp_rate: None,
            stats: SchedulerStats::default(),
        }
    }

    /// Raising this flag cuts any pacing sleep short
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Picture shown in place of late frames; `None` blanks them instead
    pub fn set_nosignal_picture(&mut self, picture: Option<Picture>) {
        self.nosignal = picture;
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn mode(&self) -> Option<&DisplayMode> {
        self.mode.as_ref()
    }

    pub fn pixel_format(&self) -> PixelFormat {
        PixelFormat::for_depth(self.settings.ten_bits)
    }

    pub fn frame_duration(&self) -> ClockTick {
        self.frame_duration
    }

    pub fn drift_offset(&self) -> ClockTick {
        self.drift
    }

    pub fn last_scheduled(&self) -> Option<ClockTick> {
        self.last_scheduled
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Enable video output in `mode`
    pub fn configure<D: OutputDevice>(&mut self, device: &mut D, mode: &DisplayMode) -> Result<(), VideoError> {
        if self.state != SchedulerState::Idle {
            return Err(VideoError::AlreadyRunning);
        }
        if mode.frame_duration == 0 || mode.timescale == 0 {
            return Err(VideoError::InvalidMode(mode.id.to_string()));
        }
        device.enable_video(mode, self.pixel_format()).map_err(|e| {
            tracing::error!("Failed to enable video output: {}", e);
            VideoError::InvalidMode(mode.id.to_string())
        })?;

        self.frame_duration = mode.frame_duration_ticks();
        self.cdp_rate = mode.cdp_rate();
        if self.cdp_rate.is_none() {
            tracing::warn!("No caption rate code for {}, captions disabled", mode);
        }
        self.mode = Some(mode.clone());
        self.drift = 0;
        self.last_scheduled = None;
        self.cancel.store(false, Ordering::Relaxed);
        self.state = SchedulerState::Configured;
        tracing::info!("Video output configured: {}", mode);
        Ok(())
    }

    /// Start scheduled playback at the current time
    pub fn start<D: OutputDevice>(&mut self, device: &mut D) -> Result<(), VideoError> {
        match self.state {
            SchedulerState::Idle => return Err(VideoError::NotConfigured),
            SchedulerState::Running => return Err(VideoError::AlreadyRunning),
            SchedulerState::Configured => {}
        }
        let now = self.clock.now();
        if let Err(e) = device.start_playback(now, CLOCK_FREQ) {
            tracing::error!("Failed to start playback: {}", e);
            return Err(VideoError::NotConfigured);
        }
        self.state = SchedulerState::Running;
        tracing::debug!("Playback started at {}", now);
        Ok(())
    }

    /// Stop playback and return to `Idle`
    pub fn close<D: OutputDevice>(&mut self, device: &mut D) {
        if self.state == SchedulerState::Running {
            if let Err(e) = device.stop_playback() {
                tracing::warn!("Failed to stop playback: {}", e);
            }
        }
        self.state = SchedulerState::Idle;
        self.mode = None;
        self.drift = 0;
        self.last_scheduled = None;
        self.cdp = CdpEncoder::new();
    }

    /// Pace, render and schedule one picture.
    ///
    /// Device failures drop the frame and are only logged. `captions` holds
    /// CEA-708 cc_data triplets.
    pub fn submit_frame<D: OutputDevice>(
        &mut self,
        device: &mut D,
        mut picture: Picture,
        captions: Option<&[u8]>,
    ) -> Result<FrameOutcome, VideoError> {
        if self.state == SchedulerState::Configured {
            self.start(device)?;
        }
        let Some(mode) = self.mode.clone() else {
            return Err(VideoError::NotConfigured);
        };

        let mut now = self.clock.now();
        let early = picture.timestamp - now;
        if early > EARLY_THRESHOLD {
            self.clock
                .sleep(early.min(self.settings.max_pacing), &self.cancel);
            now = self.clock.now();
        }

        let nosignal = now - picture.timestamp > self.settings.nosignal_threshold;
        if nosignal {
            tracing::debug!("No signal, picture {} late by {}", picture.timestamp, now - picture.timestamp);
            match &self.nosignal {
                Some(placeholder) => picture = placeholder.clone(),
                None => picture.black_out(),
            }
            picture.timestamp = now;
            self.stats.nosignal_frames += 1;
        }

        let mut frame = match device.create_frame(mode.width, mode.height, self.pixel_format()) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Failed to create video frame: {}", e);
                return Ok(self.drop_frame());
            }
        };

        if let Err(e) = self.render(&mut frame, &picture, captions) {
            tracing::warn!("Dropping picture {}: {}", picture.timestamp, e);
            return Ok(self.drop_frame());
        }

        let timestamp = picture.timestamp - self.drift;
        if let Err(e) = device.schedule_frame(frame, timestamp, self.frame_duration, CLOCK_FREQ) {
            tracing::warn!("Dropped video frame {}: {}", timestamp, e);
            return Ok(self.drop_frame());
        }
        self.last_scheduled = Some(timestamp);
        self.stats.frames_scheduled += 1;

        self.check_drift(device);

        Ok(if nosignal {
            FrameOutcome::NoSignal(timestamp)
        } else {
            FrameOutcome::Scheduled(timestamp)
        })
    }

    fn drop_frame(&mut self) -> FrameOutcome {
        self.stats.frames_dropped += 1;
        FrameOutcome::Dropped
    }

    fn render<F: DeviceFrame>(&mut self, frame: &mut F, picture: &Picture, captions: Option<&[u8]>) -> Result<(), VideoError> {
        if picture.width != frame.width() || picture.height != frame.height() {
            return Err(VideoError::FormatMismatch(format!(
                "picture {}x{} for a {}x{} output",
                picture.width,
                picture.height,
                frame.width(),
                frame.height()
            )));
        }

        let stride = frame.row_bytes();
        match &picture.data {
            PictureData::Yuv422p10 { .. } if self.settings.ten_bits => {
                v210::pack_picture(picture, frame.bytes_mut(), stride)?;
                self.write_ancillary(frame, captions);
            }
            PictureData::Uyvy(bytes) if !self.settings.ten_bits => {
                picture.validate()?;
                let src_stride = picture.width as usize * 2;
                for (dst, src) in frame.bytes_mut().chunks_mut(stride).zip(bytes.chunks(src_stride)) {
                    let len = dst.len().min(src.len());
                    dst[..len].copy_from_slice(&src[..len]);
                }
            }
            _ => {
                return Err(VideoError::FormatMismatch(format!(
                    "{:?} picture on a {:?} output",
                    picture.format(),
                    self.pixel_format()
                )))
            }
        }
        Ok(())
    }

    fn write_ancillary<F: DeviceFrame>(&mut self, frame: &mut F, captions: Option<&[u8]>) {
        let afd = encode_afd(self.settings.afd, self.settings.ar);
        match frame.ancillary_line_mut(self.settings.afd_line) {
            Ok(line) => {
                write_line(&afd, line);
            }
            Err(e) => tracing::error!("Failed to get VBI line {}: {}", self.settings.afd_line, e),
        }

        let Some(cc) = captions.and_then(|cc| self.cdp.encode(cc, self.cdp_rate)) else {
            return;
        };
        match frame.ancillary_line_mut(self.settings.cc_line) {
            Ok(line) => {
                write_line(&cc, line);
            }
            Err(e) => tracing::error!("Failed to get VBI line {}: {}", self.settings.cc_line, e),
        }
    }

    /// Slew the drift offset by one step when the device clock lags behind.
    ///
    /// Only a lagging device clock is corrected; the offset never shrinks.
    fn check_drift<D: OutputDevice>(&mut self, device: &D) {
        let device_now = match device.device_clock(CLOCK_FREQ) {
            Ok(t) => ticks_from_timescale(t, CLOCK_FREQ),
            Err(e) => {
                tracing::debug!("Device clock unavailable: {}", e);
                return;
            }
        };
        let now = self.clock.now() - self.drift;
        if now - device_now > DRIFT_THRESHOLD {
            self.drift += DRIFT_STEP;
            self.stats.drift_corrections += 1;
            tracing::warn!("Delaying: offset now {}", self.drift);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ancillary::unpack_v210;
    use crate::clock::{ticks_from_ms, ManualClock};
    use crate::device::MemoryDevice;
    use crate::video::mode::FourCc;

    const T0: ClockTick = 100 * CLOCK_FREQ;

    fn small_mode() -> DisplayMode {
        DisplayMode::new("tiny", "test", 48, 4, 1000, 25000)
    }

    fn setup(ten_bits: bool) -> (Arc<ManualClock>, MemoryDevice, FrameScheduler) {
        let clock = Arc::new(ManualClock::new(T0));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let mut device = MemoryDevice::with_modes(dyn_clock.clone(), vec![small_mode()]);
        let settings = SchedulerSettings {
            ten_bits,
            ..SchedulerSettings::default()
        };
        let mut sched = FrameScheduler::new(dyn_clock, settings);
        sched.configure(&mut device, &small_mode()).unwrap();
        (clock, device, sched)
    }

    fn picture(ten_bits: bool, timestamp: ClockTick) -> Picture {
        let mut p = Picture::blank(PixelFormat::for_depth(ten_bits), 48, 4, timestamp);
        if let PictureData::Yuv422p10 { y, .. } = &mut p.data {
            y.fill(0x200);
        }
        p
    }

    #[test]
    fn test_state_machine() {
        let (_clock, mut device, mut sched) = setup(true);
        assert_eq!(sched.state(), SchedulerState::Configured);
        assert_eq!(sched.frame_duration(), 40_000);
        assert!(sched.configure(&mut device, &small_mode()).is_err());

        sched.submit_frame(&mut device, picture(true, T0), None).unwrap();
        assert_eq!(sched.state(), SchedulerState::Running);
        assert!(device.is_playing());

        sched.close(&mut device);
        assert_eq!(sched.state(), SchedulerState::Idle);
        assert!(!device.is_playing());
        assert!(matches!(
            sched.submit_frame(&mut device, picture(true, T0), None),
            Err(VideoError::NotConfigured)
        ));
    }

    #[test]
    fn test_nosignal_threshold() {
        let (clock, mut device, mut sched) = setup(true);
        let threshold = sched.settings().nosignal_threshold;
        let now = clock.now();

        let out = sched
            .submit_frame(&mut device, picture(true, now - threshold + 1), None)
            .unwrap();
        assert_eq!(out, FrameOutcome::Scheduled(now - threshold + 1));

        let out = sched
            .submit_frame(&mut device, picture(true, now - threshold - 1), None)
            .unwrap();
        assert_eq!(out, FrameOutcome::NoSignal(now));
        assert_eq!(sched.stats().nosignal_frames, 1);
        assert_eq!(sched.stats().frames_scheduled, 2);

        // blanked luma rather than the submitted mid-grey
        let frame = &device.queued_frames().back().unwrap().frame;
        let word = u32::from_le_bytes(frame.bytes()[..4].try_into().unwrap());
        assert_eq!((word >> 10) & 0x3ff, 0x040);
    }

    #[test]
    fn test_nosignal_placeholder() {
        let (clock, mut device, mut sched) = setup(false);
        let mut placeholder = Picture::blank(PixelFormat::Uyvy, 48, 4, 0);
        if let PictureData::Uyvy(bytes) = &mut placeholder.data {
            bytes.fill(0xeb);
        }
        sched.set_nosignal_picture(Some(placeholder));

        let late = clock.now() - ticks_from_secs(10);
        let out = sched.submit_frame(&mut device, picture(false, late), None).unwrap();
        assert_eq!(out, FrameOutcome::NoSignal(clock.now()));
        assert!(device.queued_frames()[0].frame.bytes().iter().all(|&b| b == 0xeb));
    }

    #[test]
    fn test_pacing_sleeps_until_due() {
        let (clock, mut device, mut sched) = setup(true);
        let due = clock.now() + ticks_from_ms(20);
        sched.submit_frame(&mut device, picture(true, due), None).unwrap();
        assert_eq!(clock.now(), due);

        // within the early threshold no sleep happens
        let start = clock.now();
        sched
            .submit_frame(&mut device, picture(true, start + ticks_from_ms(4)), None)
            .unwrap();
        assert_eq!(clock.now(), start);

        // cancelled pacing returns at once
        sched.cancel_handle().store(true, Ordering::Relaxed);
        sched
            .submit_frame(&mut device, picture(true, start + ticks_from_ms(500)), None)
            .unwrap();
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn test_drift_slews_one_step_per_frame() {
        let (clock, mut device, mut sched) = setup(true);
        device.set_clock_skew(-ticks_from_ms(500));

        sched.submit_frame(&mut device, picture(true, clock.now()), None).unwrap();
        assert_eq!(sched.drift_offset(), ticks_from_ms(50));

        let out = sched.submit_frame(&mut device, picture(true, clock.now()), None).unwrap();
        assert_eq!(out, FrameOutcome::Scheduled(clock.now() - ticks_from_ms(50)));
        assert_eq!(sched.drift_offset(), ticks_from_ms(100));

        // divergence now exactly 400ms: no further correction
        sched.submit_frame(&mut device, picture(true, clock.now()), None).unwrap();
        assert_eq!(sched.drift_offset(), ticks_from_ms(100));
        assert_eq!(sched.stats().drift_corrections, 2);
    }

    #[test]
    fn test_device_clock_ahead_leaves_offset_alone() {
        let (clock, mut device, mut sched) = setup(true);
        device.set_clock_skew(ticks_from_ms(500));

        for i in 0..20 {
            let due = T0 + i * sched.frame_duration();
            clock.set(due);
            sched.submit_frame(&mut device, picture(true, due), None).unwrap();
        }
        assert_eq!(sched.drift_offset(), 0);
        assert_eq!(sched.stats().drift_corrections, 0);
    }

    #[test]
    fn test_no_drift_when_in_step() {
        let (clock, mut device, mut sched) = setup(true);
        device.set_clock_skew(-ticks_from_ms(399));
        sched.submit_frame(&mut device, picture(true, clock.now()), None).unwrap();
        assert_eq!(sched.drift_offset(), 0);
    }

    #[test]
    fn test_dropped_frame_is_not_fatal() {
        let (clock, mut device, mut sched) = setup(true);
        device.fail_next_frames(1);
        let out = sched.submit_frame(&mut device, picture(true, clock.now()), None).unwrap();
        assert_eq!(out, FrameOutcome::Dropped);
        assert_eq!(sched.last_scheduled(), None);

        let out = sched.submit_frame(&mut device, picture(true, clock.now()), None).unwrap();
        assert!(matches!(out, FrameOutcome::Scheduled(_)));
        assert_eq!(sched.stats().frames_dropped, 1);

        let wrong = Picture::blank(PixelFormat::Uyvy, 48, 4, clock.now());
        let out = sched.submit_frame(&mut device, wrong, None).unwrap();
        assert_eq!(out, FrameOutcome::Dropped);
    }

    #[test]
    fn test_vanc_lines_written() {
        let (clock, mut device, mut sched) = setup(true);
        let cc = [0xfc, 0x94, 0x20, 0xfc, 0x94, 0xae];
        sched.submit_frame(&mut device, picture(true, clock.now()), Some(&cc)).unwrap();

        let frame = &device.queued_frames()[0].frame;
        let line = frame.ancillary_line(DEFAULT_AFD_LINE).unwrap();
        let packed: Vec<u32> = line
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        let words = unpack_v210(&packed[..12]);
        assert_eq!(&words[..3], &[0x000, 0x3ff, 0x3ff]);
        assert_eq!(words[3] & 0xff, 0x41);

        let line = frame.ancillary_line(DEFAULT_CC_LINE).unwrap();
        let did = u32::from_le_bytes(line[8..12].try_into().unwrap());
        assert_eq!((did >> 10) & 0xff, 0x61);

        // 8-bit output carries no blanking data
        let (clock, mut device, mut sched) = setup(false);
        sched.submit_frame(&mut device, picture(false, clock.now()), Some(&cc)).unwrap();
        assert_eq!(device.queued_frames()[0].frame.ancillary_lines().count(), 0);
        assert_eq!(FourCc::parse("tiny").unwrap(), device.video_mode().unwrap().id);
    }
}
