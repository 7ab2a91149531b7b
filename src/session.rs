//! Output session
//!
//! [`DeviceSession`] owns everything one output needs: the slot allocator
//! and the multiplex (behind a single lock, the only state shared between
//! producers and the output path), the device and the frame scheduler.
//!
//! Producers either call the direct API (`add_audio_stream`, `push_audio`,
//! `push_video_frame`) or open a stream handle and drive it through
//! [`MediaSink`]. Handles index an arena, so tearing a stream down never
//! leaves a dangling owner behind.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::audio::buffer::SubframeBuffer;
use crate::audio::multiplex::{AudioMultiplex, MultiplexedBlock};
use crate::clock::{Clock, ClockTick, CLOCK_FREQ};
use crate::config::OutputConfig;
use crate::constants::MULTIPLEX_SAMPLE_RATE;
use crate::device::OutputDevice;
use crate::error::{AudioError, Error, Result, SlotError, VideoError};
use crate::tracks::{AudioFormat, MappingConfig, SlotAllocator, SlotIndex, SlotRequest, StreamId};
use crate::video::mode::{match_display_mode, DisplayMode, FourCc, VideoFormat};
use crate::video::picture::Picture;
use crate::video::scheduler::{FrameOutcome, FrameScheduler, SchedulerState};

/// Handle of a stream opened on a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio(StreamId),
    Captions,
}

/// Format announced by a stream
#[derive(Debug, Clone, PartialEq)]
pub enum MediaFormat {
    Video(VideoFormat),
    Audio(AudioFormat),
    Captions,
}

/// One unit of decoded media
#[derive(Debug, Clone)]
pub enum MediaBuffer {
    Video(Picture),
    /// Interleaved s16le PCM
    Audio { timestamp: ClockTick, data: Bytes },
    /// cc_data triplets for the next video frame
    Captions(Vec<u8>),
}

/// Receiver of decoded media, one call per event
pub trait MediaSink {
    fn on_format_change(&self, handle: StreamHandle, format: &MediaFormat) -> Result<()>;

    fn on_buffer_ready(&self, handle: StreamHandle, buffer: MediaBuffer) -> Result<()>;
}

/// Counters of one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_scheduled: u64,
    pub frames_dropped: u64,
    pub nosignal_frames: u64,
    pub drift_corrections: u64,
    pub audio_frames: u64,
    pub audio_frames_dropped: u64,
}

struct Shared {
    allocator: SlotAllocator,
    multiplex: AudioMultiplex,
    mapping: MappingConfig,
}

struct StreamEntry {
    kind: StreamKind,
    format: Option<MediaFormat>,
}

pub struct DeviceSession<D: OutputDevice> {
    shared: Mutex<Shared>,
    device: Mutex<D>,
    scheduler: Mutex<FrameScheduler>,
    streams: Mutex<Vec<Option<StreamEntry>>>,
    pending_captions: Mutex<Option<Vec<u8>>>,
    cancel: Arc<AtomicBool>,
    forced_mode: Option<FourCc>,
    audio_enabled: bool,
    audio_frames: AtomicU64,
    audio_frames_dropped: AtomicU64,
}

impl<D: OutputDevice> DeviceSession<D> {
    pub fn new(device: D, clock: Arc<dyn Clock>, config: &OutputConfig) -> Result<Self> {
        config.validate()?;
        let width = config.frame_width()?;
        let scheduler = FrameScheduler::new(clock, config.scheduler_settings());
        let cancel = scheduler.cancel_handle();

        Ok(Self {
            shared: Mutex::new(Shared {
                allocator: SlotAllocator::new(width.subframes()),
                multiplex: AudioMultiplex::new(width),
                mapping: config.mapping(),
            }),
            device: Mutex::new(device),
            scheduler: Mutex::new(scheduler),
            streams: Mutex::new(Vec::new()),
            pending_captions: Mutex::new(None),
            cancel,
            forced_mode: config.forced_mode()?,
            audio_enabled: config.audio_enabled(),
            audio_frames: AtomicU64::new(0),
            audio_frames_dropped: AtomicU64::new(0),
        })
    }

    /// Run `f` with exclusive access to the device
    pub fn with_device<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        f(&mut self.device.lock())
    }

    /// Replace late pictures with `picture` instead of blanking them
    pub fn set_nosignal_picture(&self, picture: Option<Picture>) {
        self.scheduler.lock().set_nosignal_picture(picture);
    }

    /// Negotiate a display mode for `format` and enable the outputs
    pub fn open_video(&self, format: &VideoFormat) -> Result<DisplayMode> {
        let mut scheduler = self.scheduler.lock();
        let mut device = self.device.lock();

        let modes = device.display_modes();
        let mode = match_display_mode(&modes, format, self.forced_mode)
            .cloned()
            .ok_or(VideoError::NoDisplayMode {
                width: format.width,
                height: format.height,
            })?;
        scheduler.configure(&mut *device, &mode)?;

        if self.audio_enabled {
            let channels = self.shared.lock().multiplex.channels();
            device.enable_audio(MULTIPLEX_SAMPLE_RATE, channels)?;
        }
        Ok(mode)
    }

    pub fn video_state(&self) -> SchedulerState {
        self.scheduler.lock().state()
    }

    /// Map a stream onto multiplex slots following the mapping config.
    ///
    /// Returns the slots taken. Nothing changes when the stream is rejected.
    pub fn add_audio_stream(&self, id: StreamId, channels: usize) -> Result<Vec<SlotIndex>> {
        if channels == 0 {
            return Err(SlotError::EmptyRequest.into());
        }
        let mut guard = self.shared.lock();
        let shared = &mut *guard;

        let request = match shared.mapping.lookup(&id) {
            Some(rule) => rule.request.clone(),
            None if shared.mapping.accepts_unmapped() => SlotRequest::Auto,
            None => {
                tracing::info!("Rejecting unmapped audio stream {}", id);
                return Err(SlotError::Rejected(id.to_string()).into());
            }
        };

        let slots = match request {
            SlotRequest::Auto => shared.allocator.add_mapping_channels(id, channels)?,
            SlotRequest::Channels(n) => shared.allocator.add_mapping_channels(id, n)?,
            SlotRequest::Slots(slots) => {
                shared.allocator.add_mapping(id, &slots)?;
                slots
            }
        };

        let buffer = SubframeBuffer::shared(channels);
        for (index, &slot) in slots.iter().enumerate().take(channels) {
            if let Err(e) = shared.multiplex.set_subframe_source(slot, &buffer, index) {
                for &bound in &slots {
                    let _ = shared.multiplex.clear_subframe_source(bound);
                }
                shared.allocator.remove_mapping(&id);
                return Err(e.into());
            }
        }
        if slots.len() < channels {
            tracing::debug!("Stream {} has {} channels for {} slots", id, channels, slots.len());
        }

        shared.allocator.set_buffer(&id, buffer)?;
        shared
            .allocator
            .set_format(&id, AudioFormat::s16(MULTIPLEX_SAMPLE_RATE, channels as u16))?;
        tracing::info!("Audio stream {} on slots {:?}", id, slots);
        Ok(slots)
    }

    /// Release the slots of `id`. Serialised with extraction.
    pub fn remove_audio_stream(&self, id: &StreamId) -> Result<()> {
        let mut shared = self.shared.lock();
        let mapping = shared
            .allocator
            .remove_mapping(id)
            .ok_or_else(|| SlotError::NotMapped(id.to_string()))?;
        for &slot in &mapping.slots {
            let _ = shared.multiplex.clear_subframe_source(slot);
        }
        tracing::info!("Audio stream {} removed", id);
        Ok(())
    }

    /// Queue PCM for a mapped stream
    pub fn push_audio(&self, id: &StreamId, timestamp: ClockTick, data: impl Into<Bytes>) -> Result<()> {
        let buffer = self
            .shared
            .lock()
            .allocator
            .get_buffer(id)
            .ok_or_else(|| SlotError::NotMapped(id.to_string()))?;
        buffer.lock().push(timestamp, data);
        Ok(())
    }

    /// Send the audio gathered so far, then schedule `picture`
    pub fn push_video_frame(&self, picture: Picture, captions: Option<&[u8]>) -> Result<FrameOutcome> {
        self.flush_audio();
        let mut scheduler = self.scheduler.lock();
        let mut device = self.device.lock();
        Ok(scheduler.submit_frame(&mut *device, picture, captions)?)
    }

    /// Extract every frame all active sources can deliver and hand it to
    /// the device
    fn flush_audio(&self) {
        if !self.audio_enabled {
            return;
        }
        let block: MultiplexedBlock = {
            let mut shared = self.shared.lock();
            let frames = shared.multiplex.available_samples();
            if frames == 0 {
                return;
            }
            shared.multiplex.extract(frames)
        };
        let Some(timestamp) = block.timestamp else {
            return;
        };

        let drift = self.scheduler.lock().drift_offset();
        let result = self.device.lock().schedule_audio(
            &block.samples,
            block.frames,
            timestamp - drift,
            CLOCK_FREQ,
        );
        match result {
            Ok(written) => {
                if written < block.frames {
                    tracing::warn!("Audio short write: {} of {} frames", written, block.frames);
                    self.audio_frames_dropped
                        .fetch_add((block.frames - written) as u64, Ordering::Relaxed);
                }
                self.audio_frames.fetch_add(written as u64, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::warn!("Failed to schedule audio: {}", e);
                self.audio_frames_dropped
                    .fetch_add(block.frames as u64, Ordering::Relaxed);
            }
        }
    }

    /// Open a stream handle of `kind`
    pub fn open_stream(&self, kind: StreamKind) -> StreamHandle {
        let mut streams = self.streams.lock();
        let entry = Some(StreamEntry { kind, format: None });
        match streams.iter().position(Option::is_none) {
            Some(index) => {
                streams[index] = entry;
                StreamHandle(index)
            }
            None => {
                streams.push(entry);
                StreamHandle(streams.len() - 1)
            }
        }
    }

    /// Close a stream handle, releasing its slots
    pub fn close_stream(&self, handle: StreamHandle) {
        let entry = self.streams.lock().get_mut(handle.0).and_then(Option::take);
        if let Some(StreamEntry {
            kind: StreamKind::Audio(id),
            format: Some(_),
        }) = entry
        {
            if let Err(e) = self.remove_audio_stream(&id) {
                tracing::debug!("Closing stream {}: {}", id, e);
            }
        }
    }

    fn stream_kind(&self, handle: StreamHandle) -> Result<StreamKind> {
        self.streams
            .lock()
            .get(handle.0)
            .and_then(Option::as_ref)
            .map(|e| e.kind)
            .ok_or_else(|| Error::Config(format!("unknown stream handle {}", handle.0)))
    }

    /// Stop playback and forget the audio position
    pub fn close(&self) {
        self.cancel.store(true, Ordering::Relaxed);
        let mut scheduler = self.scheduler.lock();
        let mut device = self.device.lock();
        scheduler.close(&mut *device);
        self.shared.lock().multiplex.reset();
        tracing::info!("Output closed");
    }

    /// Interrupt a pacing sleep in progress
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn stats(&self) -> SessionStats {
        let video = self.scheduler.lock().stats();
        SessionStats {
            frames_scheduled: video.frames_scheduled,
            frames_dropped: video.frames_dropped,
            nosignal_frames: video.nosignal_frames,
            drift_corrections: video.drift_corrections,
            audio_frames: self.audio_frames.load(Ordering::Relaxed),
            audio_frames_dropped: self.audio_frames_dropped.load(Ordering::Relaxed),
        }
    }
}

impl<D: OutputDevice> MediaSink for DeviceSession<D> {
    fn on_format_change(&self, handle: StreamHandle, format: &MediaFormat) -> Result<()> {
        let kind = self.stream_kind(handle)?;
        match (kind, format) {
            (StreamKind::Audio(id), MediaFormat::Audio(fmt)) => {
                if fmt.sample_rate != MULTIPLEX_SAMPLE_RATE || fmt.bits_per_sample != 16 {
                    return Err(AudioError::UnsupportedFormat(format!(
                        "{} Hz {}-bit",
                        fmt.sample_rate, fmt.bits_per_sample
                    ))
                    .into());
                }
                let mapped = self.shared.lock().allocator.get(&id).is_some();
                if mapped {
                    self.remove_audio_stream(&id)?;
                }
                self.add_audio_stream(id, fmt.channels as usize)?;
            }
            (StreamKind::Video, MediaFormat::Video(fmt)) => {
                if self.video_state() == SchedulerState::Idle {
                    self.open_video(fmt)?;
                }
            }
            (StreamKind::Captions, MediaFormat::Captions) => {}
            (kind, format) => {
                return Err(Error::Config(format!("{:?} stream cannot take {:?}", kind, format)));
            }
        }
        if let Some(Some(entry)) = self.streams.lock().get_mut(handle.0) {
            entry.format = Some(format.clone());
        }
        Ok(())
    }

    fn on_buffer_ready(&self, handle: StreamHandle, buffer: MediaBuffer) -> Result<()> {
        match (self.stream_kind(handle)?, buffer) {
            (StreamKind::Audio(id), MediaBuffer::Audio { timestamp, data }) => {
                self.push_audio(&id, timestamp, data)
            }
            (StreamKind::Video, MediaBuffer::Video(picture)) => {
                let captions = self.pending_captions.lock().take();
                self.push_video_frame(picture, captions.as_deref())?;
                Ok(())
            }
            (StreamKind::Captions, MediaBuffer::Captions(cc)) => {
                self.pending_captions.lock().get_or_insert_with(Vec::new).extend(cc);
                Ok(())
            }
            (kind, _) => Err(Error::Config(format!("buffer does not match {:?} stream", kind))),
        }
    }
}
