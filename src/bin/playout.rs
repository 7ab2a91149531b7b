//! Playout dry run
//!
//! Drives a [`DeviceSession`] on the in-memory device with synthetic
//! audio tones and video pictures, logging output statistics until Ctrl+C.
//!
//! Usage: `playout [config.toml]`

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, RecvTimeoutError};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sdi_playout::{
    clock::{ticks_from_ms, Clock, ClockTick, SystemClock},
    config::OutputConfig,
    constants::MULTIPLEX_SAMPLE_RATE,
    device::MemoryDevice,
    session::DeviceSession,
    tracks::StreamId,
    video::{Picture, PixelFormat, VideoFormat},
};

/// Audio block pushed by each producer
const AUDIO_BLOCK_MS: i64 = 20;

/// Producers run this far ahead of the output
const PREROLL_MS: i64 = 200;

struct Tone {
    id: StreamId,
    channels: usize,
    frequency: f32,
}

fn tone_block(tone: &Tone, start_frame: u64, frames: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(frames * tone.channels * 2);
    for n in 0..frames {
        let t = (start_frame + n as u64) as f32 / MULTIPLEX_SAMPLE_RATE as f32;
        let sample = ((t * tone.frequency * std::f32::consts::TAU).sin() * 8000.0) as i16;
        for _ in 0..tone.channels {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
    }
    bytes
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting SDI playout (dry run)");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = OutputConfig::load_or_default(config_path.as_deref()).context("loading config")?;
    tracing::info!(
        "Card {} on {}, {} pairs, {}",
        config.card_index,
        config.video_connection,
        config.audio_pairs,
        if config.tenbits { "10-bit" } else { "8-bit" }
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let device = MemoryDevice::new(clock.clone());
    let session = Arc::new(DeviceSession::new(device, clock.clone(), &config)?);

    let format = VideoFormat::new(1920, 1080, 25, 1);
    let mode = session.open_video(&format).context("opening video output")?;
    tracing::info!("Output mode {}", mode);

    let tones = vec![
        Tone {
            id: StreamId::new(1),
            channels: 2,
            frequency: 440.0,
        },
        Tone {
            id: StreamId::new(2),
            channels: 2,
            frequency: 1000.0,
        },
    ];
    for tone in &tones {
        match session.add_audio_stream(tone.id, tone.channels) {
            Ok(slots) => tracing::info!("Tone {} Hz on slots {:?}", tone.frequency, slots),
            Err(e) => tracing::warn!("Tone {} Hz not mapped: {}", tone.frequency, e),
        }
    }

    let running = Arc::new(AtomicBool::new(true));
    let start: ClockTick = clock.now() + ticks_from_ms(PREROLL_MS);
    let mut workers = Vec::new();

    // Audio producers, one thread per stream
    for tone in tones {
        let session = session.clone();
        let clock = clock.clone();
        let running = running.clone();
        workers.push(std::thread::spawn(move || {
            let frames = (MULTIPLEX_SAMPLE_RATE as i64 * AUDIO_BLOCK_MS / 1000) as usize;
            let mut produced = 0u64;
            let mut timestamp = start;
            while running.load(Ordering::Relaxed) {
                if timestamp - clock.now() > ticks_from_ms(PREROLL_MS) {
                    std::thread::sleep(Duration::from_millis(2));
                    continue;
                }
                let block = tone_block(&tone, produced, frames);
                if let Err(e) = session.push_audio(&tone.id, timestamp, block) {
                    tracing::debug!("Audio push for {} failed: {}", tone.id, e);
                }
                produced += frames as u64;
                timestamp += ticks_from_ms(AUDIO_BLOCK_MS);
            }
        }));
    }

    // Video producer
    let (picture_tx, picture_rx) = bounded::<Picture>(4);
    {
        let running = running.clone();
        let frame_duration = mode.frame_duration_ticks();
        let pixel_format = PixelFormat::for_depth(config.tenbits);
        let (width, height) = (mode.width, mode.height);
        workers.push(std::thread::spawn(move || {
            let mut timestamp = start;
            while running.load(Ordering::Relaxed) {
                let picture = Picture::blank(pixel_format, width, height, timestamp);
                if picture_tx.send(picture).is_err() {
                    break;
                }
                timestamp += frame_duration;
            }
        }));
    }

    // Output path
    let output = {
        let session = session.clone();
        let running = running.clone();
        tokio::task::spawn_blocking(move || {
            while running.load(Ordering::Relaxed) {
                match picture_rx.recv_timeout(Duration::from_millis(100)) {
                    Ok(picture) => {
                        if let Err(e) = session.push_video_frame(picture, None) {
                            tracing::warn!("Video frame failed: {}", e);
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        })
    };

    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
            _ = ticker.tick() => {
                let stats = session.stats();
                let device = session.with_device(|dev| dev.stats());
                tracing::info!(
                    "Stats: {} frames scheduled, {} dropped, {} no-signal, {} audio frames, drift corrections {}, {} frames completed",
                    stats.frames_scheduled,
                    stats.frames_dropped,
                    stats.nosignal_frames,
                    stats.audio_frames,
                    stats.drift_corrections,
                    device.frames_completed
                );
            }
        }
    }

    running.store(false, Ordering::Relaxed);
    session.cancel();
    output.await?;
    for worker in workers {
        if worker.join().is_err() {
            tracing::warn!("Producer thread panicked");
        }
    }
    session.close();
    Ok(())
}
