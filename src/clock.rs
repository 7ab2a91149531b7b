//! Reference clock
//!
//! Every timestamp and duration in the crate is a [`ClockTick`]: a signed
//! count of ticks of a fixed 1 MHz reference. Wall-clock structs never
//! cross module boundaries.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Signed tick count of the [`CLOCK_FREQ`] reference.
pub type ClockTick = i64;

/// Reference frequency in ticks per second.
pub const CLOCK_FREQ: i64 = 1_000_000;

/// Slice length used while sleeping so cancellation is noticed promptly.
const SLEEP_SLICE: ClockTick = 2_000;

pub const fn ticks_from_ms(ms: i64) -> ClockTick {
    ms * CLOCK_FREQ / 1000
}

pub const fn ticks_from_secs(secs: i64) -> ClockTick {
    secs * CLOCK_FREQ
}

/// Rescale `value` expressed in `timescale` units per second to ticks.
pub fn ticks_from_timescale(value: i64, timescale: i64) -> ClockTick {
    if timescale <= 0 {
        return 0;
    }
    ((value as i128 * CLOCK_FREQ as i128) / timescale as i128) as ClockTick
}

/// Rescale ticks to `timescale` units per second.
pub fn ticks_to_timescale(ticks: ClockTick, timescale: i64) -> i64 {
    ((ticks as i128 * timescale as i128) / CLOCK_FREQ as i128) as i64
}

pub fn ticks_to_duration(ticks: ClockTick) -> Duration {
    Duration::from_micros(ticks.max(0) as u64)
}

/// Source of "now" and of bounded sleeps.
pub trait Clock: Send + Sync {
    fn now(&self) -> ClockTick;

    /// Sleep for up to `ticks`, returning early if `cancel` is raised.
    fn sleep(&self, ticks: ClockTick, cancel: &AtomicBool);
}

/// Monotonic process clock.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> ClockTick {
        self.origin.elapsed().as_micros() as ClockTick
    }

    fn sleep(&self, ticks: ClockTick, cancel: &AtomicBool) {
        let deadline = self.now() + ticks;
        loop {
            if cancel.load(Ordering::Relaxed) {
                return;
            }
            let left = deadline - self.now();
            if left <= 0 {
                return;
            }
            std::thread::sleep(ticks_to_duration(left.min(SLEEP_SLICE)));
        }
    }
}

/// Hand-driven clock for deterministic tests and simulations.
///
/// `sleep` advances the clock instead of blocking.
pub struct ManualClock {
    now: Mutex<ClockTick>,
}

impl ManualClock {
    pub fn new(start: ClockTick) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, t: ClockTick) {
        *self.now.lock() = t;
    }

    pub fn advance(&self, ticks: ClockTick) {
        *self.now.lock() += ticks;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> ClockTick {
        *self.now.lock()
    }

    fn sleep(&self, ticks: ClockTick, cancel: &AtomicBool) {
        if !cancel.load(Ordering::Relaxed) && ticks > 0 {
            self.advance(ticks);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timescale_conversions() {
        assert_eq!(ticks_from_ms(5), 5_000);
        assert_eq!(ticks_from_secs(2), 2_000_000);
        // 1001/30000 s frame duration
        assert_eq!(ticks_from_timescale(1001, 30000), 33_366);
        assert_eq!(ticks_to_timescale(1_000_000, 48000), 48000);
        assert_eq!(ticks_from_timescale(10, 0), 0);
    }

    #[test]
    fn test_manual_clock_sleep_advances() {
        let clock = ManualClock::new(100);
        let cancel = AtomicBool::new(false);
        clock.sleep(50, &cancel);
        assert_eq!(clock.now(), 150);

        cancel.store(true, Ordering::Relaxed);
        clock.sleep(50, &cancel);
        assert_eq!(clock.now(), 150);
    }

    #[test]
    fn test_system_clock_cancelled_sleep_returns() {
        let clock = SystemClock::new();
        let cancel = AtomicBool::new(true);
        let before = Instant::now();
        clock.sleep(ticks_from_secs(10), &cancel);
        assert!(before.elapsed() < Duration::from_secs(1));
    }
}
