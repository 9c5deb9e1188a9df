use std::time::Instant;

/// Monotonic wall-clock source in milliseconds. Components take the clock
/// as a boxed trait object so tests can install a scripted one.
pub trait MonotonicClock: Send {
    fn now_ms(&mut self) -> u64;
}

/// System clock backed by `Instant`, reporting milliseconds since creation.
pub struct SystemClock {
    start: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MonotonicClock for SystemClock {
    fn now_ms(&mut self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Detector ticks elapsing per wall-clock millisecond.
pub fn ticks_per_ms(clock_hz: u64) -> u64 {
    (clock_hz / 1000).max(1)
}

/// Converts a detector tick count to wall-clock milliseconds.
pub fn ticks_to_ms(ticks: u64, clock_hz: u64) -> u64 {
    ticks / ticks_per_ms(clock_hz)
}

/// Converts wall-clock milliseconds to detector ticks.
pub fn ms_to_ticks(ms: u64, clock_hz: u64) -> u64 {
    ms.saturating_mul(ticks_per_ms(clock_hz))
}
