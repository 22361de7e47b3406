// Small helpers shared by the acquisition and the experiment loop
use log::trace;
use ndarray::Array1;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Number of edges between consecutive clock ticks of a cumulative counter buffer.
///
/// Returns `raw.len() - 1` values (empty for fewer than two samples). Onboard counters are
/// 32 bit and roll over, so the difference is taken modulo 2^32.
pub fn first_difference(raw: &[u32]) -> Array1<u32> {
    raw.windows(2).map(|w| w[1].wrapping_sub(w[0])).collect()
}

/// Seconds since the UNIX epoch as a float, 0 if the system clock is set before 1970.
pub fn unix_time_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

// Utility class for time-tracking
pub struct TickTimer {
    last: Instant,
}

impl TickTimer {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    /// Milliseconds since construction or since the previous tick.
    pub fn tick(&mut self) -> f64 {
        let now = Instant::now();
        let diff = now.duration_since(self.last).as_secs_f64() * 1e3;
        self.last = now;
        diff
    }

    pub fn tick_trace(&mut self, msg: &str) -> f64 {
        let diff = self.tick();
        trace!("{}: {:.3} ms", msg, diff);
        diff
    }
}

impl Default for TickTimer {
    fn default() -> Self {
        Self::new()
    }
}
