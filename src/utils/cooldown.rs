//! Interval gating utility
//!
//! Limits how often a repeated action fires, such as reactive keyframe
//! requests toward the upstream adapter or hot-path warning logs.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// A gate that opens at most once per interval.
///
/// The first call to [`Cooldown::try_fire`] always succeeds; later calls
/// succeed only after the interval has elapsed since the last success.
pub struct Cooldown {
    last_fired: Mutex<Option<Instant>>,
    interval: Duration,
}

impl Cooldown {
    /// Create a cooldown with the given minimum interval
    pub fn new(interval: Duration) -> Self {
        Self {
            last_fired: Mutex::new(None),
            interval,
        }
    }

    /// Create a cooldown with the interval in milliseconds
    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    /// Returns `true` (and arms the gate) if the interval has elapsed
    pub fn try_fire(&self) -> bool {
        let now = Instant::now();
        let mut last = self.last_fired.lock();
        match *last {
            Some(t) if now.duration_since(t) < self.interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    /// Fire unconditionally, re-arming the gate from now
    pub fn force(&self) {
        *self.last_fired.lock() = Some(Instant::now());
    }

    /// Clear the gate so the next `try_fire` succeeds immediately
    pub fn reset(&self) {
        *self.last_fired.lock() = None;
    }
}

/// Log a warning at most once per cooldown interval
#[macro_export]
macro_rules! warn_cooled {
    ($cooldown:expr, $($arg:tt)*) => {
        if $cooldown.try_fire() {
            tracing::warn!($($arg)*);
        }
    };
}
