//! Decoder reset rate limiting
//!
//! A reset clears decoder corruption but costs a visible freeze, so
//! resets are paced: a startup grace period, exponential backoff per
//! consecutive attempt with a hard ceiling, and a rolling-window cap.
//! Sustained healthy decode clears the backoff. The ceiling stays in
//! the seconds range; on a head-unit display the pipeline must keep
//! retrying rather than give up.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::ResetThrottleConfig;

/// Rate limiter for decoder session resets.
///
/// All methods take an explicit `now` so the policy is deterministic
/// under test. Not thread-safe by itself; the reset supervisor owns it
/// behind the lifecycle serialization.
pub struct ResetThrottle {
    config: ResetThrottleConfig,
    started_at: Instant,
    consecutive: u32,
    last_reset: Option<Instant>,
    recent: VecDeque<Instant>,
    healthy_since: Option<Instant>,
}

impl ResetThrottle {
    pub fn new(config: ResetThrottleConfig) -> Self {
        Self::with_start(config, Instant::now())
    }

    /// Construct with an explicit epoch for the startup grace window
    pub fn with_start(config: ResetThrottleConfig, now: Instant) -> Self {
        Self {
            config,
            started_at: now,
            consecutive: 0,
            last_reset: None,
            recent: VecDeque::new(),
            healthy_since: None,
        }
    }

    /// Whether a reset may proceed at `now`
    pub fn allow_reset(&mut self, now: Instant) -> bool {
        self.decay_if_healthy(now);

        if now.duration_since(self.started_at) < Duration::from_millis(self.config.grace_ms) {
            debug!("Reset denied: inside startup grace window");
            return false;
        }

        let window = Duration::from_millis(self.config.window_ms);
        while let Some(&front) = self.recent.front() {
            if now.duration_since(front) > window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        if self.recent.len() >= self.config.window_max as usize {
            debug!(
                "Reset denied: {} resets inside the rolling window",
                self.recent.len()
            );
            return false;
        }

        if let Some(last) = self.last_reset {
            let backoff = self.current_backoff();
            if now.duration_since(last) < backoff {
                debug!("Reset denied: backoff {:?} not elapsed", backoff);
                return false;
            }
        }

        true
    }

    /// Record that a reset was performed at `now`
    pub fn record_reset(&mut self, now: Instant) {
        self.consecutive = self.consecutive.saturating_add(1);
        self.last_reset = Some(now);
        self.recent.push_back(now);
        self.healthy_since = None;
    }

    /// Mark the pipeline as decoding successfully at `now`. After a
    /// continuous healthy interval the consecutive-reset backoff clears.
    pub fn record_healthy(&mut self, now: Instant) {
        if self.healthy_since.is_none() {
            self.healthy_since = Some(now);
        }
        self.decay_if_healthy(now);
    }

    /// Backoff the next reset must respect, given resets so far
    pub fn current_backoff(&self) -> Duration {
        if self.consecutive == 0 {
            return Duration::ZERO;
        }
        let exp = (self.consecutive - 1).min(16);
        let ms = self
            .config
            .initial_backoff_ms
            .saturating_mul(1u64 << exp)
            .min(self.config.max_backoff_ms);
        Duration::from_millis(ms)
    }

    pub fn consecutive_resets(&self) -> u32 {
        self.consecutive
    }

    fn decay_if_healthy(&mut self, now: Instant) {
        if let Some(since) = self.healthy_since {
            if now.duration_since(since) >= Duration::from_millis(self.config.healthy_after_ms)
                && self.consecutive > 0
            {
                debug!(
                    "Sustained healthy decode, clearing backoff ({} consecutive resets)",
                    self.consecutive
                );
                self.consecutive = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ResetThrottleConfig {
        ResetThrottleConfig {
            grace_ms: 1000,
            initial_backoff_ms: 500,
            max_backoff_ms: 4000,
            window_ms: 60_000,
            window_max: 4,
            healthy_after_ms: 10_000,
        }
    }

    fn at(start: Instant, ms: u64) -> Instant {
        start + Duration::from_millis(ms)
    }

    #[test]
    fn test_denied_during_grace() {
        let start = Instant::now();
        let mut throttle = ResetThrottle::with_start(config(), start);
        assert!(!throttle.allow_reset(start));
        assert!(!throttle.allow_reset(at(start, 999)));
        assert!(throttle.allow_reset(at(start, 1000)));
    }

    #[test]
    fn test_backoff_strictly_increases_to_cap() {
        let start = Instant::now();
        let mut throttle = ResetThrottle::with_start(config(), start);

        throttle.record_reset(at(start, 2000));
        assert_eq!(throttle.current_backoff(), Duration::from_millis(500));
        throttle.record_reset(at(start, 3000));
        assert_eq!(throttle.current_backoff(), Duration::from_millis(1000));
        throttle.record_reset(at(start, 5000));
        assert_eq!(throttle.current_backoff(), Duration::from_millis(2000));
        throttle.record_reset(at(start, 8000));
        assert_eq!(throttle.current_backoff(), Duration::from_millis(4000));
        // Capped, never minutes
        throttle.record_reset(at(start, 13_000));
        assert_eq!(throttle.current_backoff(), Duration::from_millis(4000));
    }

    #[test]
    fn test_backoff_gates_allow() {
        let start = Instant::now();
        let mut throttle = ResetThrottle::with_start(config(), start);

        assert!(throttle.allow_reset(at(start, 2000)));
        throttle.record_reset(at(start, 2000));

        // 500 ms backoff after first reset
        assert!(!throttle.allow_reset(at(start, 2300)));
        assert!(throttle.allow_reset(at(start, 2600)));
    }

    #[test]
    fn test_rolling_window_cap() {
        let start = Instant::now();
        let mut throttle = ResetThrottle::with_start(config(), start);

        let mut t = 2000;
        for _ in 0..4 {
            assert!(throttle.allow_reset(at(start, t)));
            throttle.record_reset(at(start, t));
            t += 5000;
        }
        // Window holds 4 resets; backoff has elapsed but the cap holds
        assert!(!throttle.allow_reset(at(start, t)));
        // Once the oldest reset ages out of the window, resets resume
        assert!(throttle.allow_reset(at(start, 2000 + 61_000)));
    }

    #[test]
    fn test_healthy_interval_clears_backoff() {
        let start = Instant::now();
        let mut throttle = ResetThrottle::with_start(config(), start);

        throttle.record_reset(at(start, 2000));
        throttle.record_reset(at(start, 4000));
        assert_eq!(throttle.consecutive_resets(), 2);

        throttle.record_healthy(at(start, 5000));
        // Not yet sustained
        throttle.record_healthy(at(start, 9000));
        assert_eq!(throttle.consecutive_resets(), 2);
        // 10 s of continuous health clears it
        throttle.record_healthy(at(start, 15_000));
        assert_eq!(throttle.consecutive_resets(), 0);
        assert_eq!(throttle.current_backoff(), Duration::ZERO);
    }

    #[test]
    fn test_reset_interrupts_healthy_interval() {
        let start = Instant::now();
        let mut throttle = ResetThrottle::with_start(config(), start);

        throttle.record_reset(at(start, 2000));
        throttle.record_healthy(at(start, 3000));
        throttle.record_reset(at(start, 6000));
        // Healthy clock restarted at the reset
        throttle.record_healthy(at(start, 14_000));
        assert_eq!(throttle.consecutive_resets(), 2);
    }
}
