//! Decoder liveness watchdog
//!
//! A decoder can wedge silently: input buffers keep cycling, output
//! never arrives, no error callback fires. The watchdog samples the
//! received/decoded counters on a fixed tick and calls a tick where
//! frames arrived but none decoded a strike. Enough consecutive strikes
//! outside the post-activation grace window request a full session
//! reset through the supervisor, which applies the reset throttle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use super::session::SessionCommand;
use super::stats::PipelineCounters;
use crate::config::WatchdogConfig;

/// Outcome of one watchdog tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickVerdict {
    /// At least one frame decoded this tick
    Healthy,
    /// Frames arrived, nothing decoded: the zombie signature
    Zombie,
    /// Nothing arrived; the source is quiet, not the decoder
    Idle,
}

/// Classify one tick from the counter deltas. Pure so the policy is
/// testable without clocks or tasks.
pub fn classify_tick(received_delta: u64, decoded_delta: u64) -> TickVerdict {
    if decoded_delta > 0 {
        TickVerdict::Healthy
    } else if received_delta > 0 {
        TickVerdict::Zombie
    } else {
        TickVerdict::Idle
    }
}

/// Periodic health monitor for a running session
pub struct HealthWatchdog {
    config: WatchdogConfig,
    counters: Arc<PipelineCounters>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    /// Updated by the session on every start/reset; strikes inside the
    /// grace window after it are ignored
    activated_at: Arc<Mutex<Instant>>,
}

impl HealthWatchdog {
    pub fn new(
        config: WatchdogConfig,
        counters: Arc<PipelineCounters>,
        commands: mpsc::UnboundedSender<SessionCommand>,
        activated_at: Arc<Mutex<Instant>>,
    ) -> Self {
        Self {
            config,
            counters,
            commands,
            activated_at,
        }
    }

    /// Tick loop; exits when `stop` flips to true or the command
    /// channel closes.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of tokio's interval completes immediately
        interval.tick().await;

        let mut prev_received = self.counters.frames_received();
        let mut prev_decoded = self.counters.frames_decoded();
        debug!("Watchdog started ({} ms tick)", self.config.interval_ms);

        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    let received = self.counters.frames_received();
                    let decoded = self.counters.frames_decoded();
                    let verdict = classify_tick(
                        received.wrapping_sub(prev_received),
                        decoded.wrapping_sub(prev_decoded),
                    );
                    prev_received = received;
                    prev_decoded = decoded;

                    if self.handle_verdict(verdict).is_err() {
                        break;
                    }
                }
            }
        }
        debug!("Watchdog stopped");
    }

    fn handle_verdict(&self, verdict: TickVerdict) -> Result<(), ()> {
        match verdict {
            TickVerdict::Healthy => {
                self.counters.clear_watchdog_strikes();
                self.commands
                    .send(SessionCommand::Healthy)
                    .map_err(|_| ())?;
            }
            TickVerdict::Idle => {
                // No input, no judgement
            }
            TickVerdict::Zombie => {
                let grace = Duration::from_millis(self.config.grace_ms);
                if self.activated_at.lock().elapsed() < grace {
                    debug!("Watchdog: no decode yet, inside activation grace");
                    return Ok(());
                }
                let strikes = self.counters.record_watchdog_strike();
                warn!(
                    "Watchdog: receiving but not decoding ({}/{} strikes)",
                    strikes, self.config.failure_threshold
                );
                if strikes >= self.config.failure_threshold {
                    // Clear before requesting so one zombie episode
                    // yields one reset request, not one per tick
                    self.counters.clear_watchdog_strikes();
                    self.commands
                        .send(SessionCommand::Reset {
                            reason: format!(
                                "zombie decoder: {} ticks receiving without decoding",
                                strikes
                            ),
                        })
                        .map_err(|_| ())?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_classification() {
        assert_eq!(classify_tick(10, 9), TickVerdict::Healthy);
        assert_eq!(classify_tick(10, 0), TickVerdict::Zombie);
        assert_eq!(classify_tick(0, 0), TickVerdict::Idle);
        // Decoded frames without new input still proves liveness
        assert_eq!(classify_tick(0, 3), TickVerdict::Healthy);
    }

    fn watchdog_with_channel(
        grace_ms: u64,
    ) -> (
        HealthWatchdog,
        Arc<PipelineCounters>,
        mpsc::UnboundedReceiver<SessionCommand>,
    ) {
        let counters = Arc::new(PipelineCounters::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let watchdog = HealthWatchdog::new(
            WatchdogConfig {
                interval_ms: 1000,
                failure_threshold: 2,
                grace_ms,
            },
            Arc::clone(&counters),
            tx,
            Arc::new(Mutex::new(
                Instant::now() - Duration::from_millis(grace_ms + 1),
            )),
        );
        (watchdog, counters, rx)
    }

    #[test]
    fn test_two_zombie_ticks_request_one_reset() {
        let (watchdog, _counters, mut rx) = watchdog_with_channel(0);

        // received grows 10/tick, decoded stays 0
        watchdog.handle_verdict(classify_tick(10, 0)).unwrap();
        assert!(rx.try_recv().is_err());
        watchdog.handle_verdict(classify_tick(10, 0)).unwrap();

        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionCommand::Reset { .. }
        ));
        // Exactly one request for the episode
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_healthy_tick_clears_strikes() {
        let (watchdog, counters, mut rx) = watchdog_with_channel(0);

        watchdog.handle_verdict(TickVerdict::Zombie).unwrap();
        assert_eq!(counters.watchdog_strikes(), 1);
        watchdog.handle_verdict(TickVerdict::Healthy).unwrap();
        assert_eq!(counters.watchdog_strikes(), 0);
        assert!(matches!(rx.try_recv().unwrap(), SessionCommand::Healthy));

        // The episode ended; a single new strike is not enough
        watchdog.handle_verdict(TickVerdict::Zombie).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_idle_ticks_do_not_strike() {
        let (watchdog, counters, mut rx) = watchdog_with_channel(0);

        watchdog.handle_verdict(TickVerdict::Idle).unwrap();
        watchdog.handle_verdict(TickVerdict::Idle).unwrap();
        assert_eq!(counters.watchdog_strikes(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_grace_window_suppresses_strikes() {
        let counters = Arc::new(PipelineCounters::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let watchdog = HealthWatchdog::new(
            WatchdogConfig {
                interval_ms: 1000,
                failure_threshold: 2,
                grace_ms: 60_000,
            },
            Arc::clone(&counters),
            tx,
            Arc::new(Mutex::new(Instant::now())),
        );

        watchdog.handle_verdict(TickVerdict::Zombie).unwrap();
        watchdog.handle_verdict(TickVerdict::Zombie).unwrap();
        assert_eq!(counters.watchdog_strikes(), 0);
        assert!(rx.try_recv().is_err());
    }
}
