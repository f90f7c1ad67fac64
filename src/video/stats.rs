//! Pipeline counters and drop accounting
//!
//! Cumulative counters are atomics incremented from the ingest, feeder
//! and decoder-callback paths; the watchdog and external reporting read
//! snapshots. Drop accounting additionally keeps a per-interval window
//! that a reporting consumer resets on each poll.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::Serialize;

/// Cumulative pipeline counters
#[derive(Debug, Default)]
pub struct PipelineCounters {
    frames_received: AtomicU64,
    frames_fed: AtomicU64,
    frames_decoded: AtomicU64,
    frames_rejected: AtomicU64,
    resets: AtomicU64,
    watchdog_strikes: AtomicU32,
}

impl PipelineCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted submission; returns the frame's sequence number
    pub fn record_received(&self) -> u64 {
        self.frames_received.fetch_add(1, Ordering::Relaxed)
    }

    /// Record a transport-level rejection (oversized/empty/closed)
    pub fn record_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame handed to the decoder; returns the feed index used
    /// for presentation-timestamp synthesis
    pub fn record_fed(&self) -> u64 {
        self.frames_fed.fetch_add(1, Ordering::Relaxed)
    }

    pub fn frames_fed(&self) -> u64 {
        self.frames_fed.load(Ordering::Relaxed)
    }

    /// Record a non-empty decoder output
    pub fn record_decoded(&self) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded.load(Ordering::Relaxed)
    }

    /// Bump the consecutive watchdog failure counter; returns the new value
    pub fn record_watchdog_strike(&self) -> u32 {
        self.watchdog_strikes.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn clear_watchdog_strikes(&self) {
        self.watchdog_strikes.store(0, Ordering::Relaxed);
    }

    pub fn watchdog_strikes(&self) -> u32 {
        self.watchdog_strikes.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_fed: self.frames_fed.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
            watchdog_strikes: self.watchdog_strikes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`PipelineCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub frames_received: u64,
    pub frames_fed: u64,
    pub frames_decoded: u64,
    pub frames_rejected: u64,
    pub resets: u64,
    pub watchdog_strikes: u32,
}

/// Classified drop counters, per interval and cumulative.
///
/// Keyframe drops are tracked separately: one lost IDR poisons every
/// following delta frame until the next IDR, which is what drives the
/// reactive keyframe-request policy.
#[derive(Debug, Default)]
pub struct DropAccounting {
    interval_idr: AtomicU64,
    interval_delta: AtomicU64,
    interval_fed: AtomicU64,
    total_idr: AtomicU64,
    total_delta: AtomicU64,
    total_fed: AtomicU64,
}

impl DropAccounting {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_drop(&self, is_keyframe: bool) {
        if is_keyframe {
            self.interval_idr.fetch_add(1, Ordering::Relaxed);
            self.total_idr.fetch_add(1, Ordering::Relaxed);
        } else {
            self.interval_delta.fetch_add(1, Ordering::Relaxed);
            self.total_delta.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_feed_success(&self) {
        self.interval_fed.fetch_add(1, Ordering::Relaxed);
        self.total_fed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn idr_drops(&self) -> u64 {
        self.total_idr.load(Ordering::Relaxed)
    }

    pub fn delta_drops(&self) -> u64 {
        self.total_delta.load(Ordering::Relaxed)
    }

    pub fn total_drops(&self) -> u64 {
        self.idr_drops() + self.delta_drops()
    }

    /// Read and clear the interval window; cumulative totals are
    /// reported alongside and never reset.
    pub fn snapshot_and_reset(&self) -> DropStats {
        DropStats {
            interval_idr_drops: self.interval_idr.swap(0, Ordering::Relaxed),
            interval_delta_drops: self.interval_delta.swap(0, Ordering::Relaxed),
            interval_fed: self.interval_fed.swap(0, Ordering::Relaxed),
            total_idr_drops: self.total_idr.load(Ordering::Relaxed),
            total_delta_drops: self.total_delta.load(Ordering::Relaxed),
            total_fed: self.total_fed.load(Ordering::Relaxed),
        }
    }
}

/// Drop statistics for one reporting interval
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DropStats {
    pub interval_idr_drops: u64,
    pub interval_delta_drops: u64,
    pub interval_fed: u64,
    pub total_idr_drops: u64,
    pub total_delta_drops: u64,
    pub total_fed: u64,
}

impl DropStats {
    pub fn interval_total_drops(&self) -> u64 {
        self.interval_idr_drops + self.interval_delta_drops
    }

    pub fn total_drops(&self) -> u64 {
        self.total_idr_drops + self.total_delta_drops
    }
}
