//! Pipeline configuration
//!
//! All tunables for the decode pipeline. Every struct deserializes with
//! defaults so a partial JSON config file is enough.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Top-level pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Staging ring capacity in slots (power of two; capacity - 1 usable)
    pub staging_slots: usize,
    /// Number of reusable frame buffers in the pool
    pub pool_slots: usize,
    /// Maximum accepted encoded frame size in bytes
    pub max_frame_bytes: usize,
    /// Negotiated frame rate, used to synthesize presentation timestamps
    pub fps: u32,
    /// How many leading bytes of a frame are scanned for a start code
    pub nal_scan_window: usize,
    /// How far past a leading SPS the IDR boundary is searched when
    /// splitting a config+keyframe bundle
    pub bundle_scan_window: usize,
    /// Minimum time between reactive keyframe requests (ms)
    pub keyframe_cooldown_ms: u64,
    /// When set, rebuild and inject SPS/PPS ahead of an IDR at most once
    /// per this many seconds (for transports that send config only once)
    pub config_refresh_secs: Option<u64>,
    /// Bound on joining the feeder thread during stop/reset (ms)
    pub feeder_join_timeout_ms: u64,
    /// Watchdog settings
    pub watchdog: WatchdogConfig,
    /// Reset throttle settings
    pub reset: ResetThrottleConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            staging_slots: 4,
            pool_slots: 6,
            max_frame_bytes: 1024 * 1024,
            fps: 30,
            nal_scan_window: 64,
            bundle_scan_window: 512,
            keyframe_cooldown_ms: 500,
            config_refresh_secs: None,
            feeder_join_timeout_ms: 2000,
            watchdog: WatchdogConfig::default(),
            reset: ResetThrottleConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if !self.staging_slots.is_power_of_two() || self.staging_slots < 2 {
            return Err(PipelineError::Config(format!(
                "staging_slots must be a power of two >= 2, got {}",
                self.staging_slots
            )));
        }
        if self.pool_slots < self.staging_slots {
            return Err(PipelineError::Config(format!(
                "pool_slots ({}) must cover the staging ring ({})",
                self.pool_slots, self.staging_slots
            )));
        }
        if self.fps == 0 {
            return Err(PipelineError::Config("fps must be non-zero".to_string()));
        }
        if self.max_frame_bytes == 0 {
            return Err(PipelineError::Config(
                "max_frame_bytes must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Presentation timestamp step per frame, in microseconds
    pub fn pts_step_us(&self) -> i64 {
        1_000_000 / self.fps as i64
    }
}

/// Health watchdog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Tick period in milliseconds
    pub interval_ms: u64,
    /// Consecutive receiving-but-not-decoding ticks before a reset
    pub failure_threshold: u32,
    /// Grace period after start/reset before strikes are counted (ms)
    pub grace_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            failure_threshold: 2,
            grace_ms: 3000,
        }
    }
}

/// Reset throttle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetThrottleConfig {
    /// Startup grace period during which resets are denied (ms)
    pub grace_ms: u64,
    /// Backoff after the first reset (ms); doubles per consecutive reset
    pub initial_backoff_ms: u64,
    /// Hard ceiling on the backoff interval (ms). A frozen display is
    /// worse than an early retry, so this stays in the seconds range.
    pub max_backoff_ms: u64,
    /// Rolling window length (ms)
    pub window_ms: u64,
    /// Maximum resets permitted inside the rolling window
    pub window_max: u32,
    /// Continuous healthy decode required to clear the backoff (ms)
    pub healthy_after_ms: u64,
}

impl Default for ResetThrottleConfig {
    fn default() -> Self {
        Self {
            grace_ms: 5000,
            initial_backoff_ms: 1000,
            max_backoff_ms: 8000,
            window_ms: 60_000,
            window_max: 6,
            healthy_after_ms: 30_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_power_of_two_ring() {
        let config = PipelineConfig {
            staging_slots: 3,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_pool_smaller_than_ring() {
        let config = PipelineConfig {
            staging_slots: 8,
            pool_slots: 4,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PipelineConfig = serde_json::from_str(r#"{"fps": 60}"#).unwrap();
        assert_eq!(config.fps, 60);
        assert_eq!(config.staging_slots, 4);
        assert_eq!(config.watchdog.failure_threshold, 2);
    }

    #[test]
    fn test_load_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, r#"{"fps": 25, "staging_slots": 8, "pool_slots": 8}"#).unwrap();

        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.fps, 25);
        assert_eq!(config.staging_slots, 8);
    }

    #[test]
    fn test_invalid_file_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, r#"{"staging_slots": 3}"#).unwrap();
        assert!(PipelineConfig::from_json_file(&path).is_err());
    }

    #[test]
    fn test_pts_step() {
        let config = PipelineConfig {
            fps: 25,
            ..Default::default()
        };
        assert_eq!(config.pts_step_us(), 40_000);
    }
}
