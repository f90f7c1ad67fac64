//! carlink — resilient H.264 decode pipeline for head-unit displays.
//!
//! Sits between a projection transport delivering encoded H.264 frames
//! and a platform hardware decoder, and keeps video on screen through
//! the failure modes real devices exhibit: silent decoder stalls,
//! dropped keyframes, surface teardown, corrupted reference state.

pub mod config;
pub mod error;
pub mod utils;
pub mod video;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
