//! Common utilities shared across the pipeline

pub mod cooldown;

pub use cooldown::Cooldown;
