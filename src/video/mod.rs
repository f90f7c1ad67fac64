//! H.264 decode pipeline
//!
//! Transport-agnostic resilience layer between an encoded video stream
//! and a platform hardware decoder: staging and backpressure, sync
//! acquisition, parameter-set caching, liveness monitoring and throttled
//! recovery.

pub mod config_cache;
pub mod decoder;
pub mod frame;
pub mod mock;
pub mod nal;
pub mod pool;
pub mod reset_throttle;
pub mod ring;
pub mod session;
pub mod stats;
pub mod watchdog;

pub use config_cache::ConfigCache;
pub use decoder::{
    DecoderEvent, DecoderEventSender, DecoderFault, DecoderFormat, HardwareDecoder, InputSlot,
    OutputSlot, SubmitKind, SurfaceHandle,
};
pub use frame::EncodedFrame;
pub use mock::{MockControl, MockDecoder};
pub use nal::NalType;
pub use pool::{FramePool, PooledBuffer};
pub use reset_throttle::ResetThrottle;
pub use ring::StagingRing;
pub use session::{CodecSession, SessionState, SessionStats, UpstreamControl};
pub use stats::{CounterSnapshot, DropStats, PipelineCounters};
pub use watchdog::HealthWatchdog;
