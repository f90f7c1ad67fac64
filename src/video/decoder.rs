//! Hardware decoder abstraction
//!
//! The platform decoder (MediaCodec-style asynchronous buffer exchange)
//! is reached through this trait. It is callback-driven: after `start`
//! the decoder announces free input slots and finished outputs as
//! [`DecoderEvent`]s on the channel handed to `configure`. Those events
//! are the only place decoder buffer handles surface, and posting them
//! must never block the decoder's own threads.

use crate::error::Result;

/// Index of a free decoder input buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputSlot(pub u32);

/// Index of a finished decoder output buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputSlot(pub u32);

/// Opaque display surface reference shared with the UI layer.
/// Identity comparison detects surface recreation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceHandle {
    pub id: u64,
}

impl SurfaceHandle {
    pub fn new(id: u64) -> Self {
        Self { id }
    }
}

/// Negotiated stream format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// How a submission should be tagged toward the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitKind {
    /// Regular encoded frame
    Frame,
    /// SPS/PPS configuration data (no output expected)
    ConfigData,
}

/// Decoder error notification
#[derive(Debug, Clone)]
pub struct DecoderFault {
    pub kind: String,
    pub reason: String,
    /// The decoder believes a stop/configure/start cycle clears this
    pub recoverable: bool,
    /// The condition may pass on its own (resource contention etc.)
    pub transient: bool,
}

/// Asynchronous notifications from the decoder.
///
/// Delivered on the channel passed to [`HardwareDecoder::configure`]
/// and drained by the feeder thread, never handled inline on the
/// decoder's callback threads.
#[derive(Debug, Clone)]
pub enum DecoderEvent {
    /// Input buffer `slot` is free and can take a submission
    InputSlotAvailable(InputSlot),
    /// Output buffer finished; `size == 0` marks stream punctuation
    /// (end-of-stream etc.) and does not count as a decoded frame
    OutputReady {
        slot: OutputSlot,
        size: usize,
        pts_us: i64,
    },
    /// The decoder reported a problem
    Error(DecoderFault),
    /// Output format negotiation completed or changed mid-stream
    FormatChanged {
        width: u32,
        height: u32,
        pixel_format: u32,
    },
}

/// Sender half handed to the decoder for event delivery. Bounded;
/// implementations must use non-blocking sends from callback context.
pub type DecoderEventSender = std::sync::mpsc::SyncSender<DecoderEvent>;

/// The opaque hardware decode session.
///
/// Lifecycle: `configure` → `start` → (`queue_input`/`release_output`
/// driven by events) → `stop`; a reset is `stop` → `configure` → `start`
/// on the same instance. `flush` discards in-flight buffers without
/// tearing the session down.
pub trait HardwareDecoder: Send {
    /// Bind format, output surface and the event channel. Callable
    /// again after `stop` to reconfigure the same instance.
    fn configure(
        &mut self,
        format: &DecoderFormat,
        surface: SurfaceHandle,
        events: DecoderEventSender,
    ) -> Result<()>;

    /// Begin the asynchronous buffer cycle; input slots start arriving
    /// as events after this returns.
    fn start(&mut self) -> Result<()>;

    /// Stop the session and invalidate all outstanding slots.
    fn stop(&mut self) -> Result<()>;

    /// Discard in-flight input/output without losing the configuration.
    fn flush(&mut self) -> Result<()>;

    /// Hand `payload` to input buffer `slot`.
    fn queue_input(
        &mut self,
        slot: InputSlot,
        payload: &[u8],
        pts_us: i64,
        kind: SubmitKind,
    ) -> Result<()>;

    /// Return output buffer `slot`; `render` sends it to the surface.
    fn release_output(&mut self, slot: OutputSlot, render: bool) -> Result<()>;

    /// Implementation name for logs
    fn name(&self) -> &'static str;
}
