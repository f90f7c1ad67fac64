//! Encoded frame data structures

use std::time::Instant;

use super::pool::PooledBuffer;

/// An encoded H.264 frame staged for decode.
///
/// Owns a pool buffer for the duration of staging and submission; the
/// buffer returns to the pool when the frame drops, whether the decoder
/// consumed it or the pipeline discarded it.
#[derive(Debug)]
pub struct EncodedFrame {
    buffer: PooledBuffer,
    /// Monotonic ingest sequence number
    pub sequence: u64,
    /// When the transport handed the frame over
    pub received_at: Instant,
}

impl EncodedFrame {
    pub fn new(buffer: PooledBuffer, sequence: u64) -> Self {
        Self {
            buffer,
            sequence,
            received_at: Instant::now(),
        }
    }

    /// Encoded payload bytes
    pub fn data(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Time this frame has spent inside the pipeline
    pub fn age(&self) -> std::time::Duration {
        self.received_at.elapsed()
    }
}
