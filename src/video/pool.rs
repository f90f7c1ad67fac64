//! Fixed-size frame buffer pool
//!
//! The ingest hot path copies each incoming encoded frame into a
//! pre-allocated buffer instead of heap-allocating per frame. Pool
//! exhaustion is backpressure: `acquire` returns `None` and the caller
//! rejects the frame rather than growing the pool.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    buffer_capacity: usize,
    total: usize,
}

/// Pool of reusable frame byte buffers.
///
/// Cheap to clone; all clones share the same buffers. Buffers return to
/// the pool when the owning [`PooledBuffer`] drops, keeping their
/// allocation for reuse.
#[derive(Clone)]
pub struct FramePool {
    inner: Arc<PoolInner>,
}

impl FramePool {
    /// Create a pool with `slots` buffers of `buffer_capacity` bytes each,
    /// all allocated up front.
    pub fn new(slots: usize, buffer_capacity: usize) -> Self {
        debug!(
            "Allocating frame pool: {} x {} KiB",
            slots,
            buffer_capacity / 1024
        );
        let free = (0..slots)
            .map(|_| Vec::with_capacity(buffer_capacity))
            .collect();
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(free),
                buffer_capacity,
                total: slots,
            }),
        }
    }

    /// Take a buffer from the pool. `None` when exhausted.
    pub fn acquire(&self) -> Option<PooledBuffer> {
        let data = self.inner.free.lock().pop()?;
        Some(PooledBuffer {
            data: Some(data),
            pool: Arc::clone(&self.inner),
        })
    }

    /// Number of buffers currently available
    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }

    /// Total number of buffers owned by the pool
    pub fn capacity(&self) -> usize {
        self.inner.total
    }

    /// Per-buffer capacity in bytes
    pub fn buffer_capacity(&self) -> usize {
        self.inner.buffer_capacity
    }
}

/// A buffer checked out of a [`FramePool`]; returns on drop.
pub struct PooledBuffer {
    data: Option<Vec<u8>>,
    pool: Arc<PoolInner>,
}

impl PooledBuffer {
    /// Copy `src` into the buffer, replacing prior contents. Fails when
    /// `src` exceeds the buffer capacity (the buffer never reallocates).
    pub fn fill(&mut self, src: &[u8]) -> bool {
        let data = self.data.as_mut().expect("buffer present until drop");
        if src.len() > self.pool.buffer_capacity {
            return false;
        }
        data.clear();
        data.extend_from_slice(src);
        true
    }

    pub fn as_slice(&self) -> &[u8] {
        self.data.as_deref().expect("buffer present until drop")
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(mut data) = self.data.take() {
            data.clear();
            self.pool.free.lock().push(data);
        }
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_until_exhausted() {
        let pool = FramePool::new(2, 64);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());
        assert_eq!(pool.available(), 0);
        drop(a);
        drop(b);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_buffer_returns_on_drop() {
        let pool = FramePool::new(1, 64);
        {
            let mut buf = pool.acquire().unwrap();
            assert!(buf.fill(&[1, 2, 3]));
            assert_eq!(buf.as_slice(), &[1, 2, 3]);
        }
        // Returned buffer is cleared
        let buf = pool.acquire().unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_fill_rejects_oversized() {
        let pool = FramePool::new(1, 4);
        let mut buf = pool.acquire().unwrap();
        assert!(!buf.fill(&[0u8; 5]));
        assert!(buf.fill(&[0u8; 4]));
    }

    #[test]
    fn test_fill_does_not_reallocate() {
        let pool = FramePool::new(1, 1024);
        let mut buf = pool.acquire().unwrap();
        let ptr_before = buf.as_slice().as_ptr();
        buf.fill(&[7u8; 512]);
        assert_eq!(buf.as_slice().as_ptr(), ptr_before);
    }

    #[test]
    fn test_shared_across_clones() {
        let pool = FramePool::new(1, 16);
        let clone = pool.clone();
        let buf = pool.acquire().unwrap();
        assert!(clone.acquire().is_none());
        drop(buf);
        assert!(clone.acquire().is_some());
    }
}
