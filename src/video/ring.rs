//! Lock-free single-producer/single-consumer staging ring
//!
//! Hands staged frames from the ingest thread to the feeder thread
//! without locking. The head index is written only by the producer and
//! the tail only by the consumer; acquire/release ordering on those two
//! fields is the entire synchronization protocol.
//!
//! Capacity is a power of two; one slot stays unused so that head ==
//! tail unambiguously means empty. A full ring rejects the new value
//! and hands it back — the producer drops, it never blocks.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Bounded SPSC queue.
///
/// Contract: exactly one thread calls [`StagingRing::try_push`] and
/// exactly one thread calls [`StagingRing::try_pop`] at any time. The
/// index protocol guarantees producer and consumer never touch the same
/// slot concurrently; there is no per-slot locking.
pub struct StagingRing<T> {
    slots: Box<[UnsafeCell<Option<T>>]>,
    mask: usize,
    /// Next write position; stored only by the producer
    head: AtomicUsize,
    /// Next read position; stored only by the consumer
    tail: AtomicUsize,
}

// The ring moves T values between two threads; access to each slot is
// serialized by the head/tail protocol.
unsafe impl<T: Send> Send for StagingRing<T> {}
unsafe impl<T: Send> Sync for StagingRing<T> {}

impl<T> StagingRing<T> {
    /// Create a ring with `capacity` slots (`capacity - 1` usable).
    ///
    /// # Panics
    /// If `capacity` is not a power of two >= 2.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two() && capacity >= 2,
            "ring capacity must be a power of two >= 2"
        );
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(None))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            mask: capacity - 1,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Producer side. Returns `Err(value)` when the ring is full; the
    /// ring is left unchanged.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        let head = self.head.load(Ordering::Relaxed);
        let next = (head + 1) & self.mask;
        if next == self.tail.load(Ordering::Acquire) {
            return Err(value);
        }
        // The consumer cannot be reading this slot: it is strictly
        // between tail (exclusive) and head under the protocol.
        unsafe {
            *self.slots[head].get() = Some(value);
        }
        self.head.store(next, Ordering::Release);
        Ok(())
    }

    /// Consumer side. `None` when empty.
    pub fn try_pop(&self) -> Option<T> {
        let tail = self.tail.load(Ordering::Relaxed);
        if tail == self.head.load(Ordering::Acquire) {
            return None;
        }
        let value = unsafe { (*self.slots[tail].get()).take() };
        self.tail.store((tail + 1) & self.mask, Ordering::Release);
        value
    }

    /// Number of staged entries. Exact for the calling side, a snapshot
    /// for anyone else.
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail) & self.mask
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Usable capacity (one slot below the allocated size)
    pub fn capacity(&self) -> usize {
        self.mask
    }

    /// Drop all staged entries. Consumer-side operation: only legal
    /// while the producer is quiesced or from the consumer thread
    /// itself (used when a reset discards stale frames).
    pub fn drain(&self) -> usize {
        let mut drained = 0;
        while self.try_pop().is_some() {
            drained += 1;
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let ring = StagingRing::new(8);
        for i in 0..5 {
            ring.try_push(i).unwrap();
        }
        for i in 0..5 {
            assert_eq!(ring.try_pop(), Some(i));
        }
        assert_eq!(ring.try_pop(), None);
    }

    #[test]
    fn test_full_ring_rejects_and_is_unchanged() {
        let ring = StagingRing::new(4);
        assert_eq!(ring.capacity(), 3);
        for i in 0..3 {
            ring.try_push(i).unwrap();
        }
        assert_eq!(ring.try_push(99), Err(99));
        assert_eq!(ring.len(), 3);
        // Rejection is idempotent
        assert_eq!(ring.try_push(99), Err(99));
        // Contents survive intact, in order
        assert_eq!(ring.try_pop(), Some(0));
        assert_eq!(ring.try_pop(), Some(1));
        assert_eq!(ring.try_pop(), Some(2));
    }

    #[test]
    fn test_len_never_exceeds_capacity() {
        let ring = StagingRing::new(4);
        for round in 0..20 {
            let _ = ring.try_push(round);
            assert!(ring.len() <= ring.capacity());
        }
    }

    #[test]
    fn test_wraparound() {
        let ring = StagingRing::new(4);
        for i in 0..100 {
            ring.try_push(i).unwrap();
            assert_eq!(ring.try_pop(), Some(i));
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn test_drain() {
        let ring = StagingRing::new(8);
        for i in 0..6 {
            ring.try_push(i).unwrap();
        }
        assert_eq!(ring.drain(), 6);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_cross_thread_handoff() {
        const COUNT: u64 = 100_000;
        let ring = Arc::new(StagingRing::new(8));

        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                let mut next = 0u64;
                while next < COUNT {
                    if ring.try_push(next).is_ok() {
                        next += 1;
                    } else {
                        thread::yield_now();
                    }
                }
            })
        };

        let consumer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                let mut expected = 0u64;
                while expected < COUNT {
                    match ring.try_pop() {
                        Some(v) => {
                            assert_eq!(v, expected);
                            expected += 1;
                        }
                        None => thread::yield_now(),
                    }
                }
            })
        };

        producer.join().unwrap();
        consumer.join().unwrap();
        assert!(ring.is_empty());
    }
}
