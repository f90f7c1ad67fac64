//! In-process reference decoder
//!
//! Implements [`HardwareDecoder`] without touching real hardware:
//! input slots recycle immediately, every frame submission produces one
//! output event sized like its payload. Used by the unit tests and the
//! demo player. A paired [`MockControl`] handle scripts stalls and
//! error notifications and inspects what was submitted.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::decoder::{
    DecoderEvent, DecoderEventSender, DecoderFault, DecoderFormat, HardwareDecoder, InputSlot,
    OutputSlot, SubmitKind, SurfaceHandle,
};
use crate::error::{PipelineError, Result};

/// One recorded call to `queue_input`
#[derive(Debug, Clone)]
pub struct Submission {
    pub kind: SubmitKind,
    pub payload: Vec<u8>,
    pub pts_us: i64,
}

#[derive(Default)]
struct MockShared {
    events: Mutex<Option<DecoderEventSender>>,
    submissions: Mutex<Vec<Submission>>,
    surface: Mutex<Option<SurfaceHandle>>,
    /// Zombie mode: keep accepting input, produce no output
    stalled: AtomicBool,
    /// Fault to emit on the next frame submission
    fault_next: Mutex<Option<DecoderFault>>,
    /// Make the next `queue_input` return an error without consuming
    /// the submission
    reject_next: Mutex<Option<String>>,
    configured: AtomicBool,
    running: AtomicBool,
    configure_calls: AtomicU32,
    start_calls: AtomicU32,
    stop_calls: AtomicU32,
    flush_calls: AtomicU32,
    outputs_released: AtomicU32,
}

impl MockShared {
    fn post(&self, event: DecoderEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            // Never block from callback context; a full channel drops
            // the event the way a saturated real decoder would.
            if tx.try_send(event).is_err() {
                trace!("Mock decoder event channel full, event dropped");
            }
        }
    }
}

/// Scriptable decoder double
pub struct MockDecoder {
    shared: Arc<MockShared>,
    input_slots: u32,
}

impl MockDecoder {
    /// Create a decoder with `input_slots` free buffers, plus its
    /// control handle.
    pub fn with_slots(input_slots: u32) -> (Self, MockControl) {
        let shared = Arc::new(MockShared::default());
        (
            Self {
                shared: Arc::clone(&shared),
                input_slots,
            },
            MockControl { shared },
        )
    }

    pub fn new() -> (Self, MockControl) {
        Self::with_slots(4)
    }
}

impl HardwareDecoder for MockDecoder {
    fn configure(
        &mut self,
        format: &DecoderFormat,
        surface: SurfaceHandle,
        events: DecoderEventSender,
    ) -> Result<()> {
        debug!(
            "Mock decoder configured: {}x{} @ {} fps, surface {}",
            format.width, format.height, format.fps, surface.id
        );
        *self.shared.events.lock() = Some(events);
        *self.shared.surface.lock() = Some(surface);
        self.shared.configured.store(true, Ordering::SeqCst);
        self.shared.configure_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if !self.shared.configured.load(Ordering::SeqCst) {
            return Err(PipelineError::Decoder(
                "start before configure".to_string(),
            ));
        }
        self.shared.running.store(true, Ordering::SeqCst);
        self.shared.start_calls.fetch_add(1, Ordering::SeqCst);
        for slot in 0..self.input_slots {
            self.shared.post(DecoderEvent::InputSlotAvailable(InputSlot(slot)));
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.configured.store(false, Ordering::SeqCst);
        self.shared.stop_calls.fetch_add(1, Ordering::SeqCst);
        *self.shared.events.lock() = None;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.shared.flush_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn queue_input(
        &mut self,
        slot: InputSlot,
        payload: &[u8],
        pts_us: i64,
        kind: SubmitKind,
    ) -> Result<()> {
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(PipelineError::Decoder("queue_input while stopped".to_string()));
        }
        if let Some(reason) = self.shared.reject_next.lock().take() {
            return Err(PipelineError::Decoder(reason));
        }

        self.shared.submissions.lock().push(Submission {
            kind,
            payload: payload.to_vec(),
            pts_us,
        });

        if let Some(fault) = self.shared.fault_next.lock().take() {
            self.shared.post(DecoderEvent::Error(fault));
            self.shared.post(DecoderEvent::InputSlotAvailable(slot));
            return Ok(());
        }

        // Config data primes the decoder without producing a picture
        if kind == SubmitKind::Frame && !self.shared.stalled.load(Ordering::SeqCst) {
            self.shared.post(DecoderEvent::OutputReady {
                slot: OutputSlot(slot.0),
                size: payload.len(),
                pts_us,
            });
        }
        self.shared.post(DecoderEvent::InputSlotAvailable(slot));
        Ok(())
    }

    fn release_output(&mut self, _slot: OutputSlot, _render: bool) -> Result<()> {
        self.shared.outputs_released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Test/demo handle into a [`MockDecoder`]
#[derive(Clone)]
pub struct MockControl {
    shared: Arc<MockShared>,
}

impl MockControl {
    /// Enter or leave zombie mode: input keeps flowing, output stops.
    pub fn set_stalled(&self, stalled: bool) {
        self.shared.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Emit `fault` on the next frame submission
    pub fn fail_next(&self, fault: DecoderFault) {
        *self.shared.fault_next.lock() = Some(fault);
    }

    /// Make the next `queue_input` call fail synchronously
    pub fn reject_next(&self, reason: &str) {
        *self.shared.reject_next.lock() = Some(reason.to_string());
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.shared.submissions.lock().clone()
    }

    pub fn clear_submissions(&self) {
        self.shared.submissions.lock().clear();
    }

    pub fn configure_calls(&self) -> u32 {
        self.shared.configure_calls.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> u32 {
        self.shared.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> u32 {
        self.shared.stop_calls.load(Ordering::SeqCst)
    }

    pub fn flush_calls(&self) -> u32 {
        self.shared.flush_calls.load(Ordering::SeqCst)
    }

    pub fn outputs_released(&self) -> u32 {
        self.shared.outputs_released.load(Ordering::SeqCst)
    }

    pub fn surface(&self) -> Option<SurfaceHandle> {
        self.shared.surface.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn format() -> DecoderFormat {
        DecoderFormat {
            width: 1280,
            height: 720,
            fps: 30,
        }
    }

    #[test]
    fn test_start_announces_slots() {
        let (mut decoder, _control) = MockDecoder::with_slots(3);
        let (tx, rx) = mpsc::sync_channel(16);
        decoder.configure(&format(), SurfaceHandle::new(1), tx).unwrap();
        decoder.start().unwrap();

        let mut slots = 0;
        while let Ok(DecoderEvent::InputSlotAvailable(_)) = rx.try_recv() {
            slots += 1;
        }
        assert_eq!(slots, 3);
    }

    #[test]
    fn test_frame_produces_output_and_recycles_slot() {
        let (mut decoder, control) = MockDecoder::with_slots(1);
        let (tx, rx) = mpsc::sync_channel(16);
        decoder.configure(&format(), SurfaceHandle::new(1), tx).unwrap();
        decoder.start().unwrap();
        let _ = rx.try_recv();

        decoder
            .queue_input(InputSlot(0), &[1, 2, 3], 1000, SubmitKind::Frame)
            .unwrap();

        match rx.try_recv().unwrap() {
            DecoderEvent::OutputReady { size, pts_us, .. } => {
                assert_eq!(size, 3);
                assert_eq!(pts_us, 1000);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(
            rx.try_recv().unwrap(),
            DecoderEvent::InputSlotAvailable(InputSlot(0))
        ));
        assert_eq!(control.submissions().len(), 1);
    }

    #[test]
    fn test_config_data_produces_no_output() {
        let (mut decoder, _control) = MockDecoder::with_slots(1);
        let (tx, rx) = mpsc::sync_channel(16);
        decoder.configure(&format(), SurfaceHandle::new(1), tx).unwrap();
        decoder.start().unwrap();
        let _ = rx.try_recv();

        decoder
            .queue_input(InputSlot(0), &[0x67], 0, SubmitKind::ConfigData)
            .unwrap();
        // Only the slot recycle, no OutputReady
        assert!(matches!(
            rx.try_recv().unwrap(),
            DecoderEvent::InputSlotAvailable(_)
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stalled_swallows_frames() {
        let (mut decoder, control) = MockDecoder::with_slots(1);
        let (tx, rx) = mpsc::sync_channel(16);
        decoder.configure(&format(), SurfaceHandle::new(1), tx).unwrap();
        decoder.start().unwrap();
        let _ = rx.try_recv();

        control.set_stalled(true);
        decoder
            .queue_input(InputSlot(0), &[1, 2, 3], 0, SubmitKind::Frame)
            .unwrap();
        // Slot recycles (input accepted) but nothing decoded
        assert!(matches!(
            rx.try_recv().unwrap(),
            DecoderEvent::InputSlotAvailable(_)
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_reject_next_fails_without_recording() {
        let (mut decoder, control) = MockDecoder::with_slots(1);
        let (tx, rx) = mpsc::sync_channel(16);
        decoder.configure(&format(), SurfaceHandle::new(1), tx).unwrap();
        decoder.start().unwrap();
        let _ = rx.try_recv();

        control.reject_next("queue full");
        assert!(decoder
            .queue_input(InputSlot(0), &[1, 2, 3], 0, SubmitKind::Frame)
            .is_err());
        assert!(control.submissions().is_empty());
        // One-shot: the next submission goes through
        assert!(decoder
            .queue_input(InputSlot(0), &[1, 2, 3], 0, SubmitKind::Frame)
            .is_ok());
        assert_eq!(control.submissions().len(), 1);
    }

    #[test]
    fn test_queue_while_stopped_fails() {
        let (mut decoder, _control) = MockDecoder::with_slots(1);
        assert!(decoder
            .queue_input(InputSlot(0), &[0], 0, SubmitKind::Frame)
            .is_err());
    }
}
