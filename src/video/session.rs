//! Codec session lifecycle and frame feeding
//!
//! Owns the hardware decoder handle and everything between the
//! transport and the display surface: the ingest path staging frames
//! into the ring, the feeder thread draining it into the decoder in
//! order, sync acquisition with SPS/PPS bundle splitting, backpressure
//! drops, and the throttled reset path the watchdog and decoder errors
//! feed into.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc as async_mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use super::config_cache::ConfigCache;
use super::decoder::{
    DecoderEvent, DecoderFault, DecoderFormat, HardwareDecoder, InputSlot, SubmitKind,
    SurfaceHandle,
};
use super::frame::EncodedFrame;
use super::nal::{self, NalType};
use super::pool::FramePool;
use super::reset_throttle::ResetThrottle;
use super::ring::StagingRing;
use super::stats::{CounterSnapshot, DropAccounting, DropStats, PipelineCounters};
use super::watchdog::HealthWatchdog;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::utils::Cooldown;
use crate::warn_cooled;

/// Capacity of the decoder event channel. Generous relative to the
/// buffer counts so a callback burst never blocks the decoder side.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Poll interval for the feeder when no decoder events arrive
const FEEDER_IDLE_WAIT: Duration = Duration::from_millis(10);

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Configured,
    Running,
    Paused,
    Resetting,
    Stopped,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "Uninitialized",
            SessionState::Configured => "Configured",
            SessionState::Running => "Running",
            SessionState::Paused => "Paused",
            SessionState::Resetting => "Resetting",
            SessionState::Stopped => "Stopped",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Upstream transport hooks the session calls back into
pub trait UpstreamControl: Send + Sync {
    /// Ask the source for a fresh IDR (sync loss, reset, keyframe drop)
    fn request_keyframe(&self);
}

/// Commands posted to the supervisor task by the feeder, the decoder
/// callbacks and the watchdog. None of those contexts may touch the
/// lifecycle lock directly.
#[derive(Debug)]
pub enum SessionCommand {
    /// Recoverable trouble; supervisor applies the reset throttle
    Reset { reason: String },
    /// Non-recoverable, non-transient decoder failure; surfaced upward
    Fatal { fault: DecoderFault },
    /// Watchdog saw successful decode this tick
    Healthy,
    /// Session is shutting down; supervisor exits
    Shutdown,
}

/// Keyframe requests toward the upstream source, cooldown-gated so a
/// burst of drops cannot flood the adapter.
pub struct KeyframeRequester {
    upstream: Arc<dyn UpstreamControl>,
    cooldown: Cooldown,
}

impl KeyframeRequester {
    fn new(upstream: Arc<dyn UpstreamControl>, cooldown_ms: u64) -> Self {
        Self {
            upstream,
            cooldown: Cooldown::from_millis(cooldown_ms),
        }
    }

    /// Request unless inside the cooldown window
    pub fn request(&self) {
        if self.cooldown.try_fire() {
            debug!("Requesting keyframe from upstream");
            self.upstream.request_keyframe();
        }
    }

    /// Request unconditionally (mandatory post-reset refresh) and arm
    /// the cooldown so reactive requests wait their turn.
    pub fn request_now(&self) {
        self.cooldown.force();
        debug!("Requesting keyframe from upstream (forced)");
        self.upstream.request_keyframe();
    }
}

/// Read-only health/metrics snapshot
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionStats {
    pub state: &'static str,
    pub sync_acquired: bool,
    pub counters: CounterSnapshot,
    pub idr_drops: u64,
    pub delta_drops: u64,
    pub total_drops: u64,
    pub ring_depth: usize,
    pub pool_available: usize,
}

struct Lifecycle {
    feeder: Option<tokio::task::JoinHandle<()>>,
    supervisor: Option<tokio::task::JoinHandle<()>>,
    watchdog: Option<tokio::task::JoinHandle<()>>,
    watchdog_stop: Option<watch::Sender<bool>>,
    commands_rx: Option<async_mpsc::UnboundedReceiver<SessionCommand>>,
}

/// The decoder session.
///
/// `submit_frame` is called by the transport's ingest thread; all
/// lifecycle operations (`start`/`stop`/`pause`/`resume`/`reset`) are
/// serialized by one lifecycle lock. The staging ring between the two
/// is the only lock-free hot-path structure.
pub struct CodecSession {
    config: PipelineConfig,
    format: Arc<SyncMutex<DecoderFormat>>,
    decoder: Arc<SyncMutex<Option<Box<dyn HardwareDecoder>>>>,
    surface: SyncMutex<Option<SurfaceHandle>>,
    pool: FramePool,
    ring: Arc<StagingRing<EncodedFrame>>,
    counters: Arc<PipelineCounters>,
    drops: Arc<DropAccounting>,
    config_cache: Arc<SyncMutex<ConfigCache>>,
    state_tx: watch::Sender<SessionState>,
    state_rx: watch::Receiver<SessionState>,
    sync_acquired: Arc<AtomicBool>,
    feeder_stop: Arc<AtomicBool>,
    keyframe: Arc<KeyframeRequester>,
    ingest_drop_log: Cooldown,
    /// Refreshed together with the supervisor on each restart
    commands_tx: SyncMutex<async_mpsc::UnboundedSender<SessionCommand>>,
    /// Start of the current activation (start or last reset); anchors
    /// the watchdog grace period
    activated_at: Arc<SyncMutex<Instant>>,
    last_error: Arc<parking_lot::RwLock<Option<(String, String)>>>,
    lifecycle: Mutex<Lifecycle>,
}

impl CodecSession {
    /// Create a session. The decoder handle arrives via [`Self::configure`].
    pub fn new(config: PipelineConfig, upstream: Arc<dyn UpstreamControl>) -> Arc<Self> {
        let (state_tx, state_rx) = watch::channel(SessionState::Uninitialized);
        let (commands_tx, commands_rx) = async_mpsc::unbounded_channel();
        let pool = FramePool::new(config.pool_slots, config.max_frame_bytes);
        let ring = Arc::new(StagingRing::new(config.staging_slots));
        let keyframe = Arc::new(KeyframeRequester::new(upstream, config.keyframe_cooldown_ms));

        Arc::new(Self {
            format: Arc::new(SyncMutex::new(DecoderFormat {
                width: 0,
                height: 0,
                fps: config.fps,
            })),
            decoder: Arc::new(SyncMutex::new(None)),
            surface: SyncMutex::new(None),
            pool,
            ring,
            counters: Arc::new(PipelineCounters::new()),
            drops: Arc::new(DropAccounting::new()),
            config_cache: Arc::new(SyncMutex::new(ConfigCache::new())),
            state_tx,
            state_rx,
            sync_acquired: Arc::new(AtomicBool::new(false)),
            feeder_stop: Arc::new(AtomicBool::new(false)),
            keyframe,
            ingest_drop_log: Cooldown::from_millis(1000),
            commands_tx: SyncMutex::new(commands_tx),
            activated_at: Arc::new(SyncMutex::new(Instant::now())),
            last_error: Arc::new(parking_lot::RwLock::new(None)),
            lifecycle: Mutex::new(Lifecycle {
                feeder: None,
                supervisor: None,
                watchdog: None,
                watchdog_stop: None,
                commands_rx: Some(commands_rx),
            }),
            config,
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to lifecycle state changes
    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Whether a valid IDR+config bundle has been fed since the last
    /// discontinuity
    pub fn sync_acquired(&self) -> bool {
        self.sync_acquired.load(Ordering::Acquire)
    }

    /// Most recent fatal decoder failure (kind, reason), if any
    pub fn last_error(&self) -> Option<(String, String)> {
        self.last_error.read().clone()
    }

    /// Health/metrics snapshot for external reporting
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            state: self.state().name(),
            sync_acquired: self.sync_acquired(),
            counters: self.counters.snapshot(),
            idr_drops: self.drops.idr_drops(),
            delta_drops: self.drops.delta_drops(),
            total_drops: self.drops.total_drops(),
            ring_depth: self.ring.len(),
            pool_available: self.pool.available(),
        }
    }

    /// Read and clear the per-interval drop window
    pub fn interval_drop_stats(&self) -> DropStats {
        self.drops.snapshot_and_reset()
    }

    /// Install the decoder handle, stream format and output surface.
    pub async fn configure(
        self: &Arc<Self>,
        decoder: Box<dyn HardwareDecoder>,
        format: DecoderFormat,
        surface: SurfaceHandle,
    ) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        let state = self.state();
        if !matches!(state, SessionState::Uninitialized | SessionState::Stopped) {
            return Err(PipelineError::InvalidState {
                expected: "Uninitialized or Stopped",
                actual: state.name(),
            });
        }
        info!(
            "Configuring session: {}x{} @ {} fps on {} decoder",
            format.width,
            format.height,
            format.fps,
            decoder.name()
        );
        *self.decoder.lock() = Some(decoder);
        *self.format.lock() = format;
        *self.surface.lock() = Some(surface);
        let _ = self.state_tx.send(SessionState::Configured);
        Ok(())
    }

    /// Start decoding: activates the decoder and spawns the feeder,
    /// supervisor and watchdog.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let state = self.state();
        if state == SessionState::Running {
            return Ok(());
        }
        if state != SessionState::Configured {
            return Err(PipelineError::InvalidState {
                expected: "Configured",
                actual: state.name(),
            });
        }

        self.spawn_supervisor_locked(&mut lifecycle);
        self.activate_locked(&mut lifecycle)?;
        self.spawn_watchdog_locked(&mut lifecycle);

        let _ = self.state_tx.send(SessionState::Running);
        info!("Session running");
        Ok(())
    }

    /// Stop everything. Terminal until [`Self::configure`] + [`Self::start`].
    pub async fn stop(self: &Arc<Self>) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.state() == SessionState::Stopped {
            return Ok(());
        }
        info!("Stopping session");

        if let Some(stop_tx) = lifecycle.watchdog_stop.take() {
            let _ = stop_tx.send(true);
        }
        lifecycle.watchdog = None;
        let _ = self.commands_tx.lock().send(SessionCommand::Shutdown);
        lifecycle.supervisor = None;

        self.stop_feeder_locked(&mut lifecycle).await;
        self.ring.drain();

        if let Some(decoder) = self.decoder.lock().as_mut() {
            if let Err(e) = decoder.stop() {
                warn!("Decoder stop failed: {}", e);
            }
        }
        let _ = self.state_tx.send(SessionState::Stopped);
        Ok(())
    }

    /// Flush the decoder and park the session
    pub async fn pause(self: &Arc<Self>) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let state = self.state();
        if state != SessionState::Running {
            return Err(PipelineError::InvalidState {
                expected: "Running",
                actual: state.name(),
            });
        }
        info!("Pausing session");
        self.stop_feeder_locked(&mut lifecycle).await;
        self.ring.drain();
        if let Some(decoder) = self.decoder.lock().as_mut() {
            decoder.flush()?;
        }
        let _ = self.state_tx.send(SessionState::Paused);
        Ok(())
    }

    /// Resume onto `surface`. A pause always tears the asynchronous
    /// callback cycle down, so resuming restarts it regardless of
    /// whether the surface identity changed.
    pub async fn resume(self: &Arc<Self>, surface: SurfaceHandle) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let state = self.state();
        if state != SessionState::Paused {
            return Err(PipelineError::InvalidState {
                expected: "Paused",
                actual: state.name(),
            });
        }
        let changed = self.surface.lock().as_ref() != Some(&surface);
        info!(
            "Resuming session on surface {} (changed: {})",
            surface.id, changed
        );
        *self.surface.lock() = Some(surface);

        if let Some(decoder) = self.decoder.lock().as_mut() {
            decoder.stop()?;
        }
        self.activate_locked(&mut lifecycle)?;
        let _ = self.state_tx.send(SessionState::Running);
        // The flush discarded reference state; nothing decodes until a
        // fresh keyframe arrives.
        self.keyframe.request_now();
        Ok(())
    }

    /// Full session reset: stop, reconfigure, start. A flush alone does
    /// not clear corrupted decoder reference state.
    pub async fn reset(self: &Arc<Self>) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let state = self.state();
        if !matches!(state, SessionState::Running | SessionState::Paused) {
            debug!("Reset skipped in state {}", state);
            return Ok(());
        }
        warn!("Resetting decoder session");
        let _ = self.state_tx.send(SessionState::Resetting);

        self.stop_feeder_locked(&mut lifecycle).await;
        let stale = self.ring.drain();
        if stale > 0 {
            debug!("Discarded {} stale staged frames", stale);
        }
        if let Some(decoder) = self.decoder.lock().as_mut() {
            if let Err(e) = decoder.stop() {
                warn!("Decoder stop during reset failed: {}", e);
            }
        }
        self.activate_locked(&mut lifecycle)?;
        self.counters.record_reset();
        let _ = self.state_tx.send(SessionState::Running);
        // The reset destroyed whatever reference state the decoder
        // held; the upstream must send config + IDR again.
        self.keyframe.request_now();
        info!("Session reset complete");
        Ok(())
    }

    /// Non-blocking frame submission from the transport's ingest
    /// thread. Returns `false` when the frame was rejected or dropped.
    pub fn submit_frame(&self, data: &[u8]) -> bool {
        if self.state() != SessionState::Running {
            self.counters.record_rejected();
            return false;
        }
        if data.is_empty() || data.len() > self.config.max_frame_bytes {
            self.counters.record_rejected();
            warn_cooled!(
                self.ingest_drop_log,
                "Rejecting malformed frame ({} bytes, limit {})",
                data.len(),
                self.config.max_frame_bytes
            );
            return false;
        }

        let Some(mut buffer) = self.pool.acquire() else {
            // Pool exhausted: the feeder is behind, shed the new frame
            self.account_ingest_drop(data, "pool exhausted");
            return false;
        };
        if !buffer.fill(data) {
            // Pool buffers are sized to max_frame_bytes; a failed fill
            // means the two limits diverged and the frame cannot stage
            self.counters.record_rejected();
            warn_cooled!(
                self.ingest_drop_log,
                "Frame exceeds pool buffer capacity ({} bytes)",
                data.len()
            );
            return false;
        }
        let sequence = self.counters.record_received();
        match self.ring.try_push(EncodedFrame::new(buffer, sequence)) {
            Ok(()) => true,
            Err(frame) => {
                // Oldest staged frames keep their place; the newcomer loses
                drop(frame);
                self.account_ingest_drop(data, "staging ring full");
                false
            }
        }
    }

    fn account_ingest_drop(&self, data: &[u8], cause: &str) {
        let is_keyframe = matches!(
            nal::classify(data, self.config.nal_scan_window),
            Some(NalType::IdrSlice | NalType::Sps)
        );
        self.drops.record_drop(is_keyframe);
        warn_cooled!(
            self.ingest_drop_log,
            "Dropping frame at ingest ({}), keyframe: {}",
            cause,
            is_keyframe
        );
        if is_keyframe {
            // A lost keyframe poisons everything until the next one
            self.keyframe.request();
        }
    }

    /// (Re)configure and start the decoder, then spawn a fresh feeder.
    /// Caller holds the lifecycle lock with the feeder stopped.
    fn activate_locked(self: &Arc<Self>, lifecycle: &mut Lifecycle) -> Result<()> {
        let (events_tx, events_rx) = mpsc::sync_channel(EVENT_CHANNEL_CAPACITY);
        let surface = self
            .surface
            .lock()
            .clone()
            .ok_or_else(|| PipelineError::Config("no output surface bound".to_string()))?;
        let format = self.format.lock().clone();

        {
            let mut guard = self.decoder.lock();
            let decoder = guard
                .as_mut()
                .ok_or_else(|| PipelineError::Config("no decoder installed".to_string()))?;
            decoder.configure(&format, surface, events_tx)?;
            decoder.start()?;
        }

        self.sync_acquired.store(false, Ordering::Release);
        self.feeder_stop.store(false, Ordering::SeqCst);
        *self.activated_at.lock() = Instant::now();

        let ctx = FeederContext {
            config: self.config.clone(),
            decoder: Arc::clone(&self.decoder),
            ring: Arc::clone(&self.ring),
            counters: Arc::clone(&self.counters),
            drops: Arc::clone(&self.drops),
            config_cache: Arc::clone(&self.config_cache),
            sync_acquired: Arc::clone(&self.sync_acquired),
            stop: Arc::clone(&self.feeder_stop),
            commands: self.commands_tx.lock().clone(),
            keyframe: Arc::clone(&self.keyframe),
            format: Arc::clone(&self.format),
        };
        lifecycle.feeder = Some(tokio::task::spawn_blocking(move || {
            feeder_loop(ctx, events_rx)
        }));
        Ok(())
    }

    /// Join the feeder with a bounded timeout. A thread that refuses to
    /// die is logged and abandoned; leaking it beats hanging teardown.
    async fn stop_feeder_locked(&self, lifecycle: &mut Lifecycle) {
        self.feeder_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = lifecycle.feeder.take() {
            let timeout = Duration::from_millis(self.config.feeder_join_timeout_ms);
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => debug!("Feeder thread joined"),
                Ok(Err(e)) => error!("Feeder thread panicked: {}", e),
                Err(_) => error!(
                    "Feeder thread failed to join within {:?}; proceeding with teardown",
                    timeout
                ),
            }
        }
    }

    fn spawn_supervisor_locked(self: &Arc<Self>, lifecycle: &mut Lifecycle) {
        let mut commands_rx = match lifecycle.commands_rx.take() {
            Some(rx) => rx,
            None => {
                // The previous supervisor left with the old channel on
                // stop; restart gets a fresh one.
                let (tx, rx) = async_mpsc::unbounded_channel();
                *self.commands_tx.lock() = tx;
                rx
            }
        };
        let session = Arc::downgrade(self);
        let mut throttle = ResetThrottle::new(self.config.reset.clone());
        let deny_log = Cooldown::from_millis(5000);
        lifecycle.supervisor = Some(tokio::spawn(async move {
            while let Some(command) = commands_rx.recv().await {
                let Some(session) = session.upgrade() else {
                    break;
                };
                match command {
                    SessionCommand::Healthy => {
                        throttle.record_healthy(Instant::now());
                    }
                    SessionCommand::Reset { reason } => {
                        if session.state() != SessionState::Running {
                            continue;
                        }
                        let now = Instant::now();
                        if throttle.allow_reset(now) {
                            warn!("Reset requested: {}", reason);
                            throttle.record_reset(now);
                            if let Err(e) = session.reset().await {
                                error!("Reset failed: {}", e);
                            }
                        } else {
                            warn_cooled!(
                                deny_log,
                                "Reset throttled (reason: {}, backoff {:?})",
                                reason,
                                throttle.current_backoff()
                            );
                        }
                    }
                    SessionCommand::Fatal { fault } => {
                        error!(
                            "Fatal decoder failure [{}]: {} — stopping session",
                            fault.kind, fault.reason
                        );
                        *session.last_error.write() =
                            Some((fault.kind.clone(), fault.reason.clone()));
                        if let Err(e) = session.stop().await {
                            error!("Stop after fatal failure failed: {}", e);
                        }
                    }
                    SessionCommand::Shutdown => break,
                }
            }
            debug!("Supervisor task exited");
        }));
    }

    fn spawn_watchdog_locked(self: &Arc<Self>, lifecycle: &mut Lifecycle) {
        if lifecycle.watchdog_stop.is_some() {
            return;
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        let watchdog = HealthWatchdog::new(
            self.config.watchdog.clone(),
            Arc::clone(&self.counters),
            self.commands_tx.lock().clone(),
            Arc::clone(&self.activated_at),
        );
        lifecycle.watchdog = Some(tokio::spawn(watchdog.run(stop_rx)));
        lifecycle.watchdog_stop = Some(stop_tx);
    }
}

/// Everything the feeder thread needs, detached from the session so the
/// blocking closure owns its world.
struct FeederContext {
    config: PipelineConfig,
    decoder: Arc<SyncMutex<Option<Box<dyn HardwareDecoder>>>>,
    ring: Arc<StagingRing<EncodedFrame>>,
    counters: Arc<PipelineCounters>,
    drops: Arc<DropAccounting>,
    config_cache: Arc<SyncMutex<ConfigCache>>,
    sync_acquired: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    commands: async_mpsc::UnboundedSender<SessionCommand>,
    keyframe: Arc<KeyframeRequester>,
    format: Arc<SyncMutex<DecoderFormat>>,
}

/// Feeder thread body: drain decoder events, then pump staged frames.
fn feeder_loop(ctx: FeederContext, events: Receiver<DecoderEvent>) {
    info!("Feeder thread started");
    let mut free_slots: VecDeque<InputSlot> = VecDeque::new();
    let mut last_injection: Option<Instant> = None;

    while !ctx.stop.load(Ordering::Relaxed) {
        match events.recv_timeout(FEEDER_IDLE_WAIT) {
            Ok(event) => {
                handle_decoder_event(&ctx, event, &mut free_slots);
                // Drain any burst before feeding
                while let Ok(event) = events.try_recv() {
                    handle_decoder_event(&ctx, event, &mut free_slots);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                if !ctx.stop.load(Ordering::Relaxed) {
                    let _ = ctx.commands.send(SessionCommand::Reset {
                        reason: "decoder event channel closed".to_string(),
                    });
                }
                break;
            }
        }
        pump_staged_frames(&ctx, &mut free_slots, &mut last_injection);
    }
    info!("Feeder thread exited");
}

fn handle_decoder_event(
    ctx: &FeederContext,
    event: DecoderEvent,
    free_slots: &mut VecDeque<InputSlot>,
) {
    match event {
        DecoderEvent::InputSlotAvailable(slot) => {
            // No frame staged right now: the slot waits here for one
            free_slots.push_back(slot);
        }
        DecoderEvent::OutputReady { slot, size, .. } => {
            let rendered = size > 0;
            if rendered {
                ctx.counters.record_decoded();
            }
            let mut guard = ctx.decoder.lock();
            if let Some(decoder) = guard.as_mut() {
                if let Err(e) = decoder.release_output(slot, rendered) {
                    warn!("Failed to release output buffer: {}", e);
                }
            }
        }
        DecoderEvent::Error(fault) => {
            if fault.recoverable || fault.transient {
                warn!(
                    "Recoverable decoder error [{}]: {}",
                    fault.kind, fault.reason
                );
                let _ = ctx.commands.send(SessionCommand::Reset {
                    reason: format!("decoder error: {}", fault.kind),
                });
            } else {
                let _ = ctx.commands.send(SessionCommand::Fatal { fault });
            }
        }
        DecoderEvent::FormatChanged {
            width,
            height,
            pixel_format,
        } => {
            info!(
                "Decoder output format changed: {}x{} (pixel format {})",
                width, height, pixel_format
            );
            let mut format = ctx.format.lock();
            format.width = width;
            format.height = height;
        }
    }
}

/// Drain the staging ring. Every staged frame is either submitted (a
/// free slot exists) or dropped — never re-queued, so latency cannot
/// accumulate behind a busy decoder.
fn pump_staged_frames(
    ctx: &FeederContext,
    free_slots: &mut VecDeque<InputSlot>,
    last_injection: &mut Option<Instant>,
) {
    while let Some(frame) = ctx.ring.try_pop() {
        if ctx.stop.load(Ordering::Relaxed) {
            return;
        }
        if free_slots.is_empty() {
            let is_keyframe = matches!(
                nal::classify(frame.data(), ctx.config.nal_scan_window),
                Some(NalType::IdrSlice | NalType::Sps)
            );
            ctx.drops.record_drop(is_keyframe);
            debug!(
                "Decoder busy, dropping staged frame #{} (keyframe: {})",
                frame.sequence, is_keyframe
            );
            if is_keyframe {
                ctx.keyframe.request();
            }
            continue;
        }
        feed_frame(ctx, &frame, free_slots, last_injection);
    }
}

fn feed_frame(
    ctx: &FeederContext,
    frame: &EncodedFrame,
    free_slots: &mut VecDeque<InputSlot>,
    last_injection: &mut Option<Instant>,
) {
    let data = frame.data();
    let leading = nal::classify(data, ctx.config.nal_scan_window);

    if !ctx.sync_acquired.load(Ordering::Acquire) {
        match leading {
            Some(nal_type) if nal_type.is_sync_point() => {
                acquire_sync(ctx, data, nal_type, free_slots);
            }
            _ => {
                // Undecodable before the first config/IDR
                ctx.drops.record_drop(false);
                ctx.keyframe.request();
            }
        }
        return;
    }

    match leading {
        Some(NalType::Sps) => {
            // Mid-stream configuration, possibly bundled with an IDR
            if let Some(split) = nal::bundle_split_point(data, ctx.config.bundle_scan_window) {
                observe_config_nals(ctx, &data[..split]);
                if submit(ctx, free_slots, &data[..split], SubmitKind::ConfigData) {
                    submit_or_drop_frame(ctx, free_slots, &data[split..], true);
                }
            } else {
                observe_config_nals(ctx, data);
                submit(ctx, free_slots, data, SubmitKind::ConfigData);
            }
        }
        Some(NalType::Pps) => {
            observe_config_nals(ctx, data);
            submit(ctx, free_slots, data, SubmitKind::ConfigData);
        }
        Some(NalType::IdrSlice) => {
            maybe_inject_config(ctx, free_slots, last_injection);
            submit_or_drop_frame(ctx, free_slots, data, true);
        }
        _ => {
            submit_or_drop_frame(ctx, free_slots, data, false);
        }
    }
}

/// First decodable frame after a discontinuity. Sync counts as acquired
/// only for submissions that actually reached the decoder; a bundle
/// whose keyframe half had to be dropped leaves the stream
/// unsynchronized until the requested IDR arrives.
fn acquire_sync(
    ctx: &FeederContext,
    data: &[u8],
    leading: NalType,
    free_slots: &mut VecDeque<InputSlot>,
) {
    let synced = match leading {
        NalType::Sps => {
            if let Some(split) = nal::bundle_split_point(data, ctx.config.bundle_scan_window) {
                observe_config_nals(ctx, &data[..split]);
                let config_fed = submit(ctx, free_slots, &data[..split], SubmitKind::ConfigData);
                let frame_fed = submit_or_drop_frame(ctx, free_slots, &data[split..], true);
                config_fed && frame_fed
            } else {
                // Config-only delivery; the IDR follows as its own frame
                observe_config_nals(ctx, data);
                submit(ctx, free_slots, data, SubmitKind::ConfigData)
            }
        }
        NalType::IdrSlice => {
            // Post-reset the decoder has no parameter sets; re-prime it
            // from the cache before the keyframe.
            let payload = ctx.config_cache.lock().build_injection_payload();
            if let Some(payload) = payload {
                submit(ctx, free_slots, &payload, SubmitKind::ConfigData);
            }
            submit_or_drop_frame(ctx, free_slots, data, true)
        }
        _ => unreachable!("caller checked is_sync_point"),
    };
    if synced {
        ctx.sync_acquired.store(true, Ordering::Release);
        info!("Stream sync acquired on {} frame", leading);
    }
}

/// Walk the Annex-B units in `data` and cache any SPS/PPS.
fn observe_config_nals(ctx: &FeederContext, data: &[u8]) {
    let mut cache = ctx.config_cache.lock();
    let mut from = 0;
    while let Some((offset, sc_len)) = nal::find_start_code(data, from, data.len()) {
        let header = offset + sc_len;
        if header >= data.len() {
            break;
        }
        let nal_type = NalType::from_header_byte(data[header]);
        let end = nal::find_start_code(data, header, data.len())
            .map(|(next, _)| next)
            .unwrap_or(data.len());
        cache.observe(nal_type, &data[offset..end]);
        from = end;
    }
}

/// Scheduled SPS/PPS re-injection ahead of an IDR, for transports that
/// send configuration only once per session.
fn maybe_inject_config(
    ctx: &FeederContext,
    free_slots: &mut VecDeque<InputSlot>,
    last_injection: &mut Option<Instant>,
) {
    let Some(refresh_secs) = ctx.config.config_refresh_secs else {
        return;
    };
    let due = match *last_injection {
        None => true,
        Some(at) => at.elapsed() >= Duration::from_secs(refresh_secs),
    };
    if !due {
        return;
    }
    let payload = ctx.config_cache.lock().build_injection_payload();
    if let Some(payload) = payload {
        debug!("Injecting refreshed configuration ahead of IDR");
        if submit(ctx, free_slots, &payload, SubmitKind::ConfigData) {
            *last_injection = Some(Instant::now());
        }
    }
}

/// Submit a frame payload, or account the drop when no slot is free.
/// Returns whether the frame reached the decoder.
fn submit_or_drop_frame(
    ctx: &FeederContext,
    free_slots: &mut VecDeque<InputSlot>,
    payload: &[u8],
    is_keyframe: bool,
) -> bool {
    if free_slots.is_empty() {
        ctx.drops.record_drop(is_keyframe);
        if is_keyframe {
            ctx.keyframe.request();
        }
        return false;
    }
    submit(ctx, free_slots, payload, SubmitKind::Frame)
}

/// Hand `payload` to the decoder on the next free slot. Returns whether
/// the submission went through. Frame submissions consume a synthesized
/// monotonic timestamp; configuration data is timestamped zero.
fn submit(
    ctx: &FeederContext,
    free_slots: &mut VecDeque<InputSlot>,
    payload: &[u8],
    kind: SubmitKind,
) -> bool {
    let Some(slot) = free_slots.pop_front() else {
        return false;
    };
    // The feed index only advances on success; a rejected submission
    // must not leave a hole in the synthesized timestamp sequence.
    let pts_us = match kind {
        SubmitKind::Frame => ctx.counters.frames_fed() as i64 * ctx.config.pts_step_us(),
        SubmitKind::ConfigData => 0,
    };

    let mut guard = ctx.decoder.lock();
    let Some(decoder) = guard.as_mut() else {
        free_slots.push_front(slot);
        return false;
    };
    match decoder.queue_input(slot, payload, pts_us, kind) {
        Ok(()) => {
            if kind == SubmitKind::Frame {
                ctx.counters.record_fed();
                ctx.drops.record_feed_success();
            }
            true
        }
        Err(e) => {
            warn!("Decoder rejected submission: {}", e);
            free_slots.push_front(slot);
            let _ = ctx.commands.send(SessionCommand::Reset {
                reason: format!("submission failed: {}", e),
            });
            false
        }
    }
}
