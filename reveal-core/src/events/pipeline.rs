//! Event pipeline: enrich, buffer, flush.
//!
//! `capture_event` is the only writer and `flush` the only drainer. At most
//! one flush runs at a time; a flush requested while another is running is
//! dropped, not queued. The buffer is drained into a snapshot before the
//! network call, so events captured mid-send wait for the next flush.
//!
//! Teardown never drops a drained snapshot: a normal-mode send interrupted by
//! [`EventPipeline::destroy`] puts its batch back, and the final beacon flush
//! waits for the flush lock before draining what remains.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::buffer::{order_for_delivery, requeue_failed};
use super::types::{BaseEvent, EventKind};
use crate::browser::SharedPage;
use crate::clock::SharedClock;
use crate::config::SdkConfig;
use crate::session::SharedSession;
use crate::transport::{DeliveryMode, Transport, TransportError};

/// Upper bound on how often the periodic timer re-checks the flush condition.
pub const PERIODIC_CHECK_MS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub event_batch_size: usize,
    pub max_flush_interval_ms: u64,
    pub max_buffer_size: usize,
}

impl PipelineConfig {
    pub fn from_sdk(config: &SdkConfig) -> Self {
        Self {
            event_batch_size: config.event_batch_size,
            max_flush_interval_ms: config.max_flush_interval_ms,
            max_buffer_size: config.max_buffer_size,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_sdk(&SdkConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Sent { events: usize },
    /// Delivery failed; the snapshot went back into the buffer.
    Requeued { requeued: usize, dropped: usize },
    InFlight,
    NotDue,
    Empty,
}

struct PipelineInner {
    config: PipelineConfig,
    transport: Arc<Transport>,
    session: SharedSession,
    page: SharedPage,
    clock: SharedClock,
    buffer: Mutex<Vec<BaseEvent>>,
    /// Held for the whole of a flush, snapshot to requeue.
    flush_lock: tokio::sync::Mutex<()>,
    destroyed: AtomicBool,
    shutdown: CancellationToken,
    last_flush_ms: AtomicU64,
    periodic: Mutex<Option<JoinHandle<()>>>,
}

/// Cheap-to-clone handle; all clones share one buffer.
#[derive(Clone)]
pub struct EventPipeline {
    inner: Arc<PipelineInner>,
}

impl EventPipeline {
    pub fn new(
        config: PipelineConfig,
        transport: Arc<Transport>,
        session: SharedSession,
        page: SharedPage,
        clock: SharedClock,
    ) -> Self {
        let now = clock.now_ms();
        Self {
            inner: Arc::new(PipelineInner {
                config,
                transport,
                session,
                page,
                clock,
                buffer: Mutex::new(Vec::new()),
                flush_lock: tokio::sync::Mutex::new(()),
                destroyed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                last_flush_ms: AtomicU64::new(now),
                periodic: Mutex::new(None),
            }),
        }
    }

    fn buffer(&self) -> MutexGuard<'_, Vec<BaseEvent>> {
        self.inner.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enrich and buffer one event. No-op after [`destroy`](Self::destroy).
    pub fn capture_event(
        &self,
        kind: EventKind,
        name: &str,
        payload: Map<String, Value>,
        flush_immediately: bool,
    ) {
        if self.is_destroyed() {
            debug!(%kind, name, "Pipeline destroyed; event ignored");
            return;
        }
        let event = BaseEvent::enrich(
            kind,
            name,
            payload,
            self.inner.session.as_ref(),
            self.inner.page.as_ref(),
            self.inner.clock.now_ms(),
        );
        let len = {
            let mut buffer = self.buffer();
            buffer.push(event);
            buffer.len()
        };
        debug!(%kind, name, buffered = len, "Event captured");

        if flush_immediately || len >= self.inner.config.event_batch_size {
            self.spawn_flush();
        }
    }

    fn spawn_flush(&self) {
        match Handle::try_current() {
            Ok(handle) => {
                let pipeline = self.clone();
                handle.spawn(async move { pipeline.flush(true, DeliveryMode::Normal).await });
            }
            Err(_) => debug!("No async runtime; flush deferred to the next trigger"),
        }
    }

    /// Drain and deliver the buffer.
    ///
    /// Unless `force` is set, only runs once `max_flush_interval_ms` has
    /// elapsed since the last flush or the buffer holds a full batch.
    pub async fn flush(&self, force: bool, mode: DeliveryMode) -> FlushOutcome {
        let Ok(_guard) = self.inner.flush_lock.try_lock() else {
            debug!("Flush already in flight; skipping");
            return FlushOutcome::InFlight;
        };
        self.flush_locked(force, mode).await
    }

    async fn flush_locked(&self, force: bool, mode: DeliveryMode) -> FlushOutcome {
        let now = self.inner.clock.now_ms();
        let snapshot = {
            let mut buffer = self.buffer();
            if buffer.is_empty() {
                return FlushOutcome::Empty;
            }
            if !force {
                let elapsed = now.saturating_sub(self.inner.last_flush_ms.load(Ordering::Acquire));
                if elapsed < self.inner.config.max_flush_interval_ms
                    && buffer.len() < self.inner.config.event_batch_size
                {
                    return FlushOutcome::NotDue;
                }
            }
            std::mem::take(&mut *buffer)
        };
        self.inner.last_flush_ms.store(now, Ordering::Release);

        let batch = order_for_delivery(snapshot);
        let count = batch.len();
        let sent = match mode {
            DeliveryMode::Beacon => self.inner.transport.send_batch(&batch, mode).await,
            DeliveryMode::Normal => tokio::select! {
                biased;
                _ = self.inner.shutdown.cancelled() => {
                    debug!(events = count, "Shutdown interrupted flush; batch goes back to the buffer");
                    Err(TransportError::aborted("pipeline shutting down"))
                }
                result = self.inner.transport.send_batch(&batch, mode) => result,
            },
        };
        match sent {
            Ok(()) => FlushOutcome::Sent { events: count },
            Err(_) => {
                let mut buffer = self.buffer();
                let current = std::mem::take(&mut *buffer);
                let requeue = requeue_failed(current, batch, self.inner.config.max_buffer_size);
                *buffer = requeue.buffer;
                if requeue.dropped > 0 {
                    warn!(
                        dropped = requeue.dropped,
                        requeued = requeue.requeued,
                        max_buffer_size = self.inner.config.max_buffer_size,
                        "Event buffer overflow; dropped non-critical events"
                    );
                } else {
                    debug!(requeued = requeue.requeued, "Failed batch requeued");
                }
                FlushOutcome::Requeued {
                    requeued: requeue.requeued,
                    dropped: requeue.dropped,
                }
            }
        }
    }

    /// Install the periodic flush timer. A second call is a no-op.
    pub fn start_periodic_flush(&self) {
        let mut periodic = self.inner.periodic.lock().unwrap_or_else(|e| e.into_inner());
        if periodic.is_some() || self.is_destroyed() {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            warn!("No async runtime; periodic flush not started");
            return;
        };

        let period = Duration::from_millis(
            self.inner
                .config
                .max_flush_interval_ms
                .clamp(1, PERIODIC_CHECK_MS),
        );
        let pipeline = self.clone();
        let shutdown = self.inner.shutdown.clone();
        *periodic = Some(handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                pipeline.flush(false, DeliveryMode::Normal).await;
            }
            debug!("Periodic flush stopped");
        }));
        info!(period_ms = period.as_millis() as u64, "Periodic flush started");
    }

    pub fn is_periodic_flush_running(&self) -> bool {
        self.inner
            .periodic
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Stop the timer and fire one best-effort beacon flush.
    ///
    /// Any normal flush still running is interrupted and requeues its batch;
    /// the final flush waits for it, then drains the whole buffer. Returns the
    /// final flush task, or `None` when already destroyed or no runtime is
    /// available.
    pub fn destroy(&self) -> Option<JoinHandle<FlushOutcome>> {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return None;
        }
        self.inner.shutdown.cancel();
        let periodic = self
            .inner
            .periodic
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        info!(buffered = self.buffered_len(), "Pipeline destroyed; final beacon flush");

        let Ok(handle) = Handle::try_current() else {
            warn!(buffered = self.buffered_len(), "No async runtime; final flush skipped");
            return None;
        };
        let pipeline = self.clone();
        Some(handle.spawn(async move {
            if let Some(task) = periodic {
                if let Err(e) = task.await {
                    warn!("Periodic flush task failed: {}", e);
                }
            }
            let _guard = pipeline.inner.flush_lock.lock().await;
            pipeline.flush_locked(true, DeliveryMode::Beacon).await
        }))
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    pub fn is_flush_in_flight(&self) -> bool {
        self.inner.flush_lock.try_lock().is_err()
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer().len()
    }

    /// Copy of the buffered events in buffer order.
    pub fn snapshot(&self) -> Vec<BaseEvent> {
        self.buffer().clone()
    }
}

impl std::fmt::Debug for EventPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPipeline")
            .field("config", &self.inner.config)
            .field("buffered", &self.buffered_len())
            .field("in_flight", &self.is_flush_in_flight())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
