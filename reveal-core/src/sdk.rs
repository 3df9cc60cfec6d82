//! The SDK instance: wires detectors, pipeline, transport and decisions.
//!
//! Each [`Sdk`] owns its own state; several instances can coexist in one
//! process. Nothing in here returns an error to the host after `build()`:
//! failures are logged and the SDK fails open.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::browser::{BrowserEvent, PageState, SharedPage};
use crate::clock::{SharedClock, SystemClock};
use crate::config::{ConfigError, SdkConfig, SDK_VERSION};
use crate::decision::{DecisionClient, DecisionContext, NudgeDecision};
use crate::detectors::{DetectorCoordinator, IdleWatch, POLL_INTERVAL_MS};
use crate::events::{EventKind, EventPipeline, FlushOutcome, NudgeBus, PipelineConfig, SharedNudgeBus};
use crate::session::{SharedSession, StaticSession};
use crate::signal::{FrictionSignal, FrictionType};
use crate::transport::{
    DeliveryMode, HttpBackend, ReqwestBackend, SharedBeacon, SharedObserver, Transport,
    TransportConfig,
};

pub const SESSION_START_EVENT: &str = "session_start";
pub const NUDGE_DECISION_EVENT: &str = "nudge_decision";

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("Invalid SDK configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("SDK instance has been destroyed")]
    Destroyed,
}

pub type SdkResult<T> = Result<T, SdkError>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct SdkBuilder {
    config: SdkConfig,
    page: Option<SharedPage>,
    session: Option<SharedSession>,
    http: Option<Arc<dyn HttpBackend>>,
    beacon: Option<SharedBeacon>,
    observer: Option<SharedObserver>,
    clock: Option<SharedClock>,
}

impl SdkBuilder {
    pub fn page(mut self, page: SharedPage) -> Self {
        self.page = Some(page);
        self
    }

    pub fn session(mut self, session: SharedSession) -> Self {
        self.session = Some(session);
        self
    }

    pub fn http(mut self, http: Arc<dyn HttpBackend>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn beacon(mut self, beacon: SharedBeacon) -> Self {
        self.beacon = Some(beacon);
        self
    }

    pub fn observer(mut self, observer: SharedObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> SdkResult<Sdk> {
        self.config.validate()?;
        let config = self.config;

        let page = self
            .page
            .unwrap_or_else(|| Arc::new(PageState::new("about:blank")));
        let session = self
            .session
            .unwrap_or_else(|| Arc::new(StaticSession::generated(false)));
        let http = self
            .http
            .unwrap_or_else(|| Arc::new(ReqwestBackend::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let mut transport = Transport::new(TransportConfig::from_sdk(&config), http, clock.clone());
        if let Some(beacon) = self.beacon {
            transport = transport.with_beacon(beacon);
        }
        if let Some(observer) = self.observer {
            transport = transport.with_observer(observer);
        }
        let transport = Arc::new(transport);

        let pipeline = EventPipeline::new(
            PipelineConfig::from_sdk(&config),
            transport.clone(),
            session.clone(),
            page.clone(),
            clock.clone(),
        );
        let router = Arc::new(FrictionRouter {
            pipeline: pipeline.clone(),
            decisions: DecisionClient::from_sdk(&config, transport, clock.clone()),
            nudges: NudgeBus::new().shared(),
            session: session.clone(),
            project_id: config.project_id.clone(),
            signals: AtomicUsize::new(0),
            pending: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        let on_signal = {
            let router = router.clone();
            Arc::new(move |signal: FrictionSignal| router.on_signal(signal))
        };
        let coordinator = DetectorCoordinator::new(
            config.flags.clone(),
            config.stall_timeout_ms,
            page.clone(),
            clock,
            on_signal,
        );

        Ok(Sdk {
            inner: Arc::new(SdkInner {
                config,
                page,
                pipeline,
                router,
                coordinator: Arc::new(Mutex::new(coordinator)),
                stall_poll: Mutex::new(None),
                initialized: AtomicBool::new(false),
                disabled: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
            }),
        })
    }
}

/// Turns friction signals into events and, for treatment sessions, nudges.
struct FrictionRouter {
    pipeline: EventPipeline,
    decisions: DecisionClient,
    nudges: SharedNudgeBus,
    session: SharedSession,
    project_id: Option<String>,
    signals: AtomicUsize,
    pending: Mutex<Vec<JoinHandle<()>>>,
    /// Set on destroy; no nudge is recorded or published afterwards.
    closed: AtomicBool,
}

impl FrictionRouter {
    fn on_signal(self: &Arc<Self>, signal: FrictionSignal) {
        self.signals.fetch_add(1, Ordering::Relaxed);
        // Flushed ahead of any nudge event it leads to.
        self.pipeline.capture_event(
            EventKind::Friction,
            signal.kind.as_str(),
            signal.to_event_payload(),
            true,
        );

        if !self.session.is_treatment() {
            debug!(kind = %signal.kind, "Control session; no decision requested");
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            debug!(kind = %signal.kind, "No async runtime; decision request skipped");
            return;
        };
        let context = DecisionContext {
            session_id: self.session.session_id(),
            is_treatment: true,
            project_id: self.project_id.clone(),
        };
        let router = self.clone();
        let task = handle.spawn(async move {
            if let Some(decision) = router.decisions.request_decision(&signal, &context).await {
                if router.closed.load(Ordering::Acquire) {
                    debug!(nudge_id = %decision.nudge_id, "SDK destroyed; decision discarded");
                    return;
                }
                router.pipeline.capture_event(
                    EventKind::Nudge,
                    NUDGE_DECISION_EVENT,
                    decision.to_event_payload(),
                    false,
                );
                router.nudges.publish(decision);
            }
        });

        let mut pending = lock(&self.pending);
        pending.retain(|t| !t.is_finished());
        pending.push(task);
    }

    fn take_pending(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *lock(&self.pending))
    }

    /// Stop accepting decisions and abort the requests still in flight.
    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let pending = self.take_pending();
        let running = pending.iter().filter(|t| !t.is_finished()).count();
        for task in pending {
            task.abort();
        }
        if running > 0 {
            debug!(aborted = running, "Pending decision requests cancelled");
        }
    }
}

struct SdkInner {
    config: SdkConfig,
    page: SharedPage,
    pipeline: EventPipeline,
    router: Arc<FrictionRouter>,
    coordinator: Arc<Mutex<DetectorCoordinator>>,
    stall_poll: Mutex<Option<JoinHandle<()>>>,
    initialized: AtomicBool,
    disabled: AtomicBool,
    destroyed: AtomicBool,
}

/// Handle to one SDK instance. Clones share state.
#[derive(Clone)]
pub struct Sdk {
    inner: Arc<SdkInner>,
}

impl Sdk {
    pub fn builder(config: SdkConfig) -> SdkBuilder {
        SdkBuilder {
            config,
            page: None,
            session: None,
            http: None,
            beacon: None,
            observer: None,
            clock: None,
        }
    }

    /// Start detectors and background tasks. Idempotent.
    pub fn init(&self) -> SdkResult<()> {
        if self.is_destroyed() {
            return Err(SdkError::Destroyed);
        }
        if self.inner.initialized.swap(true, Ordering::AcqRel) {
            debug!("SDK already initialised");
            return Ok(());
        }
        let flags = &self.inner.config.flags;
        if !flags.detectors_enabled {
            self.inner.disabled.store(true, Ordering::Release);
            info!("Reveal SDK disabled by kill switch");
            return Ok(());
        }

        lock(&self.inner.coordinator).init_detectors();

        let mut payload = Map::new();
        payload.insert("sdk_version".into(), SDK_VERSION.into());
        payload.insert("detectors".into(), flags.enabled_features().join(",").into());
        self.inner
            .pipeline
            .capture_event(EventKind::Session, SESSION_START_EVENT, payload, false);

        if self.inner.config.background_tasks {
            self.inner.pipeline.start_periodic_flush();
            self.start_stall_poll();
        }
        info!(
            version = SDK_VERSION,
            page = %self.inner.page.location_href(),
            background = self.inner.config.background_tasks,
            "Reveal SDK initialised"
        );
        Ok(())
    }

    fn start_stall_poll(&self) {
        let mut poll = lock(&self.inner.stall_poll);
        if poll.is_some() {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            warn!("No async runtime; stall poll not started");
            return;
        };
        let coordinator = self.inner.coordinator.clone();
        *poll = Some(handle.spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(POLL_INTERVAL_MS));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                lock(&coordinator).tick();
            }
        }));
    }

    fn is_active(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
            && !self.inner.disabled.load(Ordering::Acquire)
            && !self.is_destroyed()
    }

    /// Forward one browser event to the detectors.
    pub fn handle_event(&self, event: &BrowserEvent) {
        if self.is_active() {
            lock(&self.inner.coordinator).handle_event(event);
        }
    }

    /// Run one stall poll by hand.
    pub fn tick(&self) {
        if self.is_active() {
            lock(&self.inner.coordinator).tick();
        }
    }

    /// Record a product event.
    pub fn track(&self, name: &str, payload: Map<String, Value>) {
        if !self.is_active() {
            debug!(name, "SDK inactive; product event ignored");
            return;
        }
        self.inner
            .pipeline
            .capture_event(EventKind::Product, name, payload, false);
    }

    /// Subscribe to accepted nudge decisions.
    pub fn on_nudge_decision(&self) -> broadcast::Receiver<NudgeDecision> {
        self.inner.router.nudges.subscribe()
    }

    pub fn start_idle_watch(&self, watch: IdleWatch) -> bool {
        self.is_active() && lock(&self.inner.coordinator).start_idle_watch(watch)
    }

    pub fn stop_idle_watch(&self, context: &str) -> bool {
        self.is_active() && lock(&self.inner.coordinator).stop_idle_watch(context)
    }

    pub fn mark_context_closed(&self, context: &str) -> bool {
        self.is_active() && lock(&self.inner.coordinator).mark_context_closed(context)
    }

    /// Force a normal-mode flush now.
    pub async fn flush(&self) -> FlushOutcome {
        self.inner.pipeline.flush(true, DeliveryMode::Normal).await
    }

    /// Wait for every decision request started so far.
    pub async fn settle_decisions(&self) {
        for task in self.inner.router.take_pending() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Decision task failed: {}", e);
                }
            }
        }
    }

    /// Stop detectors, then the stall poll and pending decisions, then flush
    /// the pipeline in beacon mode. Returns the final flush task on the first
    /// call only.
    pub fn destroy(&self) -> Option<JoinHandle<FlushOutcome>> {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return None;
        }
        lock(&self.inner.coordinator).destroy();
        if let Some(poll) = lock(&self.inner.stall_poll).take() {
            poll.abort();
        }
        self.inner.router.close();
        info!("Reveal SDK destroyed");
        self.inner.pipeline.destroy()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    pub fn is_disabled(&self) -> bool {
        self.inner.disabled.load(Ordering::Acquire)
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    pub fn active_detectors(&self) -> Vec<FrictionType> {
        lock(&self.inner.coordinator).active_detectors()
    }

    /// Friction signals seen since `build()`.
    pub fn signals_observed(&self) -> usize {
        self.inner.router.signals.load(Ordering::Relaxed)
    }

    pub fn pipeline(&self) -> &EventPipeline {
        &self.inner.pipeline
    }

    pub fn config(&self) -> &SdkConfig {
        &self.inner.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::DetectorFlags;

    fn quiet_config() -> SdkConfig {
        SdkConfig {
            background_tasks: false,
            ..SdkConfig::default()
        }
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = SdkConfig {
            event_batch_size: 0,
            ..quiet_config()
        };
        assert!(matches!(Sdk::builder(config).build(), Err(SdkError::Config(_))));
    }

    #[test]
    fn test_kill_switch_disables_everything() {
        let config = SdkConfig {
            flags: DetectorFlags::killed(),
            ..quiet_config()
        };
        let sdk = Sdk::builder(config).build().unwrap();
        sdk.init().unwrap();
        assert!(sdk.is_disabled());
        assert!(sdk.active_detectors().is_empty());
        sdk.track("ignored", Map::new());
        assert_eq!(sdk.pipeline().buffered_len(), 0);
    }

    #[test]
    fn test_init_captures_session_start_once() {
        let sdk = Sdk::builder(quiet_config()).build().unwrap();
        sdk.init().unwrap();
        sdk.init().unwrap();
        let events = sdk.pipeline().snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Session);
        assert_eq!(events[0].name, SESSION_START_EVENT);
        assert_eq!(sdk.active_detectors().len(), 3);
    }

    #[test]
    fn test_calls_before_init_are_ignored() {
        let sdk = Sdk::builder(quiet_config()).build().unwrap();
        sdk.track("early", Map::new());
        assert!(!sdk.start_idle_watch(IdleWatch::new("form")));
        assert_eq!(sdk.pipeline().buffered_len(), 0);
    }

    #[test]
    fn test_destroy_is_one_shot() {
        let sdk = Sdk::builder(quiet_config()).build().unwrap();
        sdk.init().unwrap();
        let _ = sdk.destroy();
        assert!(sdk.is_destroyed());
        assert!(sdk.active_detectors().is_empty());
        assert!(sdk.destroy().is_none());
        assert!(matches!(sdk.init(), Err(SdkError::Destroyed)));
    }
}
