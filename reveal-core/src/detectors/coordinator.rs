//! Detector lifecycle, feature flags and signal normalization.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{
    BacktrackConfig, BacktrackDetector, DetectorSlot, IdleWatch, RageClickConfig,
    RageClickDetector, StallDetector,
};
use crate::browser::{BrowserEvent, SharedPage};
use crate::clock::SharedClock;
use crate::flags::DetectorFlags;
use crate::signal::{FrictionSignal, FrictionType, PartialSignal};

/// Receives every normalized friction signal.
pub type SignalCallback = Arc<dyn Fn(FrictionSignal) + Send + Sync>;

pub struct DetectorCoordinator {
    flags: DetectorFlags,
    stall_timeout_ms: u64,
    page: SharedPage,
    clock: SharedClock,
    on_signal: SignalCallback,
    detectors: Vec<DetectorSlot>,
    initialized: bool,
}

impl DetectorCoordinator {
    pub fn new(
        flags: DetectorFlags,
        stall_timeout_ms: u64,
        page: SharedPage,
        clock: SharedClock,
        on_signal: SignalCallback,
    ) -> Self {
        Self {
            flags,
            stall_timeout_ms,
            page,
            clock,
            on_signal,
            detectors: Vec::new(),
            initialized: false,
        }
    }

    /// Instantiate and start every enabled detector.
    ///
    /// Best-effort: a detector that fails to start is logged and left out.
    pub fn init_detectors(&mut self) {
        if self.initialized {
            debug!("Detectors already initialised");
            return;
        }
        self.initialized = true;
        if !self.flags.detectors_enabled {
            info!("Detector kill switch engaged; no detectors started");
            return;
        }

        let now = self.clock.now_ms();
        for kind in FrictionType::all() {
            if !self.flags.is_enabled(*kind) {
                continue;
            }
            let mut slot = match kind {
                FrictionType::Stall => DetectorSlot::Stall(StallDetector::new(self.stall_timeout_ms)),
                FrictionType::Rageclick => {
                    DetectorSlot::RageClick(RageClickDetector::new(RageClickConfig::default()))
                }
                FrictionType::Backtrack => DetectorSlot::Backtrack(BacktrackDetector::new(
                    BacktrackConfig::default(),
                    self.page.clone(),
                )),
            };
            match slot.as_detector_mut().init(now) {
                Ok(()) => self.detectors.push(slot),
                Err(e) => warn!(detector = %kind, "Detector failed to start: {}", e),
            }
        }
        info!(active = ?self.active_detectors(), "{}", self.flags.summary());
    }

    /// Stop every detector. Errors are logged; teardown always completes.
    pub fn destroy(&mut self) {
        for slot in self.detectors.iter_mut() {
            let detector = slot.as_detector_mut();
            if let Err(e) = detector.destroy() {
                warn!(detector = %detector.kind(), "Detector failed to stop cleanly: {}", e);
            }
        }
        self.detectors.clear();
        self.initialized = false;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn active_detectors(&self) -> Vec<FrictionType> {
        self.detectors
            .iter()
            .map(|s| s.as_detector())
            .filter(|d| d.is_active())
            .map(|d| d.kind())
            .collect()
    }

    pub fn handle_event(&mut self, event: &BrowserEvent) {
        let now = self.clock.now_ms();
        let partials: Vec<PartialSignal> = self
            .detectors
            .iter_mut()
            .flat_map(|s| s.as_detector_mut().handle_event(event, now))
            .collect();
        self.emit_all(partials, now);
    }

    /// Poll time-driven detectors.
    pub fn tick(&mut self) {
        let now = self.clock.now_ms();
        let partials: Vec<PartialSignal> = self
            .detectors
            .iter_mut()
            .flat_map(|s| s.as_detector_mut().tick(now))
            .collect();
        self.emit_all(partials, now);
    }

    pub fn start_idle_watch(&mut self, watch: IdleWatch) -> bool {
        let now = self.clock.now_ms();
        match self.stall_mut() {
            Some(stall) => {
                stall.start_idle_watch(watch, now);
                true
            }
            None => false,
        }
    }

    pub fn stop_idle_watch(&mut self, context: &str) -> bool {
        self.stall_mut()
            .map(|stall| stall.stop_idle_watch(context))
            .unwrap_or(false)
    }

    pub fn mark_context_closed(&mut self, context: &str) -> bool {
        let now = self.clock.now_ms();
        match self.stall_mut() {
            Some(stall) => {
                stall.mark_context_closed(context, now);
                true
            }
            None => false,
        }
    }

    fn stall_mut(&mut self) -> Option<&mut StallDetector> {
        self.detectors.iter_mut().find_map(DetectorSlot::as_stall_mut)
    }

    fn emit_all(&self, partials: Vec<PartialSignal>, now: u64) {
        if partials.is_empty() {
            return;
        }
        let live_url = self.page.location_href();
        for partial in partials {
            let signal = FrictionSignal::from_partial(partial, live_url.clone(), now);
            debug!(kind = %signal.kind, page_url = %signal.page_url, "Friction signal");
            (self.on_signal)(signal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{ClickEvent, ElementInfo, NavigationMethod, PageState};
    use crate::clock::ManualClock;
    use std::sync::Mutex;

    struct Fixture {
        clock: ManualClock,
        page: Arc<PageState>,
        seen: Arc<Mutex<Vec<FrictionSignal>>>,
        coordinator: DetectorCoordinator,
    }

    fn fixture(flags: DetectorFlags) -> Fixture {
        let clock = ManualClock::new(1_000);
        let page = PageState::new("https://app.test/a").shared();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let coordinator = DetectorCoordinator::new(
            flags,
            20_000,
            page.clone(),
            Arc::new(clock.clone()),
            Arc::new(move |s: FrictionSignal| sink.lock().unwrap().push(s)),
        );
        Fixture {
            clock,
            page,
            seen,
            coordinator,
        }
    }

    #[test]
    fn test_flags_select_detectors() {
        let mut f = fixture(DetectorFlags {
            rageclick_enabled: false,
            ..DetectorFlags::all_enabled()
        });
        f.coordinator.init_detectors();
        assert_eq!(
            f.coordinator.active_detectors(),
            vec![FrictionType::Stall, FrictionType::Backtrack]
        );
    }

    #[test]
    fn test_kill_switch_starts_nothing() {
        let mut f = fixture(DetectorFlags::killed());
        f.coordinator.init_detectors();
        assert!(f.coordinator.active_detectors().is_empty());
        assert!(!f.coordinator.start_idle_watch(IdleWatch::new("x")));
    }

    #[test]
    fn test_signal_normalized_with_live_url_and_now() {
        let mut f = fixture(DetectorFlags::all_enabled());
        f.coordinator.init_detectors();
        f.page.navigate("https://app.test/checkout");
        f.clock.set(21_000);
        f.coordinator.tick();

        let seen = f.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, FrictionType::Stall);
        assert_eq!(seen[0].page_url, "https://app.test/checkout");
        assert_eq!(seen[0].timestamp, 21_000);
    }

    #[test]
    fn test_events_fan_out_to_all_detectors() {
        let mut f = fixture(DetectorFlags::all_enabled());
        f.coordinator.init_detectors();
        for _ in 0..4 {
            f.clock.advance(100);
            f.coordinator.handle_event(&BrowserEvent::Click(ClickEvent {
                path: vec![ElementInfo::new("button").with_id("go")],
                x: 10.0,
                y: 10.0,
            }));
        }
        f.page.navigate("https://app.test/b");
        f.clock.advance(100);
        f.coordinator.handle_event(&BrowserEvent::Navigation {
            method: NavigationMethod::PushState,
        });
        f.page.navigate("https://app.test/a");
        f.clock.advance(100);
        f.coordinator.handle_event(&BrowserEvent::Navigation {
            method: NavigationMethod::PopState,
        });

        let kinds: Vec<FrictionType> = f.seen.lock().unwrap().iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![FrictionType::Rageclick, FrictionType::Backtrack]);
    }

    #[test]
    fn test_idle_watch_passthrough_and_destroy() {
        let mut f = fixture(DetectorFlags::all_enabled());
        f.coordinator.init_detectors();
        assert!(f.coordinator.start_idle_watch(IdleWatch::new("wizard").timeout_ms(500)));
        assert!(f.coordinator.stop_idle_watch("wizard"));
        assert!(f.coordinator.mark_context_closed("wizard"));

        f.coordinator.destroy();
        assert!(!f.coordinator.is_initialized());
        assert!(f.coordinator.active_detectors().is_empty());
        f.clock.advance(100_000);
        f.coordinator.tick();
        assert!(f.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_init_is_idempotent() {
        let mut f = fixture(DetectorFlags::all_enabled());
        f.coordinator.init_detectors();
        f.coordinator.init_detectors();
        assert_eq!(f.coordinator.active_detectors().len(), 3);
    }
}
