//! Stall detection: the user stopped making progress.
//!
//! Named idle watches ("contexts") each carry their own timeout. A 1-second
//! poll compares every armed context against the time of the last meaningful
//! activity and fires once per idle period:
//!
//! ```text
//! activity ──▶ reset all contexts (lastMeaningfulAt = now, hasFired = false)
//! poll     ──▶ idleMs >= timeoutMs && !hasFired  ⇒  emit stall, hasFired = true
//! nav      ──▶ drop every context, re-arm __global__
//! ```
//!
//! A background [`GLOBAL_CONTEXT`] watch is registered on `init()` so stalls
//! are detected without any explicit watch.

use std::collections::BTreeMap;

use tracing::debug;

use super::{Detector, DetectorError, DetectorResult};
use crate::browser::BrowserEvent;
use crate::signal::{FrictionType, PartialSignal};

pub const GLOBAL_CONTEXT: &str = "__global__";
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 20_000;
pub const POLL_INTERVAL_MS: u64 = 1_000;

/// Request to register or update a named idle watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdleWatch {
    pub context: String,
    pub selector: Option<String>,
    /// Falls back to the detector's default timeout.
    pub timeout_ms: Option<u64>,
}

impl IdleWatch {
    pub fn new(context: &str) -> Self {
        Self {
            context: context.to_string(),
            selector: None,
            timeout_ms: None,
        }
    }

    pub fn selector(mut self, selector: &str) -> Self {
        self.selector = Some(selector.to_string());
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

#[derive(Debug, Clone)]
struct IdleContext {
    selector: Option<String>,
    timeout_ms: u64,
    last_meaningful_at: u64,
    has_fired: bool,
}

impl IdleContext {
    fn rearm(&mut self, now_ms: u64) {
        self.last_meaningful_at = now_ms;
        self.has_fired = false;
    }
}

#[derive(Debug)]
pub struct StallDetector {
    default_timeout_ms: u64,
    contexts: BTreeMap<String, IdleContext>,
    active: bool,
}

impl StallDetector {
    pub fn new(default_timeout_ms: u64) -> Self {
        Self {
            default_timeout_ms,
            contexts: BTreeMap::new(),
            active: false,
        }
    }

    /// Register `watch`, or update it if the context already exists.
    ///
    /// Either way the context is re-armed from `now_ms`.
    pub fn start_idle_watch(&mut self, watch: IdleWatch, now_ms: u64) {
        if !self.active {
            debug!(context = %watch.context, "Ignoring idle watch on inactive stall detector");
            return;
        }
        let timeout_ms = watch.timeout_ms.unwrap_or(self.default_timeout_ms);
        let ctx = self
            .contexts
            .entry(watch.context.clone())
            .or_insert_with(|| IdleContext {
                selector: None,
                timeout_ms,
                last_meaningful_at: now_ms,
                has_fired: false,
            });
        ctx.selector = watch.selector;
        ctx.timeout_ms = timeout_ms;
        ctx.rearm(now_ms);
        debug!(context = %watch.context, timeout_ms, "Idle watch armed");
    }

    pub fn stop_idle_watch(&mut self, context: &str) -> bool {
        self.contexts.remove(context).is_some()
    }

    /// Stop `context` and reset the global activity clock.
    pub fn mark_context_closed(&mut self, context: &str, now_ms: u64) {
        self.stop_idle_watch(context);
        if !self.active {
            return;
        }
        self.ensure_global(now_ms).rearm(now_ms);
    }

    /// Names of the currently registered contexts, sorted.
    pub fn active_contexts(&self) -> Vec<String> {
        self.contexts.keys().cloned().collect()
    }

    fn ensure_global(&mut self, now_ms: u64) -> &mut IdleContext {
        let timeout_ms = self.default_timeout_ms;
        self.contexts
            .entry(GLOBAL_CONTEXT.to_string())
            .or_insert_with(|| IdleContext {
                selector: None,
                timeout_ms,
                last_meaningful_at: now_ms,
                has_fired: false,
            })
    }

    fn is_meaningful(event: &BrowserEvent) -> bool {
        match event {
            BrowserEvent::Click(_) | BrowserEvent::Submit => true,
            BrowserEvent::Key { target, .. } => target.editable || target.in_form,
            BrowserEvent::Navigation { method } => method.is_browser_initiated(),
        }
    }

    fn record_activity(&mut self, now_ms: u64) {
        for ctx in self.contexts.values_mut() {
            ctx.rearm(now_ms);
        }
    }
}

impl Default for StallDetector {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT_MS)
    }
}

impl Detector for StallDetector {
    fn kind(&self) -> FrictionType {
        FrictionType::Stall
    }

    fn init(&mut self, now_ms: u64) -> DetectorResult<()> {
        if self.active {
            return Err(DetectorError::AlreadyInitialized("stall"));
        }
        self.active = true;
        self.contexts.clear();
        self.ensure_global(now_ms);
        Ok(())
    }

    fn destroy(&mut self) -> DetectorResult<()> {
        if !self.active {
            return Err(DetectorError::NotInitialized("stall"));
        }
        self.active = false;
        self.contexts.clear();
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn handle_event(&mut self, event: &BrowserEvent, now_ms: u64) -> Vec<PartialSignal> {
        if !self.active || !Self::is_meaningful(event) {
            return Vec::new();
        }
        if let BrowserEvent::Navigation { method } = event {
            debug!(%method, dropped = self.contexts.len(), "Navigation cleared idle contexts");
            self.contexts.clear();
            self.ensure_global(now_ms);
            return Vec::new();
        }
        self.record_activity(now_ms);
        Vec::new()
    }

    fn tick(&mut self, now_ms: u64) -> Vec<PartialSignal> {
        if !self.active {
            return Vec::new();
        }
        let mut out = Vec::new();
        for (name, ctx) in self.contexts.iter_mut() {
            if ctx.has_fired {
                continue;
            }
            let idle_ms = now_ms.saturating_sub(ctx.last_meaningful_at);
            if idle_ms >= ctx.timeout_ms {
                ctx.has_fired = true;
                out.push(PartialSignal::new(
                    FrictionType::Stall,
                    ctx.selector.clone(),
                    crate::extra! {
                        "context" => name.as_str(),
                        "idleMs" => idle_ms,
                        "timeoutMs" => ctx.timeout_ms,
                    },
                ));
            }
        }
        out
    }
}
