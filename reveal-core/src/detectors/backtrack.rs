//! Backtrack detection: A → B → A navigation loops.
//!
//! The host forwards every navigation (history push/replace, popstate,
//! hashchange) as a [`BrowserEvent::Navigation`]; the detector then re-reads
//! the live location rather than trusting any URL the app passed to the
//! history API.
//!
//! Routes are compared in normalized form (pathname only). On each
//! navigation the current route is compared with the second-to-last stack
//! entry; a match within the recency window and outside the cooldown fires.
//! Navigation that only changes query or hash is never a backtrack.

use std::collections::VecDeque;

use tracing::debug;

use super::{Detector, DetectorError, DetectorResult};
use crate::browser::{BrowserEvent, NavigationMethod, SharedPage};
use crate::route::normalize_route;
use crate::signal::{FrictionType, PartialSignal};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacktrackConfig {
    /// Max age of the earlier visit that still counts as a return.
    pub recent_window_ms: u64,
    pub cooldown_ms: u64,
    pub max_stack: usize,
}

impl Default for BacktrackConfig {
    fn default() -> Self {
        Self {
            recent_window_ms: 30_000,
            cooldown_ms: 10_000,
            max_stack: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RouteEntry {
    url: String,
    route_key: String,
    ts: u64,
}

pub struct BacktrackDetector {
    config: BacktrackConfig,
    page: SharedPage,
    stack: VecDeque<RouteEntry>,
    last_emit_ts: Option<u64>,
    active: bool,
}

impl std::fmt::Debug for BacktrackDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BacktrackDetector")
            .field("config", &self.config)
            .field("stack", &self.stack)
            .field("last_emit_ts", &self.last_emit_ts)
            .field("active", &self.active)
            .finish()
    }
}

impl BacktrackDetector {
    pub fn new(config: BacktrackConfig, page: SharedPage) -> Self {
        Self {
            config,
            page,
            stack: VecDeque::new(),
            last_emit_ts: None,
            active: false,
        }
    }

    /// Normalized routes on the stack, oldest first.
    pub fn route_stack(&self) -> Vec<String> {
        self.stack.iter().map(|e| e.route_key.clone()).collect()
    }

    fn on_navigation(&mut self, method: NavigationMethod, now_ms: u64) -> Option<PartialSignal> {
        let url = self.page.location_href();
        let route_key = normalize_route(&url);
        let current = RouteEntry {
            url,
            route_key,
            ts: now_ms,
        };

        let depth = self.stack.len();
        let prev1 = self.stack.back().cloned();

        if let Some(top) = self.stack.back_mut() {
            if top.route_key == current.route_key {
                debug!(route = %current.route_key, %method, "Same-route navigation ignored");
                *top = current;
                return None;
            }
        }

        let prev2 = depth
            .checked_sub(2)
            .and_then(|i| self.stack.get(i))
            .cloned();

        let signal = match (prev1, prev2) {
            (Some(prev1), Some(prev2)) if prev2.route_key == current.route_key => {
                let delta_ms = now_ms.saturating_sub(prev2.ts);
                let cooling = self
                    .last_emit_ts
                    .is_some_and(|t| now_ms.saturating_sub(t) < self.config.cooldown_ms);
                if delta_ms <= self.config.recent_window_ms && !cooling {
                    self.last_emit_ts = Some(now_ms);
                    debug!(from = %prev1.route_key, to = %current.route_key, delta_ms, "Backtrack detected");
                    Some(
                        PartialSignal::new(
                            FrictionType::Backtrack,
                            None,
                            crate::extra! {
                                "from_view" => prev1.route_key.as_str(),
                                "to_view" => current.route_key.as_str(),
                                "from_url" => prev1.url.as_str(),
                                "from_path" => prev1.route_key.as_str(),
                                "to_url" => current.url.as_str(),
                                "to_path" => current.route_key.as_str(),
                                "method" => method.as_str(),
                                "reason" => "returned_to_recent_route",
                                "lastForwardTs" => prev1.ts,
                                "deltaMs" => delta_ms,
                                "stackDepth" => depth,
                                "debugCode" => "BT_ABA",
                            },
                        )
                        .with_page_url(current.url.clone()),
                    )
                } else {
                    None
                }
            }
            _ => None,
        };

        self.push(current);
        signal
    }

    fn push(&mut self, entry: RouteEntry) {
        self.stack.push_back(entry);
        while self.stack.len() > self.config.max_stack {
            self.stack.pop_front();
        }
    }
}

impl Detector for BacktrackDetector {
    fn kind(&self) -> FrictionType {
        FrictionType::Backtrack
    }

    fn init(&mut self, now_ms: u64) -> DetectorResult<()> {
        if self.active {
            return Err(DetectorError::AlreadyInitialized("backtrack"));
        }
        self.active = true;
        self.stack.clear();
        self.last_emit_ts = None;
        let url = self.page.location_href();
        let route_key = normalize_route(&url);
        self.push(RouteEntry {
            url,
            route_key,
            ts: now_ms,
        });
        Ok(())
    }

    fn destroy(&mut self) -> DetectorResult<()> {
        if !self.active {
            return Err(DetectorError::NotInitialized("backtrack"));
        }
        self.active = false;
        self.stack.clear();
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn handle_event(&mut self, event: &BrowserEvent, now_ms: u64) -> Vec<PartialSignal> {
        match event {
            BrowserEvent::Navigation { method } if self.active => {
                self.on_navigation(*method, now_ms).into_iter().collect()
            }
            _ => Vec::new(),
        }
    }
}
