//! Rage-click detection: rapid repeated clicks on the same target.
//!
//! Per click:
//! 1. Ignore clicks inside the SDK's own UI (overlay root, `reveal-*` elements).
//! 2. Derive a stable target key: id → data-testid → role+name → structural path.
//! 3. Debounce duplicate fires closer than `min_inter_click_ms`.
//! 4. Reset the target's buffer when its oldest click left the window.
//! 5. Append to the bounded position ring.
//! 6. Collapse to the latest click when the positions drift too far apart.
//! 7. Emit once `min_clicks` are buffered and the target is out of cooldown.
//!
//! Only queryable selectors (`#id`, `[id="…"]`, `[data-testid="…"]`) are ever
//! surfaced as `selector`; role and structural keys stay in `extra.targetKey`.

use std::collections::{HashMap, VecDeque};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::{Detector, DetectorError, DetectorResult};
use crate::browser::{BrowserEvent, ClickEvent, ElementInfo};
use crate::signal::{FrictionType, PartialSignal};

/// Element id of the SDK's nudge overlay root.
pub const OVERLAY_ROOT_ID: &str = "reveal-overlay-root";
/// Prefix shared by the SDK's custom elements.
pub const SDK_ELEMENT_PREFIX: &str = "reveal-";
/// Ancestors (target included) used for the structural fallback key.
pub const STRUCTURAL_PATH_DEPTH: usize = 4;

static CSS_IDENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-?[A-Za-z_][A-Za-z0-9_-]*$").expect("CSS_IDENT_RE regex should compile")
});

#[derive(Debug, Clone, PartialEq)]
pub struct RageClickConfig {
    pub min_clicks: usize,
    pub window_ms: u64,
    pub max_target_drift_px: f64,
    pub min_inter_click_ms: u64,
    pub cooldown_ms: u64,
    pub max_positions: usize,
}

impl Default for RageClickConfig {
    fn default() -> Self {
        Self {
            min_clicks: 4,
            window_ms: 900,
            max_target_drift_px: 24.0,
            min_inter_click_ms: 30,
            cooldown_ms: 2_000,
            max_positions: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ClickSample {
    ts: u64,
    x: f64,
    y: f64,
}

#[derive(Debug, Default)]
struct TargetState {
    clicks: VecDeque<ClickSample>,
    last_emit_ts: u64,
    has_fired: bool,
}

impl TargetState {
    fn in_cooldown(&self, now_ms: u64, cooldown_ms: u64) -> bool {
        self.has_fired && now_ms.saturating_sub(self.last_emit_ts) < cooldown_ms
    }

    fn last_seen(&self) -> u64 {
        self.clicks
            .back()
            .map(|c| c.ts)
            .unwrap_or(0)
            .max(self.last_emit_ts)
    }
}

/// How a click target was identified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetIdentity {
    /// Stable key used to group clicks.
    pub key: String,
    /// Queryable CSS selector, when one exists.
    pub selector: Option<String>,
}

#[derive(Debug)]
pub struct RageClickDetector {
    config: RageClickConfig,
    targets: HashMap<String, TargetState>,
    active: bool,
}

impl RageClickDetector {
    pub fn new(config: RageClickConfig) -> Self {
        Self {
            config,
            targets: HashMap::new(),
            active: false,
        }
    }

    pub fn config(&self) -> &RageClickConfig {
        &self.config
    }

    /// Number of targets currently tracked.
    pub fn tracked_targets(&self) -> usize {
        self.targets.len()
    }

    fn on_click(&mut self, click: &ClickEvent, now_ms: u64) -> Option<PartialSignal> {
        if is_sdk_ui(click) {
            return None;
        }
        let identity = derive_target_identity(click)?;
        let cfg = self.config.clone();
        self.prune(now_ms);

        let state = self.targets.entry(identity.key.clone()).or_default();

        if let Some(prev) = state.clicks.back() {
            if now_ms.saturating_sub(prev.ts) < cfg.min_inter_click_ms {
                return None;
            }
        }

        if let Some(oldest) = state.clicks.front() {
            if now_ms.saturating_sub(oldest.ts) > cfg.window_ms {
                state.clicks.clear();
            }
        }

        state.clicks.push_back(ClickSample {
            ts: now_ms,
            x: click.x,
            y: click.y,
        });
        while state.clicks.len() > cfg.max_positions {
            state.clicks.pop_front();
        }

        let drift = max_pairwise_drift(&state.clicks);
        if drift > cfg.max_target_drift_px {
            let latest = state.clicks.pop_back();
            state.clicks.clear();
            state.clicks.extend(latest);
            return None;
        }

        if state.clicks.len() < cfg.min_clicks || state.in_cooldown(now_ms, cfg.cooldown_ms) {
            return None;
        }

        let gaps: Vec<u64> = state
            .clicks
            .iter()
            .zip(state.clicks.iter().skip(1))
            .map(|(a, b)| b.ts - a.ts)
            .collect();
        let click_count = state.clicks.len();
        let gap_min = gaps.iter().copied().min().unwrap_or(0);
        let gap_max = gaps.iter().copied().max().unwrap_or(0);
        let gap_avg = if gaps.is_empty() {
            0.0
        } else {
            gaps.iter().sum::<u64>() as f64 / gaps.len() as f64
        };

        state.has_fired = true;
        state.last_emit_ts = now_ms;
        state.clicks.clear();

        debug!(target_key = %identity.key, click_count, "Rage click detected");

        Some(PartialSignal::new(
            FrictionType::Rageclick,
            identity.selector,
            crate::extra! {
                "targetKey" => identity.key,
                "clickCount" => click_count,
                "windowMs" => cfg.window_ms,
                "interClickMs_min" => gap_min,
                "interClickMs_max" => gap_max,
                "interClickMs_avg" => round1(gap_avg),
                "positions_count" => click_count,
                "driftPx" => round1(drift),
                "debugCode" => format!("RC_{}_IN_{}", click_count, cfg.window_ms),
            },
        ))
    }

    /// Drop targets that can neither complete a burst nor be in cooldown.
    fn prune(&mut self, now_ms: u64) {
        let horizon = self.config.window_ms + self.config.cooldown_ms;
        self.targets
            .retain(|_, s| now_ms.saturating_sub(s.last_seen()) <= horizon);
    }
}

impl Default for RageClickDetector {
    fn default() -> Self {
        Self::new(RageClickConfig::default())
    }
}

impl Detector for RageClickDetector {
    fn kind(&self) -> FrictionType {
        FrictionType::Rageclick
    }

    fn init(&mut self, _now_ms: u64) -> DetectorResult<()> {
        if self.active {
            return Err(DetectorError::AlreadyInitialized("rageclick"));
        }
        self.active = true;
        self.targets.clear();
        Ok(())
    }

    fn destroy(&mut self) -> DetectorResult<()> {
        if !self.active {
            return Err(DetectorError::NotInitialized("rageclick"));
        }
        self.active = false;
        self.targets.clear();
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn handle_event(&mut self, event: &BrowserEvent, now_ms: u64) -> Vec<PartialSignal> {
        match event {
            BrowserEvent::Click(click) if self.active => {
                self.on_click(click, now_ms).into_iter().collect()
            }
            _ => Vec::new(),
        }
    }
}

fn is_sdk_ui(click: &ClickEvent) -> bool {
    click.path.iter().any(|el| {
        el.id.as_deref() == Some(OVERLAY_ROOT_ID) || el.tag.starts_with(SDK_ELEMENT_PREFIX)
    })
}

/// Stable identity for the click's target, or `None` for an empty path.
pub fn derive_target_identity(click: &ClickEvent) -> Option<TargetIdentity> {
    let target = click.target()?;

    if let Some(id) = non_empty(&target.id) {
        return Some(TargetIdentity {
            key: format!("id:{}", id),
            selector: Some(id_selector(id)),
        });
    }
    if let Some(test_id) = non_empty(&target.test_id) {
        return Some(TargetIdentity {
            key: format!("testid:{}", test_id),
            selector: Some(format!("[data-testid=\"{}\"]", css_string_escape(test_id))),
        });
    }
    if let (Some(role), Some(name)) = (non_empty(&target.role), non_empty(&target.accessible_name)) {
        return Some(TargetIdentity {
            key: format!("role:{}|name:{}", role, name.trim()),
            selector: None,
        });
    }
    Some(TargetIdentity {
        key: structural_key(&click.path),
        selector: None,
    })
}

/// `path:tag[i]>tag[i]>…`, root-most first, at most [`STRUCTURAL_PATH_DEPTH`] deep.
pub fn structural_key(path: &[ElementInfo]) -> String {
    let segments: Vec<String> = path
        .iter()
        .take(STRUCTURAL_PATH_DEPTH)
        .rev()
        .map(|el| format!("{}[{}]", el.tag, el.sibling_index))
        .collect();
    format!("path:{}", segments.join(">"))
}

fn id_selector(id: &str) -> String {
    if CSS_IDENT_RE.is_match(id) {
        format!("#{}", id)
    } else {
        format!("[id=\"{}\"]", css_string_escape(id))
    }
}

fn css_string_escape(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().filter(|s| !s.trim().is_empty())
}

fn max_pairwise_drift(clicks: &VecDeque<ClickSample>) -> f64 {
    let mut max = 0.0_f64;
    for (i, a) in clicks.iter().enumerate() {
        for b in clicks.iter().skip(i + 1) {
            max = max.max((a.x - b.x).hypot(a.y - b.y));
        }
    }
    max
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
