//! Detector Flags: global kill switch plus per-detector toggles
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `REVEAL_DETECTORS_ENABLED` | `true` | Kill switch: when off, no detector is instantiated |
//! | `REVEAL_STALL_ENABLED` | `true` | Idle/stall detection |
//! | `REVEAL_RAGECLICK_ENABLED` | `true` | Rapid repeated click detection |
//! | `REVEAL_BACKTRACK_ENABLED` | `true` | A→B→A navigation loop detection |
//!
//! # Per-Run Overrides
//!
//! ```rust,ignore
//! use reveal_core::flags::{DetectorFlags, DetectorFlagOverrides};
//!
//! let mut flags = DetectorFlags::from_env();
//! flags.apply_overrides(&DetectorFlagOverrides {
//!     rageclick_enabled: Some(false),
//!     ..Default::default()
//! });
//! ```

use serde::{Deserialize, Serialize};

use crate::signal::FrictionType;

/// Which detectors the coordinator may instantiate.
///
/// A detector runs only when both the kill switch and its own flag are on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorFlags {
    /// Global kill switch.
    ///
    /// Env: `REVEAL_DETECTORS_ENABLED`
    pub detectors_enabled: bool,

    /// Env: `REVEAL_STALL_ENABLED`
    pub stall_enabled: bool,

    /// Env: `REVEAL_RAGECLICK_ENABLED`
    pub rageclick_enabled: bool,

    /// Env: `REVEAL_BACKTRACK_ENABLED`
    pub backtrack_enabled: bool,
}

impl Default for DetectorFlags {
    fn default() -> Self {
        Self::all_enabled()
    }
}

impl DetectorFlags {
    /// Read flags from environment variables.
    ///
    /// Accepts "1"/"true"/"yes" and "0"/"false"/"no" (case-insensitive).
    /// Missing or unrecognised values keep the default (enabled).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            detectors_enabled: parse_bool_env("REVEAL_DETECTORS_ENABLED")
                .unwrap_or(defaults.detectors_enabled),
            stall_enabled: parse_bool_env("REVEAL_STALL_ENABLED")
                .unwrap_or(defaults.stall_enabled),
            rageclick_enabled: parse_bool_env("REVEAL_RAGECLICK_ENABLED")
                .unwrap_or(defaults.rageclick_enabled),
            backtrack_enabled: parse_bool_env("REVEAL_BACKTRACK_ENABLED")
                .unwrap_or(defaults.backtrack_enabled),
        }
    }

    pub fn all_enabled() -> Self {
        Self {
            detectors_enabled: true,
            stall_enabled: true,
            rageclick_enabled: true,
            backtrack_enabled: true,
        }
    }

    /// Kill switch off; per-detector flags untouched.
    pub fn killed() -> Self {
        Self {
            detectors_enabled: false,
            ..Self::all_enabled()
        }
    }

    /// Apply per-run overrides. Only `Some` values are applied.
    pub fn apply_overrides(&mut self, overrides: &DetectorFlagOverrides) {
        if let Some(v) = overrides.detectors_enabled {
            self.detectors_enabled = v;
        }
        if let Some(v) = overrides.stall_enabled {
            self.stall_enabled = v;
        }
        if let Some(v) = overrides.rageclick_enabled {
            self.rageclick_enabled = v;
        }
        if let Some(v) = overrides.backtrack_enabled {
            self.backtrack_enabled = v;
        }
    }

    /// Whether the detector for `kind` should run.
    pub fn is_enabled(&self, kind: FrictionType) -> bool {
        self.detectors_enabled
            && match kind {
                FrictionType::Stall => self.stall_enabled,
                FrictionType::Rageclick => self.rageclick_enabled,
                FrictionType::Backtrack => self.backtrack_enabled,
            }
    }

    /// Detectors that would run, in instantiation order.
    pub fn enabled_features(&self) -> Vec<&'static str> {
        FrictionType::all()
            .iter()
            .filter(|k| self.is_enabled(**k))
            .map(|k| k.as_str())
            .collect()
    }

    pub fn summary(&self) -> String {
        if !self.detectors_enabled {
            return "Detectors: kill switch engaged".to_string();
        }
        let enabled = self.enabled_features();
        if enabled.is_empty() {
            "Detectors: all disabled".to_string()
        } else {
            format!(
                "Detectors: {}/{} enabled [{}]",
                enabled.len(),
                FrictionType::all().len(),
                enabled.join(", ")
            )
        }
    }
}

impl std::fmt::Display for DetectorFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "detectors={} stall={} rageclick={} backtrack={}",
            flag_str(self.detectors_enabled),
            flag_str(self.stall_enabled),
            flag_str(self.rageclick_enabled),
            flag_str(self.backtrack_enabled),
        )
    }
}

/// `None` means "don't override".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorFlagOverrides {
    pub detectors_enabled: Option<bool>,
    pub stall_enabled: Option<bool>,
    pub rageclick_enabled: Option<bool>,
    pub backtrack_enabled: Option<bool>,
}

impl DetectorFlagOverrides {
    pub fn has_overrides(&self) -> bool {
        self.detectors_enabled.is_some()
            || self.stall_enabled.is_some()
            || self.rageclick_enabled.is_some()
            || self.backtrack_enabled.is_some()
    }
}

fn parse_bool_env(var: &str) -> Option<bool> {
    std::env::var(var)
        .ok()
        .and_then(|v| parse_bool_env_value(&v))
}

pub(crate) fn parse_bool_env_value(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn flag_str(enabled: bool) -> &'static str {
    if enabled {
        "ON"
    } else {
        "OFF"
    }
}
