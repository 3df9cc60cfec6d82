//! Pattern detectors and their coordinator.
//!
//! # Architecture
//!
//! ```text
//! BrowserEvent / poll tick
//!        │
//!        ▼
//! ┌──────────────────────┐  PartialSignal  ┌──────────────────────┐  FrictionSignal
//! │ Stall / RageClick /  │────────────────▶│ DetectorCoordinator  │───────────────▶ callback
//! │ Backtrack detectors  │                 │ (flags, normalize)   │
//! └──────────────────────┘                 └──────────────────────┘
//! ```
//!
//! Each detector owns its private state for the lifetime of
//! `init()`..`destroy()`. Detectors never fail across their public boundary
//! once initialised: a malformed event is logged and ignored.

pub mod backtrack;
pub mod coordinator;
pub mod rage_click;
pub mod stall;

use thiserror::Error;

use crate::browser::BrowserEvent;
use crate::signal::{FrictionType, PartialSignal};

pub use backtrack::{BacktrackConfig, BacktrackDetector};
pub use coordinator::{DetectorCoordinator, SignalCallback};
pub use rage_click::{RageClickConfig, RageClickDetector};
pub use stall::{IdleWatch, StallDetector, GLOBAL_CONTEXT, POLL_INTERVAL_MS};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DetectorError {
    #[error("{0} detector is already initialised")]
    AlreadyInitialized(&'static str),

    #[error("{0} detector is not initialised")]
    NotInitialized(&'static str),
}

pub type DetectorResult<T> = Result<T, DetectorError>;

/// Common lifecycle shared by the three detectors.
pub trait Detector {
    fn kind(&self) -> FrictionType;

    /// Start observing ("attach listeners"). `now_ms` seeds internal clocks.
    fn init(&mut self, now_ms: u64) -> DetectorResult<()>;

    /// Stop observing and drop all state.
    fn destroy(&mut self) -> DetectorResult<()>;

    fn is_active(&self) -> bool;

    /// Feed one browser event; returns any signals that fired.
    fn handle_event(&mut self, event: &BrowserEvent, now_ms: u64) -> Vec<PartialSignal>;

    /// Periodic poll. Only time-driven detectors do anything here.
    fn tick(&mut self, _now_ms: u64) -> Vec<PartialSignal> {
        Vec::new()
    }
}

/// The closed set of detectors the coordinator can own.
#[derive(Debug)]
pub enum DetectorSlot {
    Stall(StallDetector),
    RageClick(RageClickDetector),
    Backtrack(BacktrackDetector),
}

impl DetectorSlot {
    pub fn as_detector(&self) -> &dyn Detector {
        match self {
            Self::Stall(d) => d,
            Self::RageClick(d) => d,
            Self::Backtrack(d) => d,
        }
    }

    pub fn as_detector_mut(&mut self) -> &mut dyn Detector {
        match self {
            Self::Stall(d) => d,
            Self::RageClick(d) => d,
            Self::Backtrack(d) => d,
        }
    }

    pub fn as_stall_mut(&mut self) -> Option<&mut StallDetector> {
        match self {
            Self::Stall(d) => Some(d),
            _ => None,
        }
    }
}
