//! Reveal SDK core
//!
//! This library provides:
//! - Pattern detectors that recognise user friction (stalls, rage clicks,
//!   A→B→A backtracks) from a host-supplied browser event stream
//! - An event pipeline that enriches, buffers, orders and flushes telemetry
//! - A transport with retry, error classification and beacon fallback
//! - A decision client that asks the backend whether a signal earns a nudge
//!
//! # Data flow
//!
//! ```text
//! BrowserEvent ─▶ DetectorCoordinator ─▶ FrictionSignal ─┬─▶ EventPipeline ─▶ Transport ─▶ POST /ingest
//!                                                        └─▶ DecisionClient ─▶ POST /decide ─▶ NudgeBus
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use reveal_core::{BrowserEvent, NavigationMethod, PageState, Sdk, SdkConfig, StaticSession};
//!
//! # async fn run() -> Result<(), reveal_core::SdkError> {
//! let page = PageState::new("https://app.example.com/").shared();
//! let sdk = Sdk::builder(SdkConfig::from_env())
//!     .page(page.clone())
//!     .session(Arc::new(StaticSession::generated(true)))
//!     .build()?;
//! sdk.init()?;
//!
//! page.navigate("https://app.example.com/settings");
//! sdk.handle_event(&BrowserEvent::Navigation { method: NavigationMethod::PushState });
//! # Ok(())
//! # }
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod browser;
pub mod clock;
pub mod config;
pub mod decision;
pub mod detectors;
pub mod events;
pub mod flags;
pub mod privacy;
pub mod route;
pub mod sdk;
pub mod session;
pub mod signal;
pub mod transport;

// Re-export the host-facing surface
pub use browser::{
    BrowserEvent, ClickEvent, ElementInfo, KeyEventKind, NavigationMethod, PageContext, PageState,
    SharedPage, Viewport,
};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{ConfigError, ConfigResult, SdkConfig, SDK_VERSION};
pub use decision::{DecisionClient, DecisionContext, DecisionError, NudgeDecision, WireNudgeDecision};
pub use detectors::{DetectorCoordinator, IdleWatch, GLOBAL_CONTEXT};
pub use events::{BaseEvent, EventKind, EventPipeline, EventSource, FlushOutcome, NudgeBus};
pub use flags::{DetectorFlagOverrides, DetectorFlags};
pub use sdk::{Sdk, SdkBuilder, SdkError, SdkResult};
pub use session::{SessionProvider, SharedSession, StaticSession};
pub use signal::{FrictionSignal, FrictionType, PartialSignal, Primitive, SignalExtra};

// Re-export transport types
pub use transport::{
    BatchReport, BeaconSink, DeliveryMode, ErrorClass, HttpBackend, HttpRequest, HttpResponse,
    ReqwestBackend, RetryPolicy, Transport, TransportConfig, TransportError, TransportObserver,
};
