//! Offline replay of recorded browser sessions through the Reveal SDK core.
//!
//! Useful for tuning detector thresholds against real traces and for
//! checking what a session would have sent to `/ingest` and `/decide`
//! without a browser.

pub mod backend;
pub mod replay;
pub mod trace;

pub use backend::StdoutBackend;
pub use replay::{replay, ReplayReport};
pub use trace::{initial_url, load_trace, parse_trace, TraceError, TraceRecord, TrackRecord};
