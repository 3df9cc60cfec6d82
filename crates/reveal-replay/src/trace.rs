//! JSON-lines trace format.
//!
//! One record per line:
//!
//! ```text
//! {"at_ms": 0, "url": "https://shop.example/cart"}
//! {"at_ms": 120, "event": {"type": "click", "path": [{"tag": "button", "id": "pay"}], "x": 10, "y": 20}}
//! {"at_ms": 900, "track": {"name": "coupon_applied", "payload": {"code": "SPRING"}}}
//! {"at_ms": 25000}
//! ```
//!
//! `at_ms` is relative to the start of the trace. A record with only
//! `at_ms` just lets time pass.

use std::path::Path;

use reveal_core::BrowserEvent;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("Failed to read trace {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid trace record on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

pub type TraceResult<T> = Result<T, TraceError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub name: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub at_ms: u64,
    /// Location the page has moved to before `event` is delivered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<BrowserEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<TrackRecord>,
}

pub fn parse_trace(raw: &str) -> TraceResult<Vec<TraceRecord>> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|source| TraceError::Parse { line: i + 1, source })
        })
        .collect()
}

pub fn load_trace(path: impl AsRef<Path>) -> TraceResult<Vec<TraceRecord>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| TraceError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_trace(&raw)
}

/// URL of the first record that carries one.
pub fn initial_url(trace: &[TraceRecord]) -> Option<&str> {
    trace.iter().find_map(|r| r.url.as_deref())
}
