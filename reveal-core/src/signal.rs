//! Friction signals: the normalized output of the pattern detectors.
//!
//! Backend validation only accepts flat primitive maps for `extra`, so
//! [`SignalExtra`] is typed as a map of [`Primitive`]; nested objects and
//! arrays cannot be represented and detectors pre-aggregate instead.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Which detector recognised the pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrictionType {
    Stall,
    Rageclick,
    Backtrack,
}

impl FrictionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stall => "stall",
            Self::Rageclick => "rageclick",
            Self::Backtrack => "backtrack",
        }
    }

    pub fn all() -> &'static [FrictionType] {
        &[Self::Stall, Self::Rageclick, Self::Backtrack]
    }
}

impl std::fmt::Display for FrictionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A flat JSON primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Primitive {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Null,
}

impl Primitive {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(n) => serde_json::Value::from(*n),
            Self::Float(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Str(s) => serde_json::Value::String(s.clone()),
            Self::Null => serde_json::Value::Null,
        }
    }
}

impl From<&str> for Primitive {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Primitive {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<bool> for Primitive {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Primitive {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Primitive {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<u32> for Primitive {
    fn from(n: u32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<u64> for Primitive {
    fn from(n: u64) -> Self {
        Self::Int(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

impl From<usize> for Primitive {
    fn from(n: usize) -> Self {
        Self::Int(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Primitive {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl<T: Into<Primitive>> From<Option<T>> for Primitive {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Flat evidence map attached to a signal.
pub type SignalExtra = BTreeMap<String, Primitive>;

/// Build a [`SignalExtra`] from `key => value` pairs.
#[macro_export]
macro_rules! extra {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut map = $crate::signal::SignalExtra::new();
        $( map.insert(($key).to_string(), $crate::signal::Primitive::from($value)); )*
        map
    }};
}

/// What a detector emits before the coordinator fills in page and time.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialSignal {
    pub kind: FrictionType,
    pub selector: Option<String>,
    pub extra: SignalExtra,
    /// Overrides the live location when the detector already captured it.
    pub page_url: Option<String>,
}

impl PartialSignal {
    pub fn new(kind: FrictionType, selector: Option<String>, extra: SignalExtra) -> Self {
        Self {
            kind,
            selector,
            extra,
            page_url: None,
        }
    }

    pub fn with_page_url(mut self, page_url: String) -> Self {
        self.page_url = Some(page_url);
        self
    }
}

/// Canonical friction signal handed to the pipeline and decision client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrictionSignal {
    #[serde(rename = "type")]
    pub kind: FrictionType,
    pub page_url: String,
    pub selector: Option<String>,
    /// Epoch milliseconds.
    pub timestamp: u64,
    pub extra: SignalExtra,
}

impl FrictionSignal {
    pub fn from_partial(partial: PartialSignal, live_url: String, now_ms: u64) -> Self {
        Self {
            kind: partial.kind,
            page_url: partial.page_url.unwrap_or(live_url),
            selector: partial.selector,
            timestamp: now_ms,
            extra: partial.extra,
        }
    }

    /// Flattened event payload: signal fields plus every `extra` entry.
    pub fn to_event_payload(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut payload = serde_json::Map::new();
        payload.insert("friction_type".into(), self.kind.as_str().into());
        payload.insert("page_url".into(), self.page_url.clone().into());
        payload.insert(
            "selector".into(),
            self.selector
                .clone()
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null),
        );
        payload.insert("signal_ts".into(), self.timestamp.into());
        for (k, v) in &self.extra {
            payload.entry(k.clone()).or_insert_with(|| v.to_json());
        }
        payload
    }
}
