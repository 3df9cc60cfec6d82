//! Enriched event envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::browser::PageContext;
use crate::route::{normalize_route, pathname};
use crate::session::SessionProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Friction,
    Session,
    Product,
    Nudge,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Friction => "friction",
            Self::Session => "session",
            Self::Product => "product",
            Self::Nudge => "nudge",
        }
    }

    /// Critical kinds survive buffer overflow; the rest may be dropped.
    pub fn is_critical(self) -> bool {
        matches!(self, Self::Friction | Self::Session)
    }

    pub fn source(self) -> EventSource {
        match self {
            Self::Nudge => EventSource::System,
            _ => EventSource::User,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    System,
    User,
}

/// One captured event, enriched with session, location and device context.
///
/// Location fields are snapshotted when the event is captured, so a
/// navigation between capture and delivery cannot rewrite them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseEvent {
    pub kind: EventKind,
    pub name: String,
    pub event_source: EventSource,

    pub session_id: String,
    pub is_treatment: bool,

    /// RFC 3339 capture time.
    pub timestamp: DateTime<Utc>,
    pub client_ts_ms: u64,

    pub path: String,
    pub route: String,
    pub screen: Option<String>,
    pub page_url: String,
    pub page_title: String,
    pub referrer: String,

    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,

    pub payload: Map<String, Value>,
}

impl BaseEvent {
    pub fn enrich(
        kind: EventKind,
        name: &str,
        payload: Map<String, Value>,
        session: &dyn SessionProvider,
        page: &dyn PageContext,
        now_ms: u64,
    ) -> Self {
        let page_url = page.location_href();
        let viewport = page.viewport();
        let payload = match kind {
            EventKind::Nudge => snake_case_keys(payload),
            _ => payload,
        };
        Self {
            kind,
            name: name.to_string(),
            event_source: kind.source(),
            session_id: session.session_id(),
            is_treatment: session.is_treatment(),
            timestamp: epoch_ms_to_datetime(now_ms),
            client_ts_ms: now_ms,
            path: pathname(&page_url),
            route: normalize_route(&page_url),
            screen: page.screen(),
            page_title: page.title(),
            referrer: page.referrer(),
            page_url,
            user_agent: page.user_agent(),
            viewport_width: viewport.width,
            viewport_height: viewport.height,
            payload,
        }
    }
}

pub(crate) fn epoch_ms_to_datetime(ms: u64) -> DateTime<Utc> {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now)
}

/// `ctaText` -> `cta_text`. Keys already in snake case pass through.
pub fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (i, ch) in key.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 && !out.ends_with('_') {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn snake_case_keys(payload: Map<String, Value>) -> Map<String, Value> {
    payload
        .into_iter()
        .map(|(k, v)| (to_snake_case(&k), v))
        .collect()
}
