//! Decision client: asks `/decide` whether a friction signal earns a nudge.
//!
//! Every failure mode (bad input, network error, timeout, malformed or
//! stale response, explicit "no decision") resolves to `None`. The reason is
//! logged, never surfaced.

use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::config::{SdkConfig, SDK_VERSION};
use crate::privacy::{redact_emails, scrub_extra};
use crate::signal::FrictionSignal;
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecisionError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Backend returned no decision")]
    NoDecision,

    #[error("Malformed decision: {0}")]
    Malformed(String),

    #[error("Decision expired at {expires_at_ms} (now {now_ms})")]
    Expired { expires_at_ms: i64, now_ms: u64 },
}

pub type DecisionResult<T> = Result<T, DecisionError>;

/// Minimal session and project context sent alongside the signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionContext {
    pub session_id: String,
    pub is_treatment: bool,
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecideRequestPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub session_id: String,
    pub is_treatment: bool,
    pub friction: FrictionSignal,
    pub sdk_version: String,
}

impl DecideRequestPayload {
    /// Build the wire payload with PII removed from `extra` and `pageUrl`.
    pub fn build(signal: &FrictionSignal, context: &DecisionContext) -> DecisionResult<Self> {
        if context.session_id.trim().is_empty() {
            return Err(DecisionError::MissingField("sessionId"));
        }
        let friction = FrictionSignal {
            kind: signal.kind,
            page_url: redact_emails(&signal.page_url),
            selector: signal.selector.clone(),
            timestamp: signal.timestamp,
            extra: scrub_extra(&signal.extra),
        };
        Ok(Self {
            project_id: context.project_id.clone(),
            session_id: context.session_id.clone(),
            is_treatment: context.is_treatment,
            friction,
            sdk_version: SDK_VERSION.to_string(),
        })
    }
}

/// `expiresAt` as sent by the backend: epoch ms (integer or float) or an
/// RFC 3339 string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ExpiresAt {
    Millis(i64),
    /// Fractional milliseconds are truncated.
    FloatMillis(f64),
    Text(String),
}

impl ExpiresAt {
    pub fn to_epoch_ms(&self) -> Option<i64> {
        match self {
            Self::Millis(ms) => Some(*ms),
            Self::FloatMillis(ms) if ms.is_finite() => Some(ms.trunc() as i64),
            Self::FloatMillis(_) => None,
            Self::Text(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.timestamp_millis()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireNudgeDecision {
    pub nudge_id: String,
    pub template_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub cta_text: Option<String>,
    #[serde(default)]
    pub quadrant: Option<String>,
    #[serde(default)]
    pub friction_type: Option<String>,
    #[serde(default)]
    pub expires_at: Option<ExpiresAt>,
    #[serde(default)]
    pub extra: Option<Map<String, Value>>,
}

/// A validated, unexpired decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NudgeDecision {
    pub nudge_id: String,
    pub template_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cta_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quadrant: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friction_type: Option<String>,
    #[serde(rename = "expiresAt", skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<Map<String, Value>>,
}

impl NudgeDecision {
    /// Payload for the `nudge` event (keys are snake-cased by the pipeline).
    pub fn to_event_payload(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Unwrap `{"decision": ...}` or a bare decision object and validate it.
pub fn parse_decision(response: Value, now_ms: u64) -> DecisionResult<NudgeDecision> {
    let raw = match response {
        Value::Object(mut map) if map.contains_key("decision") => {
            map.remove("decision").unwrap_or(Value::Null)
        }
        other => other,
    };
    let raw = match raw {
        Value::Null | Value::Bool(false) => return Err(DecisionError::NoDecision),
        Value::Object(_) => raw,
        other => return Err(DecisionError::Malformed(format!("expected object, got {}", other))),
    };

    let wire: WireNudgeDecision =
        serde_json::from_value(raw).map_err(|e| DecisionError::Malformed(e.to_string()))?;
    if wire.nudge_id.trim().is_empty() {
        return Err(DecisionError::Malformed("empty nudgeId".into()));
    }
    if wire.template_id.trim().is_empty() {
        return Err(DecisionError::Malformed("empty templateId".into()));
    }

    let expires_at_ms = match &wire.expires_at {
        Some(expires) => {
            let ms = expires
                .to_epoch_ms()
                .ok_or_else(|| DecisionError::Malformed(format!("unparseable expiresAt {:?}", expires)))?;
            if ms <= i64::try_from(now_ms).unwrap_or(i64::MAX) {
                return Err(DecisionError::Expired {
                    expires_at_ms: ms,
                    now_ms,
                });
            }
            Some(ms)
        }
        None => None,
    };

    Ok(NudgeDecision {
        nudge_id: wire.nudge_id,
        template_id: wire.template_id,
        title: wire.title,
        body: wire.body,
        cta_text: wire.cta_text,
        quadrant: wire.quadrant,
        friction_type: wire.friction_type,
        expires_at_ms,
        extra: wire.extra,
    })
}

pub struct DecisionClient {
    transport: Arc<Transport>,
    endpoint: String,
    timeout: Duration,
    clock: SharedClock,
}

impl DecisionClient {
    pub fn new(transport: Arc<Transport>, endpoint: String, timeout: Duration, clock: SharedClock) -> Self {
        Self {
            transport,
            endpoint,
            timeout,
            clock,
        }
    }

    pub fn from_sdk(config: &SdkConfig, transport: Arc<Transport>, clock: SharedClock) -> Self {
        Self::new(transport, config.decide_url(), config.decision_timeout(), clock)
    }

    pub async fn request_decision(
        &self,
        signal: &FrictionSignal,
        context: &DecisionContext,
    ) -> Option<NudgeDecision> {
        let payload = match DecideRequestPayload::build(signal, context) {
            Ok(payload) => payload,
            Err(e) => {
                info!(kind = %signal.kind, "Decision request skipped: {}", e);
                return None;
            }
        };

        let response = self
            .transport
            .send_decision_request(&self.endpoint, &payload, self.timeout)
            .await?;

        match parse_decision(response, self.clock.now_ms()) {
            Ok(decision) => {
                info!(
                    kind = %signal.kind,
                    nudge_id = %decision.nudge_id,
                    template_id = %decision.template_id,
                    "Nudge decision accepted"
                );
                Some(decision)
            }
            Err(DecisionError::NoDecision) => {
                debug!(kind = %signal.kind, "No nudge for signal");
                None
            }
            Err(e) => {
                info!(kind = %signal.kind, "Nudge decision discarded: {}", e);
                None
            }
        }
    }
}
