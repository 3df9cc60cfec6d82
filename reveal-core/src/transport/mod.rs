//! Batch delivery to `/ingest` and decision requests to `/decide`.
//!
//! Every network call is bound to a deadline through a
//! [`CancellationToken`]; a fired deadline becomes a retryable network error
//! for batches and a `None` for decisions.

pub mod beacon;
pub mod error;
pub mod http;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use beacon::{BatchReport, BeaconSink, SharedBeacon, SharedObserver, TransportObserver};
pub use error::{ErrorClass, NetworkErrorKind, TransportError, TransportResult};
pub use http::{HttpBackend, HttpRequest, HttpResponse, ReqwestBackend};
pub use retry::RetryPolicy;

use crate::clock::SharedClock;
use crate::config::{SdkConfig, SDK_VERSION};
use crate::events::types::{epoch_ms_to_datetime, BaseEvent};

pub const CLIENT_KEY_HEADER: &str = "X-Reveal-Client-Key";
pub const SDK_VERSION_HEADER: &str = "X-Reveal-SDK-Version";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Networked request with retry.
    Normal,
    /// Fire-and-forget during teardown; never retried.
    Beacon,
}

impl std::fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Beacon => write!(f, "beacon"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub ingest_url: String,
    pub client_key: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl TransportConfig {
    pub fn from_sdk(config: &SdkConfig) -> Self {
        Self {
            ingest_url: config.ingest_url(),
            client_key: config.client_key.clone(),
            request_timeout: config.request_timeout(),
            retry: config.retry_policy(),
        }
    }
}

#[derive(Serialize)]
struct IngestPayload<'a> {
    batch_id: &'a str,
    events: &'a [BaseEvent],
    timestamp: String,
}

/// `batch_<ms>_<8 hex>`.
pub fn new_batch_id(now_ms: u64) -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("batch_{}_{}", now_ms, &random[..8])
}

pub struct Transport {
    config: TransportConfig,
    http: Arc<dyn HttpBackend>,
    beacon: Option<SharedBeacon>,
    observer: Option<SharedObserver>,
    clock: SharedClock,
}

impl Transport {
    pub fn new(config: TransportConfig, http: Arc<dyn HttpBackend>, clock: SharedClock) -> Self {
        Self {
            config,
            http,
            beacon: None,
            observer: None,
            clock,
        }
    }

    pub fn with_beacon(mut self, beacon: SharedBeacon) -> Self {
        self.beacon = Some(beacon);
        self
    }

    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Deliver one batch. Empty batches succeed without touching the network.
    ///
    /// The observer hears about the outcome exactly once.
    pub async fn send_batch(&self, events: &[BaseEvent], mode: DeliveryMode) -> TransportResult<()> {
        if events.is_empty() {
            return Ok(());
        }

        let now_ms = self.clock.now_ms();
        let batch_id = new_batch_id(now_ms);
        let payload = IngestPayload {
            batch_id: &batch_id,
            events,
            timestamp: epoch_ms_to_datetime(now_ms).to_rfc3339(),
        };

        let mut report = BatchReport {
            batch_id: batch_id.clone(),
            event_count: events.len(),
            attempts: 0,
            mode,
        };

        let result = match serde_json::to_vec(&payload) {
            Ok(body) => {
                let request = self.request(&self.config.ingest_url, body);
                let (result, attempts) = match mode {
                    DeliveryMode::Normal => self.deliver_with_retry(request).await,
                    DeliveryMode::Beacon => self.deliver_beacon(request).await,
                };
                report.attempts = attempts;
                result
            }
            Err(e) => Err(TransportError::from(e)),
        };

        match &result {
            Ok(()) => {
                debug!(batch_id = %batch_id, events = events.len(), %mode, attempts = report.attempts, "Batch delivered");
                if let Some(observer) = &self.observer {
                    observer.on_batch_sent(&report);
                }
            }
            Err(e) => {
                warn!(batch_id = %batch_id, events = events.len(), %mode, class = %e.class(), "Batch delivery failed: {}", e);
                if let Some(observer) = &self.observer {
                    observer.on_batch_failed(&report, e);
                }
            }
        }
        result
    }

    /// Single-attempt POST of `payload` to `endpoint`. Any failure, including
    /// a non-2xx status or an unparseable body, yields `None`.
    pub async fn send_decision_request<T: Serialize>(
        &self,
        endpoint: &str,
        payload: &T,
        timeout: Duration,
    ) -> Option<Value> {
        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(e) => {
                warn!(endpoint, "Decision payload could not be encoded: {}", e);
                return None;
            }
        };

        let response = match self.post_with_deadline(self.request(endpoint, body), timeout).await {
            Ok(response) => response,
            Err(e) => {
                debug!(endpoint, class = %e.class(), "Decision request failed: {}", e);
                return None;
            }
        };
        if !response.is_success() {
            debug!(endpoint, status = response.status, "Decision request rejected");
            return None;
        }
        match serde_json::from_slice(&response.body) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(endpoint, "Decision response was not JSON: {}", e);
                None
            }
        }
    }

    fn request(&self, url: &str, body: Vec<u8>) -> HttpRequest {
        HttpRequest {
            url: url.to_string(),
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                (CLIENT_KEY_HEADER.to_string(), self.config.client_key.clone()),
                (SDK_VERSION_HEADER.to_string(), SDK_VERSION.to_string()),
            ],
            body,
        }
    }

    async fn deliver_with_retry(&self, request: HttpRequest) -> (TransportResult<()>, u32) {
        let policy = &self.config.retry;
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let err = match self.attempt(request.clone()).await {
                Ok(()) => return (Ok(()), attempts),
                Err(e) => e,
            };
            let retries_done = attempts - 1;
            if !err.is_retryable() || !policy.should_retry(retries_done) {
                return (Err(err), attempts);
            }
            let delay = policy.backoff_duration(retries_done + 1);
            debug!(
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                class = %err.class(),
                "Retrying batch after failure"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn deliver_beacon(&self, request: HttpRequest) -> (TransportResult<()>, u32) {
        match &self.beacon {
            Some(beacon) if beacon.send_beacon(&request.url, &request.body) => return (Ok(()), 1),
            Some(_) => info!("Beacon rejected payload; falling back to a single request"),
            None => debug!("No beacon sink; falling back to a single request"),
        }
        (self.attempt(request).await, 1)
    }

    async fn attempt(&self, request: HttpRequest) -> TransportResult<()> {
        let response = self.post_with_deadline(request, self.config.request_timeout).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(TransportError::Http {
                status: response.status,
                body: response.body_text(),
            })
        }
    }

    async fn post_with_deadline(
        &self,
        request: HttpRequest,
        timeout: Duration,
    ) -> TransportResult<HttpResponse> {
        let token = CancellationToken::new();
        let _guard = token.clone().drop_guard();
        tokio::select! {
            result = self.http.post(request, token.child_token()) => result,
            _ = tokio::time::sleep(timeout) => {
                token.cancel();
                Err(TransportError::timeout(timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_id_shape() {
        let id = new_batch_id(1_700_000_000_123);
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "batch");
        assert_eq!(parts[1], "1700000000123");
        assert_eq!(parts[2].len(), 8);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_config_from_sdk() {
        let sdk = SdkConfig {
            api_base_url: "https://api.test/".into(),
            client_key: "ck_live".into(),
            max_retries: 4,
            ..SdkConfig::default()
        };
        let config = TransportConfig::from_sdk(&sdk);
        assert_eq!(config.ingest_url, "https://api.test/ingest");
        assert_eq!(config.retry.max_retries, 4);
        assert_eq!(config.retry.max_backoff_ms, retry::MAX_BACKOFF_MS);
    }
}
