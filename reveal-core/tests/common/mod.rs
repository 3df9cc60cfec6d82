//! Hand-written fakes for the injected transport seams.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use reveal_core::transport::{BatchReport, BeaconSink, TransportObserver};
use reveal_core::{HttpBackend, HttpRequest, HttpResponse, TransportError};

#[derive(Clone)]
pub enum Reply {
    Status(u16, String),
    Fail(TransportError),
    /// Never answers; only cancellation ends the call.
    Hang,
    /// Answers with the status once the gate is notified.
    Gate(Arc<Notify>, u16),
}

impl Reply {
    pub fn ok() -> Self {
        Self::Status(200, "{}".into())
    }

    pub fn json(body: Value) -> Self {
        Self::Status(200, body.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
    pub at: tokio::time::Instant,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn event_names(&self) -> Vec<String> {
        self.body["events"]
            .as_array()
            .map(|events| {
                events
                    .iter()
                    .filter_map(|e| e["name"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Scripted [`HttpBackend`]. Replies are consumed per URL suffix in order;
/// once a script runs dry `/ingest` answers 200 and `/decide` answers
/// `{"decision": null}`.
#[derive(Default)]
pub struct FakeHttp {
    scripts: Mutex<Vec<(String, VecDeque<Reply>)>>,
    requests: Mutex<Vec<Recorded>>,
}

impl FakeHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, suffix: &str, replies: impl IntoIterator<Item = Reply>) {
        self.scripts
            .lock()
            .unwrap()
            .push((suffix.to_string(), replies.into_iter().collect()));
    }

    fn next_reply(&self, url: &str) -> Reply {
        let mut scripts = self.scripts.lock().unwrap();
        for (suffix, replies) in scripts.iter_mut() {
            if url.ends_with(suffix.as_str()) {
                if let Some(reply) = replies.pop_front() {
                    return reply;
                }
            }
        }
        if url.ends_with("/decide") {
            Reply::json(serde_json::json!({ "decision": null }))
        } else {
            Reply::ok()
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, suffix: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.ends_with(suffix))
            .collect()
    }

    /// Names of every event delivered to `/ingest`, in delivery order.
    pub fn ingested_names(&self) -> Vec<String> {
        self.requests_to("/ingest")
            .iter()
            .flat_map(Recorded::event_names)
            .collect()
    }
}

#[async_trait]
impl HttpBackend for FakeHttp {
    async fn post(
        &self,
        request: HttpRequest,
        cancel: CancellationToken,
    ) -> Result<HttpResponse, TransportError> {
        let reply = self.next_reply(&request.url);
        self.requests.lock().unwrap().push(Recorded {
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: serde_json::from_slice(&request.body).unwrap_or(Value::Null),
            at: tokio::time::Instant::now(),
        });
        match reply {
            Reply::Status(status, body) => Ok(HttpResponse {
                status,
                body: body.into_bytes(),
            }),
            Reply::Fail(e) => Err(e),
            Reply::Hang => {
                cancel.cancelled().await;
                Err(TransportError::aborted("cancelled"))
            }
            Reply::Gate(gate, status) => {
                tokio::select! {
                    _ = gate.notified() => Ok(HttpResponse { status, body: b"{}".to_vec() }),
                    _ = cancel.cancelled() => Err(TransportError::aborted("cancelled")),
                }
            }
        }
    }
}

pub struct FakeBeacon {
    pub accept: bool,
    pub sent: Mutex<Vec<(String, Value)>>,
}

impl FakeBeacon {
    pub fn new(accept: bool) -> Arc<Self> {
        Arc::new(Self {
            accept,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl BeaconSink for FakeBeacon {
    fn send_beacon(&self, url: &str, payload: &[u8]) -> bool {
        self.sent.lock().unwrap().push((
            url.to_string(),
            serde_json::from_slice(payload).unwrap_or(Value::Null),
        ));
        self.accept
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    pub sent: Mutex<Vec<BatchReport>>,
    pub failed: Mutex<Vec<(BatchReport, String)>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.lock().unwrap().len()
    }
}

impl TransportObserver for RecordingObserver {
    fn on_batch_sent(&self, report: &BatchReport) {
        self.sent.lock().unwrap().push(report.clone());
    }

    fn on_batch_failed(&self, report: &BatchReport, error: &TransportError) {
        self.failed
            .lock()
            .unwrap()
            .push((report.clone(), error.to_string()));
    }
}

/// Poll `cond` with short real sleeps until it holds or ~2s pass.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    cond()
}
