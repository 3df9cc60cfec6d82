//! Dry-run HTTP backend.

use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;
use reveal_core::{HttpBackend, HttpRequest, HttpResponse, TransportError};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Writes each request as one JSON line and answers `200 {"decision": null}`.
pub struct StdoutBackend {
    out: Mutex<Box<dyn Write + Send>>,
}

impl StdoutBackend {
    pub fn new() -> Self {
        Self::with_writer(Box::new(std::io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl Default for StdoutBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpBackend for StdoutBackend {
    async fn post(
        &self,
        request: HttpRequest,
        cancel: CancellationToken,
    ) -> Result<HttpResponse, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::aborted("request cancelled"));
        }
        let body: Value = serde_json::from_slice(&request.body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&request.body).into_owned()));
        let line = json!({ "url": request.url, "body": body });

        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            warn!(url = %request.url, "Failed to write dry-run request: {}", e);
        }

        Ok(HttpResponse {
            status: 200,
            body: br#"{"decision":null}"#.to_vec(),
        })
    }
}
