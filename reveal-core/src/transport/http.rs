//! HTTP backend seam.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::error::{TransportError, TransportResult};

/// A JSON POST ready to go on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Performs a single POST. Any status code is `Ok`; only failures to get a
/// response at all are errors. Implementations must stop when `cancel`
/// fires.
#[async_trait]
pub trait HttpBackend: Send + Sync {
    async fn post(
        &self,
        request: HttpRequest,
        cancel: CancellationToken,
    ) -> TransportResult<HttpResponse>;
}

/// [`HttpBackend`] over a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestBackend {
    client: reqwest::Client,
}

impl ReqwestBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn post(
        &self,
        request: HttpRequest,
        cancel: CancellationToken,
    ) -> TransportResult<HttpResponse> {
        let mut builder = self.client.post(&request.url).body(request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let send = async {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let body = response.bytes().await?.to_vec();
            Ok::<_, TransportError>(HttpResponse { status, body })
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(TransportError::aborted("request cancelled")),
            result = send => result,
        }
    }
}
