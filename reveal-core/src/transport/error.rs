//! Transport error taxonomy.
//!
//! | Class | Examples | Retried |
//! |---|---|---|
//! | network | timeout, abort, connection failure | yes |
//! | http-retryable | 5xx, 408, 429 | yes |
//! | http-non-retryable | other 4xx | no |
//! | validation | payload could not be encoded | no |
//! | unknown | anything else | yes |

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    Timeout,
    Aborted,
    Connection,
}

impl std::fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Aborted => write!(f, "aborted"),
            Self::Connection => write!(f, "connection"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Network,
    HttpRetryable,
    HttpNonRetryable,
    Validation,
    Unknown,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::HttpNonRetryable | Self::Validation)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::HttpRetryable => write!(f, "http-retryable"),
            Self::HttpNonRetryable => write!(f, "http-non-retryable"),
            Self::Validation => write!(f, "validation"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Classify a non-success HTTP status.
pub fn classify_status(status: u16) -> ErrorClass {
    match status {
        408 | 429 => ErrorClass::HttpRetryable,
        400..=499 => ErrorClass::HttpNonRetryable,
        500..=599 => ErrorClass::HttpRetryable,
        _ => ErrorClass::Unknown,
    }
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Network error ({kind}): {message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
    },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Invalid payload: {0}")]
    Validation(String),

    #[error("Unexpected transport failure: {0}")]
    Unknown(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

impl TransportError {
    pub fn timeout(after: Duration) -> Self {
        Self::Network {
            kind: NetworkErrorKind::Timeout,
            message: format!("no response after {}ms", after.as_millis()),
        }
    }

    pub fn aborted(reason: &str) -> Self {
        Self::Network {
            kind: NetworkErrorKind::Aborted,
            message: reason.to_string(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Network { .. } => ErrorClass::Network,
            Self::Http { status, .. } => classify_status(*status),
            Self::Validation(_) => ErrorClass::Validation,
            Self::Unknown(_) => ErrorClass::Unknown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Network {
                kind: NetworkErrorKind::Timeout,
                message: e.to_string(),
            }
        } else if e.is_connect() || e.is_request() {
            Self::Network {
                kind: NetworkErrorKind::Connection,
                message: e.to_string(),
            }
        } else if e.is_builder() {
            Self::Validation(e.to_string())
        } else if let Some(status) = e.status() {
            Self::Http {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            Self::Unknown(e.to_string())
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        Self::Validation(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> TransportError {
        TransportError::Http {
            status,
            body: String::new(),
        }
    }

    #[test]
    fn test_4xx_not_retryable_except_408_429() {
        assert!(!http(400).is_retryable());
        assert!(!http(401).is_retryable());
        assert!(!http(404).is_retryable());
        assert!(!http(422).is_retryable());
        assert!(http(408).is_retryable());
        assert!(http(429).is_retryable());
        assert_eq!(http(429).class(), ErrorClass::HttpRetryable);
        assert_eq!(http(403).class(), ErrorClass::HttpNonRetryable);
    }

    #[test]
    fn test_5xx_retryable() {
        for status in [500, 502, 503, 504, 599] {
            assert!(http(status).is_retryable(), "status {}", status);
        }
    }

    #[test]
    fn test_network_and_unknown_retryable() {
        assert!(TransportError::timeout(Duration::from_millis(5)).is_retryable());
        assert!(TransportError::aborted("page hidden").is_retryable());
        assert!(TransportError::Unknown("??".into()).is_retryable());
        assert!(!TransportError::Validation("bad".into()).is_retryable());
    }

    #[test]
    fn test_unusual_status_is_unknown() {
        assert_eq!(classify_status(302), ErrorClass::Unknown);
        assert!(http(302).is_retryable());
    }

    #[test]
    fn test_display() {
        let e = TransportError::timeout(Duration::from_millis(1500));
        assert_eq!(e.to_string(), "Network error (timeout): no response after 1500ms");
        assert_eq!(http(503).to_string(), "HTTP 503: ");
    }
}
