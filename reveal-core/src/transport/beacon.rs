//! Fire-and-forget delivery used while the page is tearing down.

use std::sync::Arc;

/// The host's beacon primitive. Returns `false` when the payload was not
/// accepted for delivery (too large, queue full, unavailable).
pub trait BeaconSink: Send + Sync {
    fn send_beacon(&self, url: &str, payload: &[u8]) -> bool;
}

pub type SharedBeacon = Arc<dyn BeaconSink>;

/// Delivery outcome reported once per `send_batch` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub batch_id: String,
    pub event_count: usize,
    pub attempts: u32,
    pub mode: super::DeliveryMode,
}

/// Success/failure callbacks for audit consumers.
pub trait TransportObserver: Send + Sync {
    fn on_batch_sent(&self, report: &BatchReport);
    fn on_batch_failed(&self, report: &BatchReport, error: &super::TransportError);
}

pub type SharedObserver = Arc<dyn TransportObserver>;
