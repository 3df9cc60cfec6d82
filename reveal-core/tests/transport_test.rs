//! Transport: retry, classification, beacon fallback and decision requests.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map};

use common::{FakeBeacon, FakeHttp, RecordingObserver, Reply};
use reveal_core::transport::{NetworkErrorKind, CLIENT_KEY_HEADER, SDK_VERSION_HEADER};
use reveal_core::{
    BaseEvent, DeliveryMode, EventKind, ManualClock, PageState, RetryPolicy, StaticSession,
    Transport, TransportConfig, TransportError, SDK_VERSION,
};

fn policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        ..RetryPolicy::default()
    }
}

fn transport(http: Arc<FakeHttp>, retry: RetryPolicy) -> Transport {
    let config = TransportConfig {
        ingest_url: "https://api.test/ingest".into(),
        client_key: "ck_test".into(),
        request_timeout: Duration::from_secs(10),
        retry,
    };
    Transport::new(config, http, Arc::new(ManualClock::new(1_700_000_000_000)))
}

fn events(n: usize) -> Vec<BaseEvent> {
    let page = PageState::new("https://app.test/home");
    let session = StaticSession::new("sess_t", false);
    (0..n)
        .map(|i| {
            BaseEvent::enrich(
                EventKind::Product,
                &format!("e{}", i),
                Map::new(),
                &session,
                &page,
                i as u64,
            )
        })
        .collect()
}

fn gaps(http: &FakeHttp) -> Vec<u64> {
    let at: Vec<_> = http.requests().iter().map(|r| r.at).collect();
    at.windows(2)
        .map(|w| (w[1] - w[0]).as_millis() as u64)
        .collect()
}

#[tokio::test]
async fn test_empty_batch_is_noop() {
    let http = FakeHttp::new();
    let observer = RecordingObserver::new();
    let t = transport(http.clone(), policy(2)).with_observer(observer.clone());

    t.send_batch(&[], DeliveryMode::Normal).await.unwrap();

    assert!(http.requests().is_empty());
    assert_eq!(observer.sent_count() + observer.failed_count(), 0);
}

#[tokio::test]
async fn test_ingest_request_shape() {
    let http = FakeHttp::new();
    let t = transport(http.clone(), policy(2));

    t.send_batch(&events(2), DeliveryMode::Normal).await.unwrap();

    let requests = http.requests();
    assert_eq!(requests.len(), 1);
    let r = &requests[0];
    assert_eq!(r.url, "https://api.test/ingest");
    assert_eq!(r.header(CLIENT_KEY_HEADER), Some("ck_test"));
    assert_eq!(r.header(SDK_VERSION_HEADER), Some(SDK_VERSION));
    assert_eq!(r.header("content-type"), Some("application/json"));
    assert!(r.body["batch_id"]
        .as_str()
        .unwrap()
        .starts_with("batch_1700000000000_"));
    assert_eq!(r.body["events"].as_array().unwrap().len(), 2);
    assert!(r.body["timestamp"].as_str().unwrap().starts_with("2023-11-14T"));
    assert_eq!(r.event_names(), vec!["e0", "e1"]);
}

#[tokio::test(start_paused = true)]
async fn test_server_error_retried_with_doubling_backoff() {
    let http = FakeHttp::new();
    http.script("/ingest", vec![Reply::Status(500, "boom".into()); 3]);
    let observer = RecordingObserver::new();
    let t = transport(http.clone(), policy(2)).with_observer(observer.clone());

    let err = t.send_batch(&events(1), DeliveryMode::Normal).await.unwrap_err();

    assert!(matches!(err, TransportError::Http { status: 500, .. }));
    assert_eq!(http.requests().len(), 3);
    assert_eq!(gaps(&http), vec![1_000, 2_000]);
    assert_eq!(observer.sent_count(), 0);
    assert_eq!(observer.failed_count(), 1);
    assert_eq!(observer.failed.lock().unwrap()[0].0.attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_caps_at_eight_seconds() {
    let http = FakeHttp::new();
    http.script("/ingest", vec![Reply::Status(429, String::new()); 6]);
    let t = transport(http.clone(), policy(5));

    assert!(t.send_batch(&events(1), DeliveryMode::Normal).await.is_err());

    assert_eq!(gaps(&http), vec![1_000, 2_000, 4_000, 8_000, 8_000]);
}

#[tokio::test(start_paused = true)]
async fn test_client_error_not_retried() {
    let http = FakeHttp::new();
    http.script("/ingest", [Reply::Status(400, "bad".into()), Reply::ok()]);
    let observer = RecordingObserver::new();
    let t = transport(http.clone(), policy(2)).with_observer(observer.clone());

    let err = t.send_batch(&events(1), DeliveryMode::Normal).await.unwrap_err();

    assert!(!err.is_retryable());
    assert_eq!(http.requests().len(), 1);
    assert_eq!(observer.failed_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_then_success() {
    let http = FakeHttp::new();
    http.script("/ingest", [Reply::Status(429, String::new()), Reply::ok()]);
    let observer = RecordingObserver::new();
    let t = transport(http.clone(), policy(2)).with_observer(observer.clone());

    t.send_batch(&events(3), DeliveryMode::Normal).await.unwrap();

    assert_eq!(http.requests().len(), 2);
    assert_eq!(observer.sent_count(), 1);
    assert_eq!(observer.failed_count(), 0);
    let report = &observer.sent.lock().unwrap()[0];
    assert_eq!(report.attempts, 2);
    assert_eq!(report.event_count, 3);
}

#[tokio::test(start_paused = true)]
async fn test_network_failure_retried() {
    let http = FakeHttp::new();
    http.script(
        "/ingest",
        [Reply::Fail(TransportError::Network {
            kind: NetworkErrorKind::Connection,
            message: "refused".into(),
        })],
    );
    let t = transport(http.clone(), policy(2));

    t.send_batch(&events(1), DeliveryMode::Normal).await.unwrap();

    assert_eq!(http.requests().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_becomes_retryable_timeout() {
    let http = FakeHttp::new();
    http.script("/ingest", [Reply::Hang, Reply::Hang]);
    let t = transport(http.clone(), policy(1));

    let err = t.send_batch(&events(1), DeliveryMode::Normal).await.unwrap_err();

    assert!(matches!(
        err,
        TransportError::Network {
            kind: NetworkErrorKind::Timeout,
            ..
        }
    ));
    assert!(err.is_retryable());
    assert_eq!(http.requests().len(), 2);
    // 10s deadline, then 1s backoff
    assert_eq!(gaps(&http), vec![11_000]);
}

#[tokio::test]
async fn test_beacon_accepted_skips_network() {
    let http = FakeHttp::new();
    let beacon = FakeBeacon::new(true);
    let observer = RecordingObserver::new();
    let t = transport(http.clone(), policy(2))
        .with_beacon(beacon.clone())
        .with_observer(observer.clone());

    t.send_batch(&events(2), DeliveryMode::Beacon).await.unwrap();

    assert!(http.requests().is_empty());
    let sent = beacon.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "https://api.test/ingest");
    assert_eq!(sent[0].1["events"].as_array().unwrap().len(), 2);
    assert_eq!(observer.sent_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_beacon_rejected_falls_back_once_without_retry() {
    let http = FakeHttp::new();
    http.script("/ingest", [Reply::Status(503, String::new()), Reply::ok()]);
    let beacon = FakeBeacon::new(false);
    let observer = RecordingObserver::new();
    let t = transport(http.clone(), policy(2))
        .with_beacon(beacon.clone())
        .with_observer(observer.clone());

    assert!(t.send_batch(&events(1), DeliveryMode::Beacon).await.is_err());

    assert_eq!(beacon.sent_count(), 1);
    assert_eq!(http.requests().len(), 1);
    assert_eq!(observer.failed_count(), 1);
}

#[tokio::test]
async fn test_beacon_without_sink_uses_network() {
    let http = FakeHttp::new();
    let t = transport(http.clone(), policy(2));

    t.send_batch(&events(1), DeliveryMode::Beacon).await.unwrap();

    assert_eq!(http.requests().len(), 1);
}

#[tokio::test]
async fn test_decision_request_returns_body() {
    let http = FakeHttp::new();
    http.script("/decide", [Reply::json(json!({"decision": {"nudgeId": "n1"}}))]);
    let t = transport(http.clone(), policy(2));

    let body = t
        .send_decision_request("https://api.test/decide", &json!({"sessionId": "s"}), Duration::from_secs(2))
        .await;

    assert_eq!(body, Some(json!({"decision": {"nudgeId": "n1"}})));
    assert_eq!(http.requests_to("/decide")[0].body["sessionId"], "s");
}

#[tokio::test(start_paused = true)]
async fn test_decision_request_never_retries_and_swallows_failures() {
    let http = FakeHttp::new();
    http.script(
        "/decide",
        [
            Reply::Status(503, String::new()),
            Reply::Status(200, "not json".into()),
            Reply::Hang,
        ],
    );
    let t = transport(http.clone(), policy(2));
    let endpoint = "https://api.test/decide";
    let timeout = Duration::from_millis(2_500);

    assert_eq!(t.send_decision_request(endpoint, &json!({}), timeout).await, None);
    assert_eq!(t.send_decision_request(endpoint, &json!({}), timeout).await, None);

    let started = tokio::time::Instant::now();
    assert_eq!(t.send_decision_request(endpoint, &json!({}), timeout).await, None);
    let waited = started.elapsed();
    assert!(waited >= timeout && waited < timeout + Duration::from_millis(100));

    assert_eq!(http.requests_to("/decide").len(), 3);
}
