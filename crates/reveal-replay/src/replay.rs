//! Drive an [`Sdk`] through a recorded trace on a manual clock.

use reveal_core::detectors::POLL_INTERVAL_MS;
use reveal_core::{Clock, ManualClock, PageState, Sdk};
use serde::Serialize;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{debug, warn};

use crate::trace::TraceRecord;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub records: usize,
    /// Trace time covered, from the first record to the last.
    pub duration_ms: u64,
    pub signals: usize,
    /// Ids of the nudge decisions published during the replay.
    pub nudges: Vec<String>,
}

/// Replay `trace` against an initialised `sdk`.
///
/// Time is advanced on `clock` only. The stall poll runs at every
/// one-second boundary crossed, matching the background interval an
/// interactive session would have.
pub async fn replay(
    trace: &[TraceRecord],
    sdk: &Sdk,
    clock: &ManualClock,
    page: &PageState,
) -> ReplayReport {
    let mut nudges = sdk.on_nudge_decision();
    let start = clock.now_ms();
    let signals_before = sdk.signals_observed();
    let mut next_poll = start + POLL_INTERVAL_MS;
    let mut now = start;

    for (i, record) in trace.iter().enumerate() {
        let mut target = start + record.at_ms;
        if target < now {
            warn!(record = i, at_ms = record.at_ms, "Trace record out of order; replaying at current time");
            target = now;
        }
        while next_poll <= target {
            clock.set(next_poll);
            sdk.tick();
            next_poll += POLL_INTERVAL_MS;
        }
        clock.set(target);
        now = target;

        if let Some(url) = &record.url {
            page.navigate(url);
        }
        if let Some(event) = &record.event {
            debug!(at_ms = record.at_ms, ?event, "Replaying event");
            sdk.handle_event(event);
        }
        if let Some(track) = &record.track {
            sdk.track(&track.name, track.payload.clone());
        }
    }

    sdk.settle_decisions().await;
    let mut nudge_ids = Vec::new();
    loop {
        match nudges.try_recv() {
            Ok(decision) => nudge_ids.push(decision.nudge_id),
            Err(TryRecvError::Lagged(n)) => warn!(missed = n, "Nudge subscriber lagged"),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }

    ReplayReport {
        records: trace.len(),
        duration_ms: now - start,
        signals: sdk.signals_observed() - signals_before,
        nudges: nudge_ids,
    }
}
