//! Delivery ordering and requeue policy for the event buffer.

use super::types::{BaseEvent, EventKind};

/// Friction events first, then everything else; capture order within each.
pub fn order_for_delivery(mut events: Vec<BaseEvent>) -> Vec<BaseEvent> {
    events.sort_by_key(|e| (e.kind != EventKind::Friction, e.client_ts_ms));
    events
}

/// Outcome of putting a failed batch back in front of the live buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Requeue {
    pub buffer: Vec<BaseEvent>,
    pub requeued: usize,
    pub dropped: usize,
}

/// Prepend `failed` to `current`, respecting `max_buffer_size`.
///
/// When everything fits, every failed event is requeued. Otherwise critical
/// events are requeued in full, then non-critical ones oldest-first until the
/// cap is reached. Events captured since the snapshot are never dropped.
pub fn requeue_failed(
    current: Vec<BaseEvent>,
    failed: Vec<BaseEvent>,
    max_buffer_size: usize,
) -> Requeue {
    if current.len() + failed.len() <= max_buffer_size {
        let requeued = failed.len();
        let mut buffer = failed;
        buffer.extend(current);
        return Requeue {
            buffer,
            requeued,
            dropped: 0,
        };
    }

    let critical = failed.iter().filter(|e| e.kind.is_critical()).count();
    let mut capacity = max_buffer_size.saturating_sub(current.len() + critical);

    let mut by_age: Vec<(usize, u64)> = failed
        .iter()
        .enumerate()
        .filter(|(_, e)| !e.kind.is_critical())
        .map(|(i, e)| (i, e.client_ts_ms))
        .collect();
    by_age.sort_by_key(|&(i, ts)| (ts, i));

    let mut keep = vec![false; failed.len()];
    for (i, e) in failed.iter().enumerate() {
        if e.kind.is_critical() {
            keep[i] = true;
        }
    }
    for (i, _) in by_age {
        if capacity == 0 {
            break;
        }
        keep[i] = true;
        capacity -= 1;
    }

    let total = failed.len();
    let mut buffer: Vec<BaseEvent> = failed
        .into_iter()
        .zip(keep)
        .filter_map(|(e, k)| k.then_some(e))
        .collect();
    let requeued = buffer.len();
    buffer.extend(current);
    Requeue {
        buffer,
        requeued,
        dropped: total - requeued,
    }
}
