//! Event capture, buffering and nudge fan-out.

pub mod buffer;
pub mod bus;
pub mod pipeline;
pub mod types;

pub use buffer::{order_for_delivery, requeue_failed, Requeue};
pub use bus::{NudgeBus, SharedNudgeBus};
pub use pipeline::{EventPipeline, FlushOutcome, PipelineConfig};
pub use types::{BaseEvent, EventKind, EventSource};
