//! Trace sink boundary.
//!
//! Every event, mod invocation, and emitted action is pushed to the sink
//! as a fire-and-forget record. Delivery is at-least-attempted, never
//! guaranteed; a failed push is logged locally and generation proceeds.

use serde::{Deserialize, Serialize};
use tiller_protocol::{ActionKind, EventKind};

/// One record pushed to the trace backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceRecord {
    /// An event was raised for a request.
    Event {
        request_id: String,
        event: EventKind,
        step: u32,
    },
    /// One mod invocation, with timing and any captured failure.
    ModCall {
        request_id: String,
        mod_name: String,
        event: EventKind,
        step: u32,
        duration_us: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// A non-Noop action a mod emitted.
    Action {
        request_id: String,
        mod_name: String,
        action: ActionKind,
        step: u32,
        /// Whether this action became the step's effective action.
        effective: bool,
        /// Set when a non-Noop action was discarded because an earlier mod
        /// already produced the effective action; flagged for operator
        /// review rather than silently combined.
        conflict: bool,
        details: serde_json::Value,
    },
}

/// Destination for trace records. Must not block or fail generation.
pub trait TraceSink: Send + Sync {
    /// Push one record. Implementations swallow their own errors.
    fn record(&self, record: TraceRecord);
}

/// Sink that drops everything. The default when tracing is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTraceSink;

impl TraceSink for NullTraceSink {
    fn record(&self, _record: TraceRecord) {}
}

/// Sink that forwards records over an unbounded channel to whatever
/// collector the serving layer runs. Send errors (collector gone) are
/// swallowed and logged.
pub struct ChannelTraceSink {
    sender: tokio::sync::mpsc::UnboundedSender<TraceRecord>,
}

impl ChannelTraceSink {
    /// Create a sink and the receiving end for the collector task.
    #[must_use]
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<TraceRecord>) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl TraceSink for ChannelTraceSink {
    fn record(&self, record: TraceRecord) {
        if self.sender.send(record).is_err() {
            tracing::warn!("trace collector is gone; dropping record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_delivers_records() {
        let (sink, mut receiver) = ChannelTraceSink::new();
        sink.record(TraceRecord::Event {
            request_id: "r1".into(),
            event: EventKind::Prefilled,
            step: 0,
        });
        let record = receiver.try_recv().unwrap();
        assert!(matches!(record, TraceRecord::Event { step: 0, .. }));
    }

    #[test]
    fn channel_sink_survives_dropped_receiver() {
        let (sink, receiver) = ChannelTraceSink::new();
        drop(receiver);
        // Must not panic or error out.
        sink.record(TraceRecord::Event {
            request_id: "r1".into(),
            event: EventKind::Added,
            step: 3,
        });
    }

    #[test]
    fn records_serialize_to_tagged_json() {
        let record = TraceRecord::Action {
            request_id: "r1".into(),
            mod_name: "m".into(),
            action: ActionKind::Backtrack,
            step: 7,
            effective: true,
            conflict: false,
            details: serde_json::json!({"backtrack_steps": 2}),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "action");
        assert_eq!(json["details"]["backtrack_steps"], 2);
    }
}
