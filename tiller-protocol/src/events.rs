//! Generation-loop events.

use serde::{Deserialize, Serialize};

use crate::logits::Logits;

/// Identifier of one in-flight generation request.
pub type RequestId = String;

/// An immutable notification of a generation-loop checkpoint.
///
/// Exactly one event is live per request per step. The `step` counter is
/// monotonically non-decreasing except across a backtrack.
#[derive(Debug, Clone)]
pub enum Event {
    /// The prompt has been (re-)prefilled. This event recurs every step on
    /// some engines, so prefill-only mods must guard with per-request
    /// initialization state.
    Prefilled {
        request_id: RequestId,
        step: u32,
        max_steps: u32,
        prompt_tokens: Vec<u32>,
    },
    /// A forward pass produced raw logits for the next position.
    ForwardPass {
        request_id: RequestId,
        step: u32,
        logits: Logits,
    },
    /// A token was sampled from the (possibly adjusted) logits.
    Sampled {
        request_id: RequestId,
        step: u32,
        token: u32,
    },
    /// Tokens were committed to the sequence.
    Added {
        request_id: RequestId,
        step: u32,
        added_tokens: Vec<u32>,
        /// True when the tokens came from a forced queue rather than sampling.
        forced: bool,
    },
}

impl Event {
    /// The discriminant of this event, used for legality checks and tracing.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Prefilled { .. } => EventKind::Prefilled,
            Event::ForwardPass { .. } => EventKind::ForwardPass,
            Event::Sampled { .. } => EventKind::Sampled,
            Event::Added { .. } => EventKind::Added,
        }
    }

    /// The request this event belongs to.
    #[must_use]
    pub fn request_id(&self) -> &str {
        match self {
            Event::Prefilled { request_id, .. }
            | Event::ForwardPass { request_id, .. }
            | Event::Sampled { request_id, .. }
            | Event::Added { request_id, .. } => request_id,
        }
    }

    /// The generation step this event was raised at.
    #[must_use]
    pub fn step(&self) -> u32 {
        match self {
            Event::Prefilled { step, .. }
            | Event::ForwardPass { step, .. }
            | Event::Sampled { step, .. }
            | Event::Added { step, .. } => *step,
        }
    }
}

/// Fieldless event discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Prefilled,
    ForwardPass,
    Sampled,
    Added,
}

impl EventKind {
    /// All event kinds, in generation-loop order.
    pub const ALL: [EventKind; 4] = [
        EventKind::Prefilled,
        EventKind::ForwardPass,
        EventKind::Sampled,
        EventKind::Added,
    ];

    /// Stable name used in trace records and error messages.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Prefilled => "Prefilled",
            EventKind::ForwardPass => "ForwardPass",
            EventKind::Sampled => "Sampled",
            EventKind::Added => "Added",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
