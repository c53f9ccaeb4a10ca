//! Protocol-level errors.

use thiserror::Error;

use crate::actions::ActionKind;
use crate::events::EventKind;

/// A mod returned an action that is illegal for the event it was handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("action {action_kind} not permitted for event {event_kind}")]
pub struct InvalidActionError {
    /// The event being handled.
    pub event_kind: EventKind,
    /// The illegal action's discriminant.
    pub action_kind: ActionKind,
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, InvalidActionError>;
