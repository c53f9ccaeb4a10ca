//! Actions a mod may return, and the event-scoped builder for them.

use serde::{Deserialize, Serialize};

use crate::error::InvalidActionError;
use crate::events::EventKind;
use crate::legality;
use crate::logits::Logits;

/// A value returned by a mod instructing the engine to alter generation.
///
/// Actions are immutable; no action spans multiple events. Each variant is
/// legal only for the events listed in the legality table
/// ([`crate::validate`]).
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// No change.
    Noop,
    /// Enqueue tokens to be emitted (as forced) before sampling resumes.
    ForceTokens { tokens: Vec<u32> },
    /// Terminate the request immediately with exactly these output tokens.
    ForceOutput { tokens: Vec<u32> },
    /// Replace the step's logits before sampling.
    AdjustedLogits { logits: Logits },
    /// Replace the prompt prefix. Only legal before the first forward pass.
    AdjustedPrefill { tokens: Vec<u32> },
    /// Tombstone the last `steps` live tokens, optionally re-injecting
    /// replacement tokens as forced.
    Backtrack {
        steps: usize,
        replacement_tokens: Option<Vec<u32>>,
    },
    /// Terminate the request with a tool-call payload.
    ToolCalls { payload: serde_json::Value },
    /// Terminate the request with an explicit error surfaced to the caller.
    EmitError { message: String },
}

impl Action {
    /// The discriminant of this action.
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Noop => ActionKind::Noop,
            Action::ForceTokens { .. } => ActionKind::ForceTokens,
            Action::ForceOutput { .. } => ActionKind::ForceOutput,
            Action::AdjustedLogits { .. } => ActionKind::AdjustedLogits,
            Action::AdjustedPrefill { .. } => ActionKind::AdjustedPrefill,
            Action::Backtrack { .. } => ActionKind::Backtrack,
            Action::ToolCalls { .. } => ActionKind::ToolCalls,
            Action::EmitError { .. } => ActionKind::EmitError,
        }
    }

    /// Whether this action ends the request (no further events follow).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Action::ForceOutput { .. } | Action::ToolCalls { .. } | Action::EmitError { .. }
        )
    }

    /// Whether this action is a no-op for aggregation purposes.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        matches!(self, Action::Noop)
    }
}

/// Fieldless action discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Noop,
    ForceTokens,
    ForceOutput,
    AdjustedLogits,
    AdjustedPrefill,
    Backtrack,
    ToolCalls,
    EmitError,
}

impl ActionKind {
    /// Stable name used in trace records and error messages.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ActionKind::Noop => "Noop",
            ActionKind::ForceTokens => "ForceTokens",
            ActionKind::ForceOutput => "ForceOutput",
            ActionKind::AdjustedLogits => "AdjustedLogits",
            ActionKind::AdjustedPrefill => "AdjustedPrefill",
            ActionKind::Backtrack => "Backtrack",
            ActionKind::ToolCalls => "ToolCalls",
            ActionKind::EmitError => "EmitError",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Factory surfaced to mod authors, scoped to one event's legal actions.
///
/// Each constructor checks the legality table up front, so an illegal
/// construction is rejected at the call site instead of only at dispatch.
/// The dispatcher still re-validates every returned action; the builder is
/// the first line, not the authority.
#[derive(Debug, Clone, Copy)]
pub struct ActionBuilder {
    event_kind: EventKind,
}

impl ActionBuilder {
    /// Create a builder scoped to `event_kind`.
    #[must_use]
    pub fn for_event(event_kind: EventKind) -> Self {
        Self { event_kind }
    }

    /// The event kind this builder is scoped to.
    #[must_use]
    pub fn event_kind(&self) -> EventKind {
        self.event_kind
    }

    /// No change. Legal everywhere.
    #[must_use]
    pub fn noop(&self) -> Action {
        Action::Noop
    }

    /// Terminate with an explicit error. Legal everywhere.
    #[must_use]
    pub fn emit_error(&self, message: impl Into<String>) -> Action {
        Action::EmitError {
            message: message.into(),
        }
    }

    /// Terminate with exactly these output tokens.
    pub fn force_output(
        &self,
        tokens: impl IntoIterator<Item = u32>,
    ) -> Result<Action, InvalidActionError> {
        self.checked(Action::ForceOutput {
            tokens: tokens.into_iter().collect(),
        })
    }

    /// Terminate with a tool-call payload.
    pub fn tool_calls(&self, payload: serde_json::Value) -> Result<Action, InvalidActionError> {
        self.checked(Action::ToolCalls { payload })
    }

    /// Replace the prompt prefix. Prefilled only.
    pub fn adjust_prefill(
        &self,
        tokens: impl IntoIterator<Item = u32>,
    ) -> Result<Action, InvalidActionError> {
        self.checked(Action::AdjustedPrefill {
            tokens: tokens.into_iter().collect(),
        })
    }

    /// Replace the step's logits. ForwardPass only.
    pub fn adjust_logits(&self, logits: Logits) -> Result<Action, InvalidActionError> {
        self.checked(Action::AdjustedLogits { logits })
    }

    /// Enqueue forced tokens.
    pub fn force_tokens(
        &self,
        tokens: impl IntoIterator<Item = u32>,
    ) -> Result<Action, InvalidActionError> {
        self.checked(Action::ForceTokens {
            tokens: tokens.into_iter().collect(),
        })
    }

    /// Tombstone the last `steps` live tokens, optionally re-injecting
    /// `replacement_tokens` as forced.
    pub fn backtrack(
        &self,
        steps: usize,
        replacement_tokens: Option<Vec<u32>>,
    ) -> Result<Action, InvalidActionError> {
        self.checked(Action::Backtrack {
            steps,
            replacement_tokens,
        })
    }

    fn checked(&self, action: Action) -> Result<Action, InvalidActionError> {
        legality::validate(self.event_kind, &action)?;
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_rejects_illegal_constructions() {
        let prefilled = ActionBuilder::for_event(EventKind::Prefilled);
        assert!(prefilled.adjust_prefill([1, 2]).is_ok());
        assert!(prefilled.force_tokens([1]).is_err());
        assert!(prefilled.backtrack(1, None).is_err());

        let forward = ActionBuilder::for_event(EventKind::ForwardPass);
        assert!(forward.force_tokens([1]).is_ok());
        assert!(forward.backtrack(2, Some(vec![3])).is_ok());
        assert!(forward.adjust_prefill([1]).is_err());

        let sampled = ActionBuilder::for_event(EventKind::Sampled);
        assert!(sampled.adjust_logits(Logits::from(vec![0.0])).is_err());
        assert!(sampled.force_output([9]).is_ok());
    }

    #[test]
    fn noop_and_emit_error_are_always_legal() {
        for kind in EventKind::ALL {
            let builder = ActionBuilder::for_event(kind);
            assert!(builder.noop().is_noop());
            assert!(builder.emit_error("boom").is_terminal());
        }
    }
}
