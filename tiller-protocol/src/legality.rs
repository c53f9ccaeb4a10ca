//! The authoritative event/action legality table.

use crate::actions::{Action, ActionKind};
use crate::error::InvalidActionError;
use crate::events::EventKind;

/// Actions legal under each event kind. `Noop` and `EmitError` are legal
/// everywhere and are not listed.
const fn allowed(event: EventKind) -> &'static [ActionKind] {
    match event {
        EventKind::Prefilled => &[
            ActionKind::AdjustedPrefill,
            ActionKind::ForceOutput,
            ActionKind::ToolCalls,
        ],
        EventKind::ForwardPass => &[
            ActionKind::ForceTokens,
            ActionKind::Backtrack,
            ActionKind::ForceOutput,
            ActionKind::ToolCalls,
            ActionKind::AdjustedLogits,
        ],
        EventKind::Sampled | EventKind::Added => &[
            ActionKind::ForceTokens,
            ActionKind::Backtrack,
            ActionKind::ForceOutput,
            ActionKind::ToolCalls,
        ],
    }
}

/// Check that `action` may be returned from an event of kind `event_kind`.
///
/// A violation is a programmer error in the mod, not a generation failure;
/// callers surface it rather than silently dropping the action.
pub fn validate(event_kind: EventKind, action: &Action) -> Result<(), InvalidActionError> {
    let kind = action.kind();
    if matches!(kind, ActionKind::Noop | ActionKind::EmitError) {
        return Ok(());
    }
    if allowed(event_kind).contains(&kind) {
        Ok(())
    } else {
        Err(InvalidActionError {
            event_kind,
            action_kind: kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logits::Logits;

    fn sample_action(kind: ActionKind) -> Action {
        match kind {
            ActionKind::Noop => Action::Noop,
            ActionKind::ForceTokens => Action::ForceTokens { tokens: vec![1] },
            ActionKind::ForceOutput => Action::ForceOutput { tokens: vec![1] },
            ActionKind::AdjustedLogits => Action::AdjustedLogits {
                logits: Logits::from(vec![0.0]),
            },
            ActionKind::AdjustedPrefill => Action::AdjustedPrefill { tokens: vec![1] },
            ActionKind::Backtrack => Action::Backtrack {
                steps: 1,
                replacement_tokens: None,
            },
            ActionKind::ToolCalls => Action::ToolCalls {
                payload: serde_json::json!({}),
            },
            ActionKind::EmitError => Action::EmitError {
                message: "err".into(),
            },
        }
    }

    const ALL_ACTIONS: [ActionKind; 8] = [
        ActionKind::Noop,
        ActionKind::ForceTokens,
        ActionKind::ForceOutput,
        ActionKind::AdjustedLogits,
        ActionKind::AdjustedPrefill,
        ActionKind::Backtrack,
        ActionKind::ToolCalls,
        ActionKind::EmitError,
    ];

    // Exhaustive table-driven check against the documented legality table.
    #[test]
    fn legality_table_is_exact() {
        let table: [(EventKind, &[ActionKind]); 4] = [
            (
                EventKind::Prefilled,
                &[
                    ActionKind::Noop,
                    ActionKind::AdjustedPrefill,
                    ActionKind::ForceOutput,
                    ActionKind::ToolCalls,
                    ActionKind::EmitError,
                ],
            ),
            (
                EventKind::ForwardPass,
                &[
                    ActionKind::Noop,
                    ActionKind::ForceTokens,
                    ActionKind::Backtrack,
                    ActionKind::ForceOutput,
                    ActionKind::ToolCalls,
                    ActionKind::AdjustedLogits,
                    ActionKind::EmitError,
                ],
            ),
            (
                EventKind::Sampled,
                &[
                    ActionKind::Noop,
                    ActionKind::ForceTokens,
                    ActionKind::Backtrack,
                    ActionKind::ForceOutput,
                    ActionKind::ToolCalls,
                    ActionKind::EmitError,
                ],
            ),
            (
                EventKind::Added,
                &[
                    ActionKind::Noop,
                    ActionKind::ForceTokens,
                    ActionKind::Backtrack,
                    ActionKind::ForceOutput,
                    ActionKind::ToolCalls,
                    ActionKind::EmitError,
                ],
            ),
        ];

        for (event, legal) in table {
            for action_kind in ALL_ACTIONS {
                let action = sample_action(action_kind);
                let result = validate(event, &action);
                if legal.contains(&action_kind) {
                    assert!(result.is_ok(), "{action_kind} should be legal for {event}");
                } else {
                    let err = result.expect_err("expected InvalidActionError");
                    assert_eq!(err.event_kind, event);
                    assert_eq!(err.action_kind, action_kind);
                }
            }
        }
    }
}
