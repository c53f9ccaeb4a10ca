//! Mod dispatch runtime.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use tiller_protocol::{validate, Action, ActionBuilder, Event, Tokenizer};

use crate::config::ControlConfig;
use crate::error::{ControlError, ControlResult, ModError};
use crate::mods::RegisteredMod;
use crate::trace::{TraceRecord, TraceSink};

/// Result of dispatching one event to every registered mod.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// The first non-Noop action in registration order, or Noop.
    pub effective: Action,
}

/// Invokes mods in registration order and reduces their actions.
///
/// Per invocation: wall-clock time is captured; a panic or error is
/// recorded and treated as Noop; an action failing the legality table is
/// recorded as the mod's error and treated as Noop. The first non-Noop
/// action becomes effective; later mods still run for logging
/// completeness, but their non-Noop actions are discarded and flagged as
/// conflicts in the trace.
pub struct Dispatcher<'a> {
    sink: &'a dyn TraceSink,
    config: &'a ControlConfig,
}

impl<'a> Dispatcher<'a> {
    #[must_use]
    pub fn new(sink: &'a dyn TraceSink, config: &'a ControlConfig) -> Self {
        Self { sink, config }
    }

    /// Run every mod against `event` and reduce to one effective action.
    ///
    /// The only fatal outcome is a budget overrun: a hung mod cannot be
    /// preempted mid-call, so an overrun observed on return kills the
    /// request instead of being tolerated.
    pub fn dispatch(
        &self,
        event: &Event,
        mods: &mut [RegisteredMod],
        tokenizer: &dyn Tokenizer,
    ) -> ControlResult<DispatchOutcome> {
        let builder = ActionBuilder::for_event(event.kind());
        let request_id = event.request_id().to_string();
        let step = event.step();

        self.record(TraceRecord::Event {
            request_id: request_id.clone(),
            event: event.kind(),
            step,
        });

        let mut effective: Option<Action> = None;
        for registered in mods.iter_mut() {
            let started = Instant::now();
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                registered.handler.on_event(event, &builder, tokenizer)
            }));
            let elapsed = started.elapsed();
            let elapsed_ms = elapsed.as_millis() as u64;
            if elapsed_ms > self.config.mod_budget_ms {
                return Err(ControlError::ModBudgetExceeded {
                    mod_name: registered.name.clone(),
                    budget_ms: self.config.mod_budget_ms,
                    elapsed_ms,
                });
            }

            let (action, error) = match outcome {
                Ok(Ok(action)) => match validate(event.kind(), &action) {
                    Ok(()) => (action, None),
                    Err(invalid) => {
                        tracing::warn!(
                            mod_name = %registered.name,
                            %invalid,
                            "mod returned illegal action; treating as noop"
                        );
                        (Action::Noop, Some(invalid.to_string()))
                    }
                },
                Ok(Err(err)) => {
                    tracing::warn!(mod_name = %registered.name, %err, "mod failed");
                    (Action::Noop, Some(err.to_string()))
                }
                Err(payload) => {
                    let err = ModError::Panicked(panic_message(payload));
                    tracing::error!(mod_name = %registered.name, %err, "mod panicked");
                    (Action::Noop, Some(err.to_string()))
                }
            };

            self.record(TraceRecord::ModCall {
                request_id: request_id.clone(),
                mod_name: registered.name.clone(),
                event: event.kind(),
                step,
                duration_us: elapsed.as_micros() as u64,
                error,
            });

            if !action.is_noop() {
                let chosen = effective.is_none();
                if !chosen {
                    tracing::warn!(
                        mod_name = %registered.name,
                        action = %action.kind(),
                        "conflicting action discarded; an earlier mod already won this event"
                    );
                }
                self.record(TraceRecord::Action {
                    request_id: request_id.clone(),
                    mod_name: registered.name.clone(),
                    action: action.kind(),
                    step,
                    effective: chosen,
                    conflict: !chosen,
                    details: action_details(&action),
                });
                if chosen {
                    effective = Some(action);
                }
            }
        }

        Ok(DispatchOutcome {
            effective: effective.unwrap_or(Action::Noop),
        })
    }

    fn record(&self, record: TraceRecord) {
        if self.config.trace_enabled {
            self.sink.record(record);
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

const MAX_TOKEN_PREVIEW: usize = 10;

fn token_preview(tokens: &[u32]) -> serde_json::Value {
    serde_json::json!({
        "tokens_preview": tokens.iter().take(MAX_TOKEN_PREVIEW).collect::<Vec<_>>(),
        "token_count": tokens.len(),
    })
}

/// Compact per-action details for the trace backend.
fn action_details(action: &Action) -> serde_json::Value {
    match action {
        Action::Noop => serde_json::json!({}),
        Action::ForceTokens { tokens } | Action::ForceOutput { tokens } => token_preview(tokens),
        Action::AdjustedPrefill { tokens } => serde_json::json!({
            "new_length": tokens.len(),
        }),
        Action::AdjustedLogits { logits } => serde_json::json!({
            "vocab_size": logits.vocab_size(),
        }),
        Action::Backtrack {
            steps,
            replacement_tokens,
        } => {
            let mut details = serde_json::json!({ "backtrack_steps": steps });
            if let Some(tokens) = replacement_tokens {
                details["replacement"] = token_preview(tokens);
            }
            details
        }
        Action::ToolCalls { .. } => serde_json::json!({ "has_tool_calls": true }),
        Action::EmitError { message } => serde_json::json!({
            "error": message.chars().take(100).collect::<String>(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tiller_protocol::{ActionKind, CharTokenizer, EventKind};

    #[derive(Default, Clone)]
    struct RecordingSink {
        records: Arc<Mutex<Vec<TraceRecord>>>,
    }

    impl TraceSink for RecordingSink {
        fn record(&self, record: TraceRecord) {
            self.records.lock().unwrap().push(record);
        }
    }

    fn named(name: &str, handler: impl Mod + 'static) -> RegisteredMod {
        RegisteredMod {
            name: name.into(),
            handler: Box::new(handler),
        }
    }

    use crate::mods::Mod;

    fn added_event() -> Event {
        Event::Added {
            request_id: "r1".into(),
            step: 1,
            added_tokens: vec![5],
            forced: false,
        }
    }

    #[test]
    fn first_non_noop_wins_but_later_mods_still_run() {
        let sink = RecordingSink::default();
        let config = ControlConfig::default();
        let ran_last = Arc::new(Mutex::new(false));
        let ran_last_probe = ran_last.clone();

        let mut mods = vec![
            named("quiet", |_: &Event, a: &ActionBuilder, _: &dyn Tokenizer| {
                Ok(a.noop())
            }),
            named("winner", |_: &Event, a: &ActionBuilder, _: &dyn Tokenizer| {
                a.force_tokens([7]).map_err(|e| ModError::Failed(e.to_string()))
            }),
            named(
                "late",
                move |_: &Event, a: &ActionBuilder, _: &dyn Tokenizer| {
                    *ran_last_probe.lock().unwrap() = true;
                    a.backtrack(1, None).map_err(|e| ModError::Failed(e.to_string()))
                },
            ),
        ];

        let outcome = Dispatcher::new(&sink, &config)
            .dispatch(&added_event(), &mut mods, &CharTokenizer::default())
            .unwrap();

        assert_eq!(outcome.effective, Action::ForceTokens { tokens: vec![7] });
        assert!(*ran_last.lock().unwrap());

        let records = sink.records.lock().unwrap();
        let conflicts: Vec<_> = records
            .iter()
            .filter(|r| matches!(r, TraceRecord::Action { conflict: true, .. }))
            .collect();
        assert_eq!(conflicts.len(), 1);
        match conflicts[0] {
            TraceRecord::Action { action, .. } => assert_eq!(*action, ActionKind::Backtrack),
            _ => unreachable!(),
        }
    }

    #[test]
    fn panicking_mod_is_noop_and_does_not_abort_dispatch() {
        let sink = RecordingSink::default();
        let config = ControlConfig::default();

        let mut mods = vec![
            named("bomb", |_: &Event, _: &ActionBuilder, _: &dyn Tokenizer| {
                panic!("kaboom")
            }),
            named("after", |_: &Event, a: &ActionBuilder, _: &dyn Tokenizer| {
                a.force_tokens([3]).map_err(|e| ModError::Failed(e.to_string()))
            }),
        ];

        let outcome = Dispatcher::new(&sink, &config)
            .dispatch(&added_event(), &mut mods, &CharTokenizer::default())
            .unwrap();
        assert_eq!(outcome.effective, Action::ForceTokens { tokens: vec![3] });

        let records = sink.records.lock().unwrap();
        let failed = records.iter().any(|r| {
            matches!(r, TraceRecord::ModCall { error: Some(e), .. } if e.contains("kaboom"))
        });
        assert!(failed, "panic text should land in the trace");
    }

    #[test]
    fn illegal_action_is_isolated_to_the_offending_mod() {
        let sink = RecordingSink::default();
        let config = ControlConfig::default();

        // AdjustedPrefill is illegal at Added; the raw Action bypasses the
        // builder to exercise the authoritative validate() path.
        let mut mods = vec![named(
            "rogue",
            |_: &Event, _: &ActionBuilder, _: &dyn Tokenizer| {
                Ok(Action::AdjustedPrefill { tokens: vec![1] })
            },
        )];

        let outcome = Dispatcher::new(&sink, &config)
            .dispatch(&added_event(), &mut mods, &CharTokenizer::default())
            .unwrap();
        assert!(outcome.effective.is_noop());

        let records = sink.records.lock().unwrap();
        assert!(records.iter().any(|r| {
            matches!(r, TraceRecord::ModCall { error: Some(e), .. } if e.contains("not permitted"))
        }));
    }

    #[test]
    fn budget_overrun_is_fatal() {
        let sink = RecordingSink::default();
        let config = ControlConfig {
            mod_budget_ms: 0,
            ..ControlConfig::default()
        };

        let mut mods = vec![named(
            "slow",
            |_: &Event, a: &ActionBuilder, _: &dyn Tokenizer| {
                std::thread::sleep(std::time::Duration::from_millis(5));
                Ok(a.noop())
            },
        )];

        let err = Dispatcher::new(&sink, &config)
            .dispatch(&added_event(), &mut mods, &CharTokenizer::default())
            .unwrap_err();
        assert!(matches!(err, ControlError::ModBudgetExceeded { .. }));
    }
}
