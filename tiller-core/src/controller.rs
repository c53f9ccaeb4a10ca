//! Per-request generation control.
//!
//! [`RequestController`] is what the serving loop drives: one instance per
//! request, fed the four generation events in order, returning a
//! [`Directive`] the engine must honor before its next forward pass.

use std::collections::VecDeque;
use std::sync::Arc;

use tiller_protocol::{Action, Event, EventKind, InvalidActionError, Logits, RequestId, Tokenizer};

use crate::backtrack::{BacktrackCoordinator, BacktrackOutcome};
use crate::buffer::{TokenBuffer, TokenEntry};
use crate::config::ControlConfig;
use crate::dispatch::Dispatcher;
use crate::error::{ControlError, ControlResult};
use crate::mods::RegisteredMod;
use crate::trace::TraceSink;

/// What the serving loop must do before continuing generation.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Proceed normally.
    Continue,
    /// The prompt prefix was replaced; re-prefill with these tokens.
    Reprefill(Vec<u32>),
    /// Sample from these logits instead of the raw ones.
    UseLogits(Logits),
    /// Commit these tokens as forced instead of sampling this step.
    ForceNext(Vec<u32>),
    /// Tokens were tombstoned; honor the cache invalidation, then restart
    /// the step loop from the rewound position.
    Backtracked(BacktrackOutcome),
    /// The request is finished with exactly these output tokens.
    Finish(Vec<u32>),
    /// The request is finished with a tool-call payload.
    ToolCalls(serde_json::Value),
    /// The request is finished with an explicit error for the caller.
    Error(String),
}

/// Drives one request through the event loop.
///
/// Owns the token buffer, the per-request mod instances, and the forced
/// token queue. Events for one request are strictly sequential; the
/// controller takes `&mut self` and never shares state across requests.
///
/// Backtrack accounting is uniform across event phases: the buffer
/// tombstones exactly `steps` live tokens, and the step-addressed
/// [`crate::backtrack::CacheInvalidation`] covers whatever cache the
/// engine holds at or past the erased span, including an in-flight
/// forward-pass position that was never committed.
pub struct RequestController {
    request_id: RequestId,
    config: ControlConfig,
    sink: Arc<dyn TraceSink>,
    mods: Vec<RegisteredMod>,
    buffer: TokenBuffer,
    coordinator: BacktrackCoordinator,
    forced_queue: VecDeque<u32>,
    step: u32,
    max_steps: u32,
    closed: bool,
}

impl RequestController {
    /// Create a controller seeded with the request's prompt.
    #[must_use]
    pub fn new(
        request_id: impl Into<RequestId>,
        prompt_tokens: &[u32],
        max_steps: u32,
        mods: Vec<RegisteredMod>,
        config: ControlConfig,
        sink: Arc<dyn TraceSink>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            config,
            sink,
            mods,
            buffer: TokenBuffer::new(prompt_tokens),
            coordinator: BacktrackCoordinator,
            forced_queue: VecDeque::new(),
            step: 0,
            max_steps,
            closed: false,
        }
    }

    /// The request this controller belongs to.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Current generation step.
    #[must_use]
    pub fn step(&self) -> u32 {
        self.step
    }

    /// Whether the request has finished or been aborted.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of forced tokens waiting to be committed.
    #[must_use]
    pub fn forced_pending(&self) -> usize {
        self.forced_queue.len()
    }

    /// The live token sequence the model consumes.
    #[must_use]
    pub fn live_tokens(&self) -> Vec<u32> {
        self.buffer.live_tokens()
    }

    /// Live completion tokens only.
    #[must_use]
    pub fn live_completion(&self) -> Vec<u32> {
        self.buffer.live_completion()
    }

    /// Full committed history, tombstones included.
    #[must_use]
    pub fn audit_entries(&self) -> &[TokenEntry] {
        self.buffer.audit_entries()
    }

    /// Stop accepting events and drop nothing: the buffer stays readable
    /// for the final audit pass.
    pub fn abort(&mut self) {
        self.closed = true;
    }

    /// Close out a request that ended naturally (EOS or step limit),
    /// returning the live completion.
    pub fn finish_natural(&mut self) -> Vec<u32> {
        self.closed = true;
        self.buffer.live_completion()
    }

    /// Handle a Prefilled event. Recurs every step on some engines; mods
    /// are expected to self-guard, the controller only relays.
    pub fn on_prefilled(&mut self, tokenizer: &dyn Tokenizer) -> ControlResult<Directive> {
        self.ensure_active()?;
        let event = Event::Prefilled {
            request_id: self.request_id.clone(),
            step: self.step,
            max_steps: self.max_steps,
            prompt_tokens: self.buffer.prompt_tokens(),
        };
        let action = self.dispatch(&event, tokenizer)?;
        match action {
            Action::AdjustedPrefill { tokens } => {
                self.buffer.adjust_prefill(&tokens)?;
                Ok(Directive::Reprefill(tokens))
            }
            other => self.common_directive(EventKind::Prefilled, other),
        }
    }

    /// Handle a ForwardPass event. Forced tokens preempt sampling, so a
    /// non-empty queue yields [`Directive::ForceNext`] even when the
    /// logits were adjusted this step.
    pub fn on_forward_pass(
        &mut self,
        logits: Logits,
        tokenizer: &dyn Tokenizer,
    ) -> ControlResult<Directive> {
        self.ensure_active()?;
        self.buffer.lock_prefill();
        let event = Event::ForwardPass {
            request_id: self.request_id.clone(),
            step: self.step,
            logits,
        };
        let action = self.dispatch(&event, tokenizer)?;
        let mut adjusted: Option<Logits> = None;
        match action {
            Action::AdjustedLogits { logits } => adjusted = Some(logits),
            Action::ForceTokens { tokens } => self.forced_queue.extend(tokens),
            Action::Backtrack {
                steps,
                replacement_tokens,
            } => return self.apply_backtrack(steps, replacement_tokens),
            other => {
                let directive = self.common_directive(EventKind::ForwardPass, other)?;
                if directive != Directive::Continue {
                    return Ok(directive);
                }
            }
        }
        if let Some(token) = self.forced_queue.pop_front() {
            return Ok(Directive::ForceNext(vec![token]));
        }
        match adjusted {
            Some(logits) => Ok(Directive::UseLogits(logits)),
            None => Ok(Directive::Continue),
        }
    }

    /// Handle a Sampled event. The token is not yet committed; a
    /// Backtrack here erases committed history only, and the sampled
    /// token is simply never added.
    pub fn on_sampled(&mut self, token: u32, tokenizer: &dyn Tokenizer) -> ControlResult<Directive> {
        self.ensure_active()?;
        let event = Event::Sampled {
            request_id: self.request_id.clone(),
            step: self.step,
            token,
        };
        let action = self.dispatch(&event, tokenizer)?;
        match action {
            Action::ForceTokens { tokens } => {
                self.forced_queue.extend(tokens);
                Ok(Directive::Continue)
            }
            Action::Backtrack {
                steps,
                replacement_tokens,
            } => self.apply_backtrack(steps, replacement_tokens),
            other => self.common_directive(EventKind::Sampled, other),
        }
    }

    /// Handle an Added event. The tokens are committed to the buffer
    /// before mods see the event, so a Backtrack here can cover them.
    pub fn on_added(
        &mut self,
        tokens: &[u32],
        forced: bool,
        tokenizer: &dyn Tokenizer,
    ) -> ControlResult<Directive> {
        self.ensure_active()?;
        for &token in tokens {
            self.step += 1;
            self.buffer.append(&[token], forced, self.step);
        }
        let event = Event::Added {
            request_id: self.request_id.clone(),
            step: self.step,
            added_tokens: tokens.to_vec(),
            forced,
        };
        let action = self.dispatch(&event, tokenizer)?;
        match action {
            Action::ForceTokens { tokens } => {
                self.forced_queue.extend(tokens);
                Ok(Directive::Continue)
            }
            Action::Backtrack {
                steps,
                replacement_tokens,
            } => self.apply_backtrack(steps, replacement_tokens),
            other => self.common_directive(EventKind::Added, other),
        }
    }

    fn ensure_active(&self) -> ControlResult<()> {
        if self.closed {
            return Err(ControlError::Aborted(self.request_id.clone()));
        }
        Ok(())
    }

    fn dispatch(&mut self, event: &Event, tokenizer: &dyn Tokenizer) -> ControlResult<Action> {
        let outcome =
            Dispatcher::new(self.sink.as_ref(), &self.config).dispatch(event, &mut self.mods, tokenizer)?;
        Ok(outcome.effective)
    }

    /// Tombstone `steps` live tokens and queue any replacement as forced.
    /// Replacement tokens go through the forced queue rather than straight
    /// into the buffer so that mods observe them as Added events.
    fn apply_backtrack(
        &mut self,
        steps: usize,
        replacement: Option<Vec<u32>>,
    ) -> ControlResult<Directive> {
        let mut outcome = self.coordinator.apply(&mut self.buffer, steps, None, self.step)?;
        self.step = outcome.cache_invalidation.from_step.saturating_sub(1);
        if let Some(tokens) = replacement {
            outcome.replacement_tokens = tokens.clone();
            self.forced_queue.extend(tokens);
        }
        tracing::debug!(
            request_id = %self.request_id,
            steps,
            from_step = outcome.cache_invalidation.from_step,
            "backtracked"
        );
        Ok(Directive::Backtracked(outcome))
    }

    /// Shared handling for terminal actions and Noop. Phase-specific
    /// variants are matched by the calling event method before this runs;
    /// one arriving here means the dispatcher let an illegal action
    /// through, which is surfaced rather than swallowed.
    fn common_directive(
        &mut self,
        event_kind: EventKind,
        action: Action,
    ) -> ControlResult<Directive> {
        match action {
            Action::Noop => Ok(Directive::Continue),
            Action::ForceOutput { tokens } => {
                self.closed = true;
                Ok(Directive::Finish(tokens))
            }
            Action::ToolCalls { payload } => {
                self.closed = true;
                Ok(Directive::ToolCalls(payload))
            }
            Action::EmitError { message } => {
                self.closed = true;
                tracing::warn!(request_id = %self.request_id, %message, "request errored");
                Ok(Directive::Error(message))
            }
            other => Err(ControlError::InvalidAction(InvalidActionError {
                event_kind,
                action_kind: other.kind(),
            })),
        }
    }
}
