//! Prompt injection with strategy-constrained answers.
//!
//! A [`SelfPrompt`] is a mod that takes over a running generation: it
//! forces its prompt text into the sequence, masks logits so the model can
//! only answer in the compiled strategy's shape, optionally forces a
//! completion suffix, and finally backtracks its own traces away according
//! to the erase policy. Element values can additionally be validated and
//! repaired through bounded backtracking.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tiller_core::{Mod, ModError};
use tiller_protocol::{
    Action, ActionBuilder, Event, InvalidActionError, Logits, RequestId, Tokenizer,
};
use tiller_strategy::{RuntimeState, StrategyAutomaton, StrategyCompileError, StrategySpec};

use crate::repair::{ElementValidation, Fallback};

/// What the self-prompt removes from the live sequence once its answer is
/// complete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErasePolicy {
    /// Leave prompt and answer in place.
    #[default]
    None,
    /// Erase the prompt but re-inject the answer (and suffix) as forced
    /// tokens, so the visible completion keeps the answer.
    PromptOnly,
    /// Erase prompt, answer, and suffix; the live sequence reads as if the
    /// self-prompt never ran.
    All,
}

/// Per-request lifecycle state. Created lazily on the first event so the
/// strategy compiles against the request's tokenizer.
struct Session {
    automaton: StrategyAutomaton,
    state: RuntimeState,
    /// Automaton position at the last settled element boundary, restored
    /// when a failing element is backtracked.
    boundary_state: RuntimeState,
    prompt_tokens: Vec<u32>,
    prompt_emitted: bool,
    /// Forced tokens we asked for and have not yet seen arrive.
    outstanding_forced: usize,
    completed: bool,
    suffix_done: bool,
    answer_tokens: Vec<u32>,
    suffix_tokens: Vec<u32>,
    /// Tokens emitted since the last element boundary.
    span_tokens: Vec<u32>,
    /// How many of `span_tokens` were sampled rather than forced.
    span_sampled: usize,
    /// No boundary settled yet; the span still carries the list opener.
    first_span: bool,
    siblings: Vec<String>,
    repair_attempts: u32,
}

/// Mod that injects a prompt and constrains the answer to a strategy.
pub struct SelfPrompt {
    prompt_text: String,
    spec: StrategySpec,
    completion_suffix: Option<String>,
    erase: ErasePolicy,
    mask_value: f32,
    validation: Option<ElementValidation>,
    has_end_with: bool,
    open_text: Option<String>,
    sep_text: Option<String>,
    wrap_text: Option<String>,
    sessions: HashMap<RequestId, Session>,
}

impl SelfPrompt {
    /// A self-prompt forcing `prompt` and constraining the answer to
    /// `spec`. Defaults: a newline completion suffix, no erasure, no
    /// element validation.
    #[must_use]
    pub fn new(prompt: impl Into<String>, spec: StrategySpec) -> Self {
        let (has_end_with, open_text, sep_text, wrap_text) = match &spec {
            StrategySpec::List(list) => (
                list.end_with.is_some(),
                list.open.clone(),
                list.separator.clone(),
                list.wrap.clone(),
            ),
            _ => (false, None, None, None),
        };
        Self {
            prompt_text: prompt.into(),
            spec,
            completion_suffix: Some("\n".to_string()),
            erase: ErasePolicy::None,
            mask_value: -1e9,
            validation: None,
            has_end_with,
            open_text,
            sep_text,
            wrap_text,
            sessions: HashMap::new(),
        }
    }

    /// Override the erase policy.
    #[must_use]
    pub fn with_erase(mut self, erase: ErasePolicy) -> Self {
        self.erase = erase;
        self
    }

    /// Override the completion suffix (`None` disables it).
    #[must_use]
    pub fn with_completion_suffix(mut self, suffix: Option<String>) -> Self {
        self.completion_suffix = suffix;
        self
    }

    /// Override the logit mask value.
    #[must_use]
    pub fn with_mask_value(mut self, mask_value: f32) -> Self {
        self.mask_value = mask_value;
        self
    }

    /// Attach element validation with bounded backtrack repair.
    #[must_use]
    pub fn with_validation(mut self, validation: ElementValidation) -> Self {
        self.validation = Some(validation);
        self
    }

    /// Whether the request's answer is complete (including any erasure).
    #[must_use]
    pub fn is_complete(&self, request_id: &str) -> bool {
        self.sessions.get(request_id).is_some_and(|s| s.completed)
    }

    /// The answer tokens collected so far for a request.
    #[must_use]
    pub fn answer_tokens(&self, request_id: &str) -> Option<&[u32]> {
        self.sessions
            .get(request_id)
            .map(|s| s.answer_tokens.as_slice())
    }

    /// The decoded answer, available once the session completed.
    #[must_use]
    pub fn answer_text(&self, request_id: &str, tokenizer: &dyn Tokenizer) -> Option<String> {
        self.sessions
            .get(request_id)
            .filter(|s| s.completed)
            .map(|s| tokenizer.decode(&s.answer_tokens))
    }

    /// Drop the request's session so the prompt can run again.
    pub fn reset(&mut self, request_id: &str) {
        self.sessions.remove(request_id);
    }

    fn ensure_session(
        &mut self,
        request_id: &str,
        tokenizer: &dyn Tokenizer,
    ) -> Result<(), StrategyCompileError> {
        if !self.sessions.contains_key(request_id) {
            let session = build_session(&self.spec, &self.prompt_text, tokenizer)?;
            self.sessions.insert(request_id.to_string(), session);
        }
        Ok(())
    }

    /// Prefilled handler. Recurs on some engines, so it only initializes.
    pub fn handle_prefilled(
        &mut self,
        request_id: &str,
        actions: &ActionBuilder,
        tokenizer: &dyn Tokenizer,
    ) -> Result<Action, ModError> {
        match self.ensure_session(request_id, tokenizer) {
            Ok(()) => Ok(actions.noop()),
            Err(err) => Ok(actions.emit_error(format!("strategy compile failed: {err}"))),
        }
    }

    /// ForwardPass handler: prompt injection, suffix, completion/erase,
    /// then the logit mask.
    pub fn handle_forward_pass(
        &mut self,
        request_id: &str,
        logits: &Logits,
        actions: &ActionBuilder,
        tokenizer: &dyn Tokenizer,
    ) -> Result<Action, ModError> {
        if let Err(err) = self.ensure_session(request_id, tokenizer) {
            return Ok(actions.emit_error(format!("strategy compile failed: {err}")));
        }
        let suffix_applies = !self.has_end_with && self.erase != ErasePolicy::All;
        let Some(session) = self.sessions.get_mut(request_id) else {
            return Ok(actions.noop());
        };

        if !session.prompt_emitted {
            session.prompt_emitted = true;
            if !session.prompt_tokens.is_empty() {
                session.outstanding_forced = session.prompt_tokens.len();
                let tokens = session.prompt_tokens.clone();
                return actions.force_tokens(tokens).map_err(invalid);
            }
        }
        if session.outstanding_forced > 0 || session.completed {
            return Ok(actions.noop());
        }

        if session.automaton.is_complete(&session.state) {
            if !session.suffix_done {
                session.suffix_done = true;
                if suffix_applies {
                    if let Some(suffix) = &self.completion_suffix {
                        let tokens = tokenizer.encode(suffix);
                        if !tokens.is_empty() {
                            session.suffix_tokens = tokens.clone();
                            session.outstanding_forced = tokens.len();
                            return actions.force_tokens(tokens).map_err(invalid);
                        }
                    }
                }
            }
            session.completed = true;
            let total = session.prompt_tokens.len()
                + session.answer_tokens.len()
                + session.suffix_tokens.len();
            return match self.erase {
                ErasePolicy::None => Ok(actions.noop()),
                ErasePolicy::PromptOnly => {
                    let mut reinject = session.answer_tokens.clone();
                    reinject.extend(&session.suffix_tokens);
                    actions.backtrack(total, Some(reinject)).map_err(invalid)
                }
                ErasePolicy::All => actions.backtrack(total, None).map_err(invalid),
            };
        }

        let allowed = session.automaton.allowed_tokens(&session.state);
        if allowed.is_empty() {
            return Ok(actions.noop());
        }
        actions
            .adjust_logits(logits.mask_to_allowed(&allowed, self.mask_value))
            .map_err(invalid)
    }

    /// Added handler: advance the automaton and settle element boundaries.
    pub fn handle_added(
        &mut self,
        request_id: &str,
        tokens: &[u32],
        forced: bool,
        actions: &ActionBuilder,
        tokenizer: &dyn Tokenizer,
    ) -> Result<Action, ModError> {
        let Some(session) = self.sessions.get_mut(request_id) else {
            return Ok(actions.noop());
        };
        if forced && session.outstanding_forced > 0 {
            session.outstanding_forced = session.outstanding_forced.saturating_sub(tokens.len());
            return Ok(actions.noop());
        }
        if session.completed {
            return Ok(actions.noop());
        }

        for &token in tokens {
            let before = session
                .automaton
                .elements_completed(&session.state)
                .unwrap_or(0);
            session.automaton.step(&mut session.state, token);
            session.span_tokens.push(token);
            if !forced {
                session.span_sampled += 1;
                session.answer_tokens.push(token);
            }
            let after = session
                .automaton
                .elements_completed(&session.state)
                .unwrap_or(0);
            if after > before {
                let repair = settle_element(
                    session,
                    self.validation.as_ref(),
                    self.open_text.as_deref(),
                    self.sep_text.as_deref(),
                    self.wrap_text.as_deref(),
                    actions,
                    tokenizer,
                )?;
                if let Some(action) = repair {
                    return Ok(action);
                }
            }
        }
        Ok(actions.noop())
    }
}

impl Mod for SelfPrompt {
    fn on_event(
        &mut self,
        event: &Event,
        actions: &ActionBuilder,
        tokenizer: &dyn Tokenizer,
    ) -> Result<Action, ModError> {
        match event {
            Event::Prefilled { request_id, .. } => {
                self.handle_prefilled(request_id, actions, tokenizer)
            }
            Event::ForwardPass {
                request_id, logits, ..
            } => self.handle_forward_pass(request_id, logits, actions, tokenizer),
            Event::Sampled { .. } => Ok(actions.noop()),
            Event::Added {
                request_id,
                added_tokens,
                forced,
                ..
            } => self.handle_added(request_id, added_tokens, *forced, actions, tokenizer),
        }
    }
}

fn build_session(
    spec: &StrategySpec,
    prompt: &str,
    tokenizer: &dyn Tokenizer,
) -> Result<Session, StrategyCompileError> {
    let automaton = spec.compile(tokenizer)?;
    let state = automaton.start();
    Ok(Session {
        boundary_state: state.clone(),
        state,
        automaton,
        prompt_tokens: tokenizer.encode(prompt),
        prompt_emitted: false,
        outstanding_forced: 0,
        completed: false,
        suffix_done: false,
        answer_tokens: Vec::new(),
        suffix_tokens: Vec::new(),
        span_tokens: Vec::new(),
        span_sampled: 0,
        first_span: true,
        siblings: Vec::new(),
        repair_attempts: 0,
    })
}

/// Judge the element that just closed. Returns a repair backtrack when the
/// value fails validation within budget, or the fallback's replacement
/// backtrack past it; `None` means the boundary settled and generation
/// continues.
fn settle_element(
    session: &mut Session,
    validation: Option<&ElementValidation>,
    open: Option<&str>,
    sep: Option<&str>,
    wrap: Option<&str>,
    actions: &ActionBuilder,
    tokenizer: &dyn Tokenizer,
) -> Result<Option<Action>, ModError> {
    // Forced spans (replacement re-injections) were judged when scheduled.
    let Some(validation) = validation.filter(|_| session.span_sampled > 0) else {
        advance_boundary(session);
        return Ok(None);
    };

    let span_text = tokenizer.decode(&session.span_tokens);
    let leading_open = if session.first_span { open } else { None };
    let (start, end) = value_bounds(&span_text, leading_open, sep, wrap);
    let value = span_text[start..end].to_string();

    if validation.passes(&value, &session.siblings) {
        session.siblings.push(value);
        session.repair_attempts = 0;
        advance_boundary(session);
        return Ok(None);
    }

    session.repair_attempts += 1;
    let span_len = session.span_tokens.len();
    if session.repair_attempts <= validation.policy.max_attempts {
        tracing::debug!(
            attempt = session.repair_attempts,
            %value,
            "element failed validation, backtracking"
        );
        session.state = session.boundary_state.clone();
        let keep = session.answer_tokens.len().saturating_sub(session.span_sampled);
        session.answer_tokens.truncate(keep);
        reset_span(session);
        return actions.backtrack(span_len, None).map(Some).map_err(invalid);
    }

    match validation.policy.fallback.clone() {
        Fallback::Accept => {
            tracing::debug!(%value, "repair budget exhausted, accepting value");
            session.siblings.push(value);
            session.repair_attempts = 0;
            advance_boundary(session);
            Ok(None)
        }
        Fallback::Replace(replacement) => {
            tracing::debug!(%value, %replacement, "repair budget exhausted, replacing value");
            let rebuilt = format!("{}{}{}", &span_text[..start], replacement, &span_text[end..]);
            let forced = tokenizer.encode(&rebuilt);
            session.state = session.boundary_state.clone();
            let keep = session.answer_tokens.len().saturating_sub(session.span_sampled);
            session.answer_tokens.truncate(keep);
            session.answer_tokens.extend(&forced);
            session.siblings.push(replacement);
            session.repair_attempts = 0;
            reset_span(session);
            actions
                .backtrack(span_len, Some(forced))
                .map(Some)
                .map_err(invalid)
        }
    }
}

fn advance_boundary(session: &mut Session) {
    session.boundary_state = session.state.clone();
    session.span_tokens.clear();
    session.span_sampled = 0;
    session.first_span = false;
}

fn reset_span(session: &mut Session) {
    session.span_tokens.clear();
    session.span_sampled = 0;
}

/// Byte bounds of the element value inside its span text, stripping the
/// delimiters the span carried along.
fn value_bounds(span: &str, open: Option<&str>, sep: Option<&str>, wrap: Option<&str>) -> (usize, usize) {
    let mut start = 0;
    let mut end = span.len();
    if let Some(open) = open {
        if span[start..end].starts_with(open) {
            start += open.len();
        }
    }
    if let Some(sep) = sep {
        if span[start..end].starts_with(sep) {
            start += sep.len();
        }
    }
    if let Some(wrap) = wrap {
        if span[start..end].starts_with(wrap) {
            start += wrap.len();
        }
        if end - start >= wrap.len() && span[start..end].ends_with(wrap) {
            end -= wrap.len();
        }
    }
    (start, end)
}

fn invalid(err: InvalidActionError) -> ModError {
    ModError::Failed(err.to_string())
}
