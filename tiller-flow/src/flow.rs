//! Question graphs over self-prompts.
//!
//! A [`FlowEngine`] chains [`SelfPrompt`]s: each question constrains one
//! answer, and the decoded answer picks the next route. Routes either move
//! to another question, force a closing message, or terminate the request
//! with a fixed output.

use std::collections::HashMap;

use tiller_core::{Mod, ModError};
use tiller_protocol::{
    Action, ActionBuilder, Event, InvalidActionError, Logits, RequestId, Tokenizer,
};
use tiller_strategy::StrategySpec;

use crate::error::FlowRouteError;
use crate::repair::ElementValidation;
use crate::self_prompt::{ErasePolicy, SelfPrompt};

/// Where a completed answer sends the flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Ask another question.
    Question(String),
    /// Force a closing message (text plus EOS) and stop asking.
    Message(String),
    /// Terminate the request with exactly this output text.
    Output(String),
}

/// One question in a flow: a prompt, an answer shape, and routes keyed by
/// the lowercased answer.
pub struct FlowQuestion {
    name: String,
    prompt: String,
    spec: StrategySpec,
    completion_suffix: Option<String>,
    erase: ErasePolicy,
    validation: Option<ElementValidation>,
    routes: HashMap<String, Route>,
    default_route: Option<Route>,
}

impl FlowQuestion {
    #[must_use]
    pub fn new(name: impl Into<String>, prompt: impl Into<String>, spec: StrategySpec) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            spec,
            completion_suffix: Some("\n".to_string()),
            erase: ErasePolicy::None,
            validation: None,
            routes: HashMap::new(),
            default_route: None,
        }
    }

    #[must_use]
    pub fn with_erase(mut self, erase: ErasePolicy) -> Self {
        self.erase = erase;
        self
    }

    #[must_use]
    pub fn with_completion_suffix(mut self, suffix: Option<String>) -> Self {
        self.completion_suffix = suffix;
        self
    }

    #[must_use]
    pub fn with_validation(mut self, validation: ElementValidation) -> Self {
        self.validation = Some(validation);
        self
    }

    /// Route taken when the answer matches `answer` (case-insensitive).
    #[must_use]
    pub fn on(mut self, answer: impl Into<String>, route: Route) -> Self {
        self.routes.insert(answer.into().to_lowercase(), route);
        self
    }

    /// Route taken when no explicit answer matches.
    #[must_use]
    pub fn otherwise(mut self, route: Route) -> Self {
        self.default_route = Some(route);
        self
    }
}

struct QuestionRuntime {
    routes: HashMap<String, Route>,
    default_route: Option<Route>,
    prompt: SelfPrompt,
}

struct FlowState {
    current: Option<String>,
    /// A route decided while the completion's own action (a backtrack) was
    /// still in flight; executed on the next forward pass.
    pending_route: Option<Route>,
    answers: HashMap<String, String>,
}

/// Mod that walks a request through a graph of questions.
pub struct FlowEngine {
    entry: String,
    questions: HashMap<String, QuestionRuntime>,
    states: HashMap<RequestId, FlowState>,
}

impl FlowEngine {
    /// Build a flow starting at the question named `entry`.
    #[must_use]
    pub fn new(entry: impl Into<String>, questions: Vec<FlowQuestion>) -> Self {
        let questions = questions
            .into_iter()
            .map(|q| {
                let mut prompt = SelfPrompt::new(q.prompt, q.spec)
                    .with_erase(q.erase)
                    .with_completion_suffix(q.completion_suffix);
                if let Some(validation) = q.validation {
                    prompt = prompt.with_validation(validation);
                }
                (
                    q.name,
                    QuestionRuntime {
                        routes: q.routes,
                        default_route: q.default_route,
                        prompt,
                    },
                )
            })
            .collect();
        Self {
            entry: entry.into(),
            questions,
            states: HashMap::new(),
        }
    }

    /// Answers recorded so far for a request, keyed by question name.
    #[must_use]
    pub fn answers(&self, request_id: &str) -> Option<&HashMap<String, String>> {
        self.states.get(request_id).map(|s| &s.answers)
    }

    fn ensure_state(&mut self, request_id: &str) {
        if !self.states.contains_key(request_id) {
            self.states.insert(
                request_id.to_string(),
                FlowState {
                    current: Some(self.entry.clone()),
                    pending_route: None,
                    answers: HashMap::new(),
                },
            );
        }
    }

    fn handle_prefilled(
        &mut self,
        request_id: &str,
        actions: &ActionBuilder,
        tokenizer: &dyn Tokenizer,
    ) -> Result<Action, ModError> {
        self.ensure_state(request_id);
        let Some(current) = self.states.get(request_id).and_then(|s| s.current.clone()) else {
            return Ok(actions.noop());
        };
        let Some(runtime) = self.questions.get_mut(&current) else {
            return Ok(actions.emit_error(format!("flow question '{current}' is not defined")));
        };
        runtime.prompt.handle_prefilled(request_id, actions, tokenizer)
    }

    fn handle_forward_pass(
        &mut self,
        request_id: &str,
        logits: &Logits,
        actions: &ActionBuilder,
        tokenizer: &dyn Tokenizer,
    ) -> Result<Action, ModError> {
        self.ensure_state(request_id);
        let pending = self
            .states
            .get_mut(request_id)
            .and_then(|s| s.pending_route.take());
        if let Some(route) = pending {
            return self.perform_route(request_id, route, logits, actions, tokenizer);
        }

        let Some(current) = self.states.get(request_id).and_then(|s| s.current.clone()) else {
            return Ok(actions.noop());
        };
        let Some(runtime) = self.questions.get_mut(&current) else {
            return Ok(actions.emit_error(format!("flow question '{current}' is not defined")));
        };
        let action = runtime
            .prompt
            .handle_forward_pass(request_id, logits, actions, tokenizer)?;
        if action.is_terminal() {
            return Ok(action);
        }

        let already_routed = self
            .states
            .get(request_id)
            .is_some_and(|s| s.answers.contains_key(&current));
        if !runtime.prompt.is_complete(request_id) || already_routed {
            return Ok(action);
        }

        let answer = runtime
            .prompt
            .answer_text(request_id, tokenizer)
            .unwrap_or_default();
        let route = runtime
            .routes
            .get(&answer.trim().to_lowercase())
            .or(runtime.default_route.as_ref())
            .cloned();
        if let Some(state) = self.states.get_mut(request_id) {
            state.answers.insert(current.clone(), answer.clone());
        }
        let Some(route) = route else {
            let err = FlowRouteError {
                question: current,
                answer,
            };
            tracing::warn!(%err, "flow routing failed");
            return Ok(actions.emit_error(err.to_string()));
        };

        if matches!(action, Action::Backtrack { .. }) {
            // The erase backtrack must land before the next question runs.
            if let Some(state) = self.states.get_mut(request_id) {
                state.pending_route = Some(route);
            }
            return Ok(action);
        }
        self.perform_route(request_id, route, logits, actions, tokenizer)
    }

    fn handle_added(
        &mut self,
        request_id: &str,
        tokens: &[u32],
        forced: bool,
        actions: &ActionBuilder,
        tokenizer: &dyn Tokenizer,
    ) -> Result<Action, ModError> {
        let Some(current) = self.states.get(request_id).and_then(|s| s.current.clone()) else {
            return Ok(actions.noop());
        };
        let Some(runtime) = self.questions.get_mut(&current) else {
            return Ok(actions.noop());
        };
        runtime
            .prompt
            .handle_added(request_id, tokens, forced, actions, tokenizer)
    }

    fn perform_route(
        &mut self,
        request_id: &str,
        route: Route,
        logits: &Logits,
        actions: &ActionBuilder,
        tokenizer: &dyn Tokenizer,
    ) -> Result<Action, ModError> {
        match route {
            Route::Question(name) => {
                if let Some(state) = self.states.get_mut(request_id) {
                    state.current = Some(name.clone());
                    // A revisited question answers afresh.
                    state.answers.remove(&name);
                }
                let Some(runtime) = self.questions.get_mut(&name) else {
                    return Ok(actions.emit_error(format!("flow question '{name}' is not defined")));
                };
                runtime.prompt.reset(request_id);
                runtime
                    .prompt
                    .handle_forward_pass(request_id, logits, actions, tokenizer)
            }
            Route::Message(text) => {
                if let Some(state) = self.states.get_mut(request_id) {
                    state.current = None;
                }
                let mut tokens = tokenizer.encode(&text);
                if let Some(eos) = tokenizer.eos_token_id() {
                    tokens.push(eos);
                }
                actions.force_tokens(tokens).map_err(invalid)
            }
            Route::Output(text) => {
                if let Some(state) = self.states.get_mut(request_id) {
                    state.current = None;
                }
                actions.force_output(tokenizer.encode(&text)).map_err(invalid)
            }
        }
    }
}

impl Mod for FlowEngine {
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

fn invalid(err: InvalidActionError) -> ModError {
    ModError::Failed(err.to_string())
}
