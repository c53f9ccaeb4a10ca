//! Strategy compilation and the token-gating runtime.
//!
//! Compilation does all tokenizer work up front: choices become a token
//! trie, character classes become precomputed id sets with per-token
//! lengths, delimiters are tokenized once. The resulting
//! [`StrategyAutomaton`] is immutable; per-generation mutation lives
//! entirely in [`RuntimeState`].

use std::collections::{HashMap, HashSet};

use tiller_protocol::Tokenizer;

use crate::error::{StrategyCompileError, StrategyResult};
use crate::spec::{ListSpec, StrategySpec};
use crate::trie::{TokenTrie, ROOT};

#[derive(Debug, Clone)]
enum Node {
    Choices {
        trie: TokenTrie,
    },
    Until {
        /// Full vocabulary minus EOS.
        allowed: HashSet<u32>,
        /// Ids whose decoded text contains the stop character.
        stop_ids: HashSet<u32>,
    },
    Chars {
        allowed: HashSet<u32>,
        /// Decoded character count per allowed id, for max gating.
        lengths: HashMap<u32, usize>,
        min: usize,
        max: Option<usize>,
    },
    Tokens {
        ids: HashSet<u32>,
    },
    List(ListNode),
}

#[derive(Debug, Clone)]
struct ListNode {
    open: Vec<u32>,
    close: Vec<u32>,
    wrap: Vec<u32>,
    sep: Vec<u32>,
    end_with: Vec<u32>,
    min: usize,
    max: Option<usize>,
    element: Box<Node>,
}

impl ListNode {
    fn under_max(&self, elements_completed: usize) -> bool {
        self.max.map_or(true, |max| elements_completed < max)
    }
}

/// Phase of a list's delimiter machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListPhase {
    InOpen,
    AwaitElement,
    InWrapOpen,
    InElement,
    InWrapClose,
    AwaitSep,
    InSeparator,
    InClose,
    InEndWith,
}

/// Mutable runtime position within a list automaton.
#[derive(Debug, Clone)]
pub struct ListState {
    phase: ListPhase,
    open_pos: usize,
    wrap_pos: usize,
    sep_pos: usize,
    close_pos: usize,
    end_with_pos: usize,
    elements_completed: usize,
    element: Option<Box<RuntimeState>>,
    complete: bool,
}

impl ListState {
    /// Current delimiter phase.
    #[must_use]
    pub fn phase(&self) -> ListPhase {
        self.phase
    }

    /// Elements fully emitted so far.
    #[must_use]
    pub fn elements_completed(&self) -> usize {
        self.elements_completed
    }
}

/// Mutable runtime position within an automaton. Opaque apart from the
/// list accessors; callers thread it through the automaton's methods.
#[derive(Debug, Clone)]
pub enum RuntimeState {
    Choices {
        active: Vec<usize>,
        started: bool,
        complete: bool,
    },
    Until {
        complete: bool,
    },
    Chars {
        chars_emitted: usize,
        complete: bool,
    },
    Tokens {
        complete: bool,
    },
    List(Box<ListState>),
}

/// An immutable token-gating automaton compiled from a [`StrategySpec`].
#[derive(Debug, Clone)]
pub struct StrategyAutomaton {
    root: Node,
}

impl StrategySpec {
    /// Compile this spec against a tokenizer.
    pub fn compile(&self, tokenizer: &dyn Tokenizer) -> StrategyResult<StrategyAutomaton> {
        let root = compile_node(self, tokenizer)?;
        tracing::debug!(vocab_size = tokenizer.vocab_size(), "compiled strategy automaton");
        Ok(StrategyAutomaton { root })
    }
}

fn encode_required(
    text: &str,
    tokenizer: &dyn Tokenizer,
) -> Result<Vec<u32>, StrategyCompileError> {
    let ids = tokenizer.encode(text);
    if ids.is_empty() {
        return Err(StrategyCompileError::Unencodable(text.to_string()));
    }
    Ok(ids)
}

fn encode_optional(
    text: Option<&String>,
    tokenizer: &dyn Tokenizer,
) -> Result<Vec<u32>, StrategyCompileError> {
    match text {
        Some(text) => encode_required(text, tokenizer),
        None => Ok(Vec::new()),
    }
}

fn compile_node(
    spec: &StrategySpec,
    tokenizer: &dyn Tokenizer,
) -> Result<Node, StrategyCompileError> {
    match spec {
        StrategySpec::Choices { options } => {
            if options.is_empty() {
                return Err(StrategyCompileError::EmptyOptions);
            }
            let mut trie = TokenTrie::new();
            for option in options {
                trie.insert(&encode_required(option, tokenizer)?);
            }
            Ok(Node::Choices { trie })
        }
        StrategySpec::Until { stop } => {
            let eos = tokenizer.eos_token_id();
            let mut allowed = HashSet::new();
            let mut stop_ids = HashSet::new();
            for id in 0..tokenizer.vocab_size() as u32 {
                if Some(id) == eos {
                    continue;
                }
                allowed.insert(id);
                if tokenizer.decode_token(id).contains(*stop) {
                    stop_ids.insert(id);
                }
            }
            Ok(Node::Until { allowed, stop_ids })
        }
        StrategySpec::Chars { kind, min, max } => {
            if let Some(max) = max {
                if min > max {
                    return Err(StrategyCompileError::MinExceedsMax {
                        min: *min,
                        max: *max,
                    });
                }
            }
            let eos = tokenizer.eos_token_id();
            let mut allowed = HashSet::new();
            let mut lengths = HashMap::new();
            for id in 0..tokenizer.vocab_size() as u32 {
                if Some(id) == eos {
                    continue;
                }
                let text = tokenizer.decode_token(id);
                if kind.matches(&text) {
                    allowed.insert(id);
                    lengths.insert(id, text.chars().count());
                }
            }
            if allowed.is_empty() {
                return Err(StrategyCompileError::UnsatisfiableCharClass);
            }
            Ok(Node::Chars {
                allowed,
                lengths,
                min: *min,
                max: *max,
            })
        }
        StrategySpec::Tokens { options } => {
            if options.is_empty() {
                return Err(StrategyCompileError::EmptyOptions);
            }
            let mut ids = HashSet::new();
            for option in options {
                let encoded = tokenizer.encode(option);
                if encoded.len() != 1 {
                    return Err(StrategyCompileError::NotSingleToken {
                        text: option.clone(),
                        count: encoded.len(),
                    });
                }
                ids.insert(encoded[0]);
            }
            Ok(Node::Tokens { ids })
        }
        StrategySpec::List(list) => Ok(Node::List(compile_list(list, tokenizer)?)),
    }
}

fn compile_list(
    list: &ListSpec,
    tokenizer: &dyn Tokenizer,
) -> Result<ListNode, StrategyCompileError> {
    if let Some(max) = list.max {
        if list.min > max {
            return Err(StrategyCompileError::MinExceedsMax { min: list.min, max });
        }
    }
    Ok(ListNode {
        open: encode_optional(list.open.as_ref(), tokenizer)?,
        close: encode_optional(list.close.as_ref(), tokenizer)?,
        wrap: encode_optional(list.wrap.as_ref(), tokenizer)?,
        sep: encode_optional(list.separator.as_ref(), tokenizer)?,
        end_with: encode_optional(list.end_with.as_ref(), tokenizer)?,
        min: list.min,
        max: list.max,
        element: Box::new(compile_node(&list.element, tokenizer)?),
    })
}

impl StrategyAutomaton {
    /// Fresh runtime state positioned at the start of the shape.
    #[must_use]
    pub fn start(&self) -> RuntimeState {
        start_node(&self.root)
    }

    /// Token ids permitted at the current position. Empty once complete.
    #[must_use]
    pub fn allowed_tokens(&self, state: &RuntimeState) -> HashSet<u32> {
        allowed_node(&self.root, state)
    }

    /// Advance on a committed token. Tokens outside the allowed set leave
    /// the state unchanged; the caller's logit mask is expected to make
    /// that unreachable.
    pub fn step(&self, state: &mut RuntimeState, token: u32) {
        step_node(&self.root, state, token);
    }

    /// Whether the shape is fully emitted and the constraint released.
    #[must_use]
    pub fn is_complete(&self, state: &RuntimeState) -> bool {
        complete_node(&self.root, state)
    }

    /// For list shapes, the number of elements fully emitted.
    #[must_use]
    pub fn elements_completed(&self, state: &RuntimeState) -> Option<usize> {
        match state {
            RuntimeState::List(list) => Some(list.elements_completed),
            _ => None,
        }
    }

    /// The list delimiter phase, for element-boundary observers.
    #[must_use]
    pub fn list_phase(&self, state: &RuntimeState) -> Option<ListPhase> {
        match state {
            RuntimeState::List(list) => Some(list.phase),
            _ => None,
        }
    }
}

fn start_node(node: &Node) -> RuntimeState {
    match node {
        Node::Choices { .. } => RuntimeState::Choices {
            active: vec![ROOT],
            started: false,
            complete: false,
        },
        Node::Until { .. } => RuntimeState::Until { complete: false },
        Node::Chars { .. } => RuntimeState::Chars {
            chars_emitted: 0,
            complete: false,
        },
        Node::Tokens { .. } => RuntimeState::Tokens { complete: false },
        Node::List(list) => RuntimeState::List(Box::new(ListState {
            phase: if list.open.is_empty() {
                ListPhase::AwaitElement
            } else {
                ListPhase::InOpen
            },
            open_pos: 0,
            wrap_pos: 0,
            sep_pos: 0,
            close_pos: 0,
            end_with_pos: 0,
            elements_completed: 0,
            element: None,
            complete: false,
        })),
    }
}

fn allowed_node(node: &Node, state: &RuntimeState) -> HashSet<u32> {
    match (node, state) {
        (Node::Choices { trie }, RuntimeState::Choices { active, complete, .. }) => {
            if *complete {
                return HashSet::new();
            }
            let mut allowed = HashSet::new();
            for &index in active {
                allowed.extend(trie.edges(index));
            }
            allowed
        }
        (Node::Until { allowed, .. }, RuntimeState::Until { complete }) => {
            if *complete {
                HashSet::new()
            } else {
                allowed.clone()
            }
        }
        (
            Node::Chars {
                allowed,
                lengths,
                max,
                ..
            },
            RuntimeState::Chars {
                chars_emitted,
                complete,
            },
        ) => {
            if *complete {
                return HashSet::new();
            }
            match max {
                Some(max) => {
                    let remaining = max.saturating_sub(*chars_emitted);
                    allowed
                        .iter()
                        .filter(|id| lengths.get(id).is_some_and(|&len| len <= remaining))
                        .copied()
                        .collect()
                }
                None => allowed.clone(),
            }
        }
        (Node::Tokens { ids }, RuntimeState::Tokens { complete }) => {
            if *complete {
                HashSet::new()
            } else {
                ids.clone()
            }
        }
        (Node::List(list), RuntimeState::List(state)) => allowed_list(list, state),
        _ => {
            debug_assert!(false, "runtime state does not match automaton shape");
            HashSet::new()
        }
    }
}

fn allowed_list(list: &ListNode, state: &ListState) -> HashSet<u32> {
    let mut allowed = HashSet::new();
    if state.complete {
        return allowed;
    }
    match state.phase {
        ListPhase::InOpen => {
            if let Some(&token) = list.open.get(state.open_pos) {
                allowed.insert(token);
            }
        }
        ListPhase::AwaitElement => {
            if list.under_max(state.elements_completed) {
                if let Some(&wrap_open) = list.wrap.first() {
                    allowed.insert(wrap_open);
                } else {
                    // Element starts bare; offer its initial token set.
                    allowed.extend(allowed_node(&list.element, &start_node(&list.element)));
                }
            }
            if state.elements_completed >= list.min {
                if let Some(&close) = list.close.first() {
                    allowed.insert(close);
                }
            }
        }
        ListPhase::InWrapOpen | ListPhase::InWrapClose => {
            if let Some(&token) = list.wrap.get(state.wrap_pos) {
                allowed.insert(token);
            }
        }
        ListPhase::InElement => {
            if let Some(element_state) = &state.element {
                let done = complete_node(&list.element, element_state);
                if !done {
                    allowed.extend(allowed_node(&list.element, element_state));
                }
                // The closing wrap follows a finished element, and may also
                // end an unbounded run once its minimum is met; bare
                // elements advance out of this phase in step().
                if done || can_end_node(&list.element, element_state) {
                    if let Some(&wrap) = list.wrap.first() {
                        allowed.insert(wrap);
                    }
                }
            }
        }
        ListPhase::AwaitSep => {
            if list.under_max(state.elements_completed) {
                if let Some(&sep) = list.sep.first() {
                    allowed.insert(sep);
                }
            }
            if state.elements_completed >= list.min {
                if let Some(&close) = list.close.first() {
                    allowed.insert(close);
                }
            }
        }
        ListPhase::InSeparator => {
            if let Some(&token) = list.sep.get(state.sep_pos) {
                allowed.insert(token);
            }
        }
        ListPhase::InClose => {
            if let Some(&token) = list.close.get(state.close_pos) {
                allowed.insert(token);
            }
        }
        ListPhase::InEndWith => {
            if let Some(&token) = list.end_with.get(state.end_with_pos) {
                allowed.insert(token);
            }
        }
    }
    allowed
}

fn step_node(node: &Node, state: &mut RuntimeState, token: u32) {
    match (node, state) {
        (
            Node::Choices { trie },
            RuntimeState::Choices {
                active,
                started,
                complete,
            },
        ) => {
            if *complete {
                return;
            }
            *started = true;
            let mut next: Vec<usize> = Vec::new();
            for &index in active.iter() {
                if let Some(child) = trie.child(index, token) {
                    if !next.contains(&child) {
                        next.push(child);
                    }
                }
            }
            // Greedy-shortest: once every surviving branch sits on a
            // terminal node the choice is decided.
            if !next.is_empty() && next.iter().all(|&n| trie.is_terminal(n)) {
                *complete = true;
                next.clear();
            }
            *active = next;
        }
        (Node::Until { stop_ids, .. }, RuntimeState::Until { complete }) => {
            if stop_ids.contains(&token) {
                *complete = true;
            }
        }
        (
            Node::Chars {
                allowed,
                lengths,
                min,
                max,
            },
            RuntimeState::Chars {
                chars_emitted,
                complete,
            },
        ) => {
            if *complete {
                return;
            }
            *chars_emitted += lengths.get(&token).copied().unwrap_or(1);
            if let Some(max) = *max {
                if *chars_emitted >= max && *chars_emitted >= *min {
                    *complete = true;
                    return;
                }
                // No token fits the remaining window: the run is over.
                let remaining = max.saturating_sub(*chars_emitted);
                let any_fits = allowed
                    .iter()
                    .any(|id| lengths.get(id).is_some_and(|&len| len <= remaining));
                if !any_fits {
                    *complete = true;
                }
            }
        }
        (Node::Tokens { ids }, RuntimeState::Tokens { complete }) => {
            if ids.contains(&token) {
                *complete = true;
            }
        }
        (Node::List(list), RuntimeState::List(state)) => step_list(list, state, token),
        _ => debug_assert!(false, "runtime state does not match automaton shape"),
    }
}

fn step_list(list: &ListNode, state: &mut ListState, token: u32) {
    if state.complete {
        return;
    }
    match state.phase {
        ListPhase::InOpen => {
            if list.open.get(state.open_pos) == Some(&token) {
                state.open_pos += 1;
                if state.open_pos >= list.open.len() {
                    state.phase = ListPhase::AwaitElement;
                    state.element = None;
                }
            }
        }
        ListPhase::AwaitElement => {
            if !list.wrap.is_empty() && list.wrap.first() == Some(&token) {
                state.wrap_pos = 1;
                if state.wrap_pos >= list.wrap.len() {
                    state.element = Some(Box::new(start_node(&list.element)));
                    state.wrap_pos = 0;
                    state.phase = ListPhase::InElement;
                } else {
                    state.phase = ListPhase::InWrapOpen;
                }
            } else if list.close.first() == Some(&token) && state.elements_completed >= list.min {
                enter_close(list, state);
            } else if list.wrap.is_empty() {
                let mut element_state = start_node(&list.element);
                step_node(&list.element, &mut element_state, token);
                if complete_node(&list.element, &element_state) {
                    finish_element(list, state);
                } else {
                    state.element = Some(Box::new(element_state));
                    state.phase = ListPhase::InElement;
                }
            }
        }
        ListPhase::InWrapOpen => {
            if list.wrap.get(state.wrap_pos) == Some(&token) {
                state.wrap_pos += 1;
                if state.wrap_pos >= list.wrap.len() {
                    state.element = Some(Box::new(start_node(&list.element)));
                    state.wrap_pos = 0;
                    state.phase = ListPhase::InElement;
                }
            }
        }
        ListPhase::InElement => {
            let Some(element_state) = state.element.as_deref_mut() else {
                return;
            };
            let element_done = complete_node(&list.element, element_state);
            if !list.wrap.is_empty() {
                let may_close = element_done || can_end_node(&list.element, element_state);
                if may_close && list.wrap.first() == Some(&token) {
                    state.wrap_pos = 1;
                    if state.wrap_pos >= list.wrap.len() {
                        finish_element(list, state);
                    } else {
                        state.phase = ListPhase::InWrapClose;
                    }
                    return;
                }
                if element_done {
                    return;
                }
            }
            step_node(&list.element, element_state, token);
            if list.wrap.is_empty() && complete_node(&list.element, element_state) {
                finish_element(list, state);
            }
        }
        ListPhase::InWrapClose => {
            if list.wrap.get(state.wrap_pos) == Some(&token) {
                state.wrap_pos += 1;
                if state.wrap_pos >= list.wrap.len() {
                    finish_element(list, state);
                }
            }
        }
        ListPhase::AwaitSep => {
            if list.under_max(state.elements_completed) && list.sep.first() == Some(&token) {
                state.sep_pos = 1;
                if state.sep_pos >= list.sep.len() {
                    state.sep_pos = 0;
                    state.element = None;
                    state.phase = ListPhase::AwaitElement;
                } else {
                    state.phase = ListPhase::InSeparator;
                }
            } else if state.elements_completed >= list.min && list.close.first() == Some(&token) {
                enter_close(list, state);
            }
        }
        ListPhase::InSeparator => {
            if list.sep.get(state.sep_pos) == Some(&token) {
                state.sep_pos += 1;
                if state.sep_pos >= list.sep.len() {
                    state.sep_pos = 0;
                    state.element = None;
                    state.phase = ListPhase::AwaitElement;
                }
            }
        }
        ListPhase::InClose => {
            if list.close.get(state.close_pos) == Some(&token) {
                state.close_pos += 1;
                if state.close_pos >= list.close.len() {
                    finish_close(list, state);
                }
            }
        }
        ListPhase::InEndWith => {
            if list.end_with.get(state.end_with_pos) == Some(&token) {
                state.end_with_pos += 1;
                if state.end_with_pos >= list.end_with.len() {
                    state.complete = true;
                }
            }
        }
    }
}

/// Consume the first close token and settle the follow-up phase.
fn enter_close(list: &ListNode, state: &mut ListState) {
    state.close_pos = 1;
    state.phase = ListPhase::InClose;
    if state.close_pos >= list.close.len() {
        finish_close(list, state);
    }
}

fn finish_close(list: &ListNode, state: &mut ListState) {
    if list.end_with.is_empty() {
        state.complete = true;
    } else {
        state.end_with_pos = 0;
        state.phase = ListPhase::InEndWith;
    }
}

/// One element fully emitted: count it and decide what can follow.
fn finish_element(list: &ListNode, state: &mut ListState) {
    state.elements_completed += 1;
    state.element = None;
    state.wrap_pos = 0;
    state.phase = ListPhase::AwaitSep;

    let can_separate = !list.sep.is_empty() && list.under_max(state.elements_completed);
    let can_close = !list.close.is_empty();
    if !can_separate && !can_close {
        // Nothing left to consume; an end_with suffix still applies.
        if list.end_with.is_empty() {
            state.complete = true;
        } else {
            state.end_with_pos = 0;
            state.phase = ListPhase::InEndWith;
        }
    }
}

/// Whether the element may end here even though it could also continue.
/// An unbounded char run never completes on its own; once its minimum is
/// met, the enclosing wrapper is what ends it.
fn can_end_node(node: &Node, state: &RuntimeState) -> bool {
    match (node, state) {
        (Node::Chars { min, max: None, .. }, RuntimeState::Chars { chars_emitted, .. }) => {
            chars_emitted >= min
        }
        _ => complete_node(node, state),
    }
}

fn complete_node(node: &Node, state: &RuntimeState) -> bool {
    match (node, state) {
        (Node::Choices { .. }, RuntimeState::Choices { complete, .. }) => *complete,
        (Node::Until { .. }, RuntimeState::Until { complete }) => *complete,
        (
            Node::Chars { min, .. },
            RuntimeState::Chars {
                chars_emitted,
                complete,
            },
        ) => *complete && chars_emitted >= min,
        (Node::Tokens { .. }, RuntimeState::Tokens { complete }) => *complete,
        (Node::List(_), RuntimeState::List(state)) => state.complete,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiller_protocol::CharTokenizer;

    fn tok() -> CharTokenizer {
        CharTokenizer::default()
    }

    fn id(c: char) -> u32 {
        c as u32
    }

    /// Drive the automaton through `text`, asserting each token is
    /// allowed before stepping.
    fn drive(automaton: &StrategyAutomaton, state: &mut RuntimeState, text: &str) {
        for c in text.chars() {
            let allowed = automaton.allowed_tokens(state);
            assert!(allowed.contains(&id(c)), "token '{c}' not allowed");
            automaton.step(state, id(c));
        }
    }

    #[test]
    fn choices_allow_only_viable_prefixes() {
        let spec = StrategySpec::Choices {
            options: vec!["yes".into(), "yak".into(), "no".into()],
        };
        let automaton = spec.compile(&tok()).unwrap();
        let mut state = automaton.start();

        let first = automaton.allowed_tokens(&state);
        assert_eq!(first, [id('y'), id('n')].into_iter().collect());

        automaton.step(&mut state, id('y'));
        let second = automaton.allowed_tokens(&state);
        assert_eq!(second, [id('e'), id('a')].into_iter().collect());

        drive(&automaton, &mut state, "es");
        assert!(automaton.is_complete(&state));
        assert!(automaton.allowed_tokens(&state).is_empty());
    }

    #[test]
    fn choices_pick_shortest_when_one_option_prefixes_another() {
        let spec = StrategySpec::Choices {
            options: vec!["a".into(), "ab".into()],
        };
        let automaton = spec.compile(&tok()).unwrap();
        let mut state = automaton.start();
        automaton.step(&mut state, id('a'));
        assert!(automaton.is_complete(&state));
    }

    #[test]
    fn until_completes_on_stop_char() {
        let spec = StrategySpec::Until { stop: '.' };
        let automaton = spec.compile(&tok()).unwrap();
        let mut state = automaton.start();

        // EOS is never allowed mid-run.
        assert!(!automaton.allowed_tokens(&state).contains(&0));
        drive(&automaton, &mut state, "done.");
        assert!(automaton.is_complete(&state));
    }

    #[test]
    fn chars_window_gates_on_remaining_budget() {
        let spec = StrategySpec::Chars {
            kind: crate::CharKind::Numeric,
            min: 2,
            max: Some(3),
        };
        let automaton = spec.compile(&tok()).unwrap();
        let mut state = automaton.start();

        drive(&automaton, &mut state, "12");
        assert!(!automaton.is_complete(&state));
        drive(&automaton, &mut state, "3");
        assert!(automaton.is_complete(&state));
        assert!(automaton.allowed_tokens(&state).is_empty());
    }

    #[test]
    fn tokens_complete_after_one_pick() {
        let spec = StrategySpec::Tokens {
            options: vec!["a".into(), "b".into()],
        };
        let automaton = spec.compile(&tok()).unwrap();
        let mut state = automaton.start();
        assert_eq!(
            automaton.allowed_tokens(&state),
            [id('a'), id('b')].into_iter().collect()
        );
        automaton.step(&mut state, id('b'));
        assert!(automaton.is_complete(&state));
    }

    #[test]
    fn tokens_reject_multi_token_options() {
        let spec = StrategySpec::Tokens {
            options: vec!["ab".into()],
        };
        assert_eq!(
            spec.compile(&tok()).unwrap_err(),
            StrategyCompileError::NotSingleToken {
                text: "ab".into(),
                count: 2
            }
        );
    }

    fn digit_list(min: usize, max: Option<usize>) -> StrategySpec {
        StrategySpec::List(ListSpec {
            open: Some("[".into()),
            close: Some("]".into()),
            wrap: None,
            separator: Some(",".into()),
            end_with: None,
            min,
            max,
            element: Box::new(StrategySpec::Chars {
                kind: crate::CharKind::Numeric,
                min: 1,
                max: Some(1),
            }),
        })
    }

    #[test]
    fn digit_list_completes_exactly_at_close() {
        let automaton = digit_list(1, None).compile(&tok()).unwrap();
        let mut state = automaton.start();

        drive(&automaton, &mut state, "[1,2");
        assert!(!automaton.is_complete(&state));
        assert_eq!(automaton.elements_completed(&state), Some(2));

        drive(&automaton, &mut state, "]");
        assert!(automaton.is_complete(&state));
        assert!(automaton.allowed_tokens(&state).is_empty());
    }

    #[test]
    fn min_gates_close_and_max_gates_another_element() {
        let automaton = digit_list(2, Some(2)).compile(&tok()).unwrap();
        let mut state = automaton.start();

        drive(&automaton, &mut state, "[1");
        // One element done: close is not yet reachable, separator is.
        let allowed = automaton.allowed_tokens(&state);
        assert!(!allowed.contains(&id(']')));
        assert!(allowed.contains(&id(',')));

        drive(&automaton, &mut state, ",2");
        // Max reached: only the close remains.
        assert_eq!(
            automaton.allowed_tokens(&state),
            [id(']')].into_iter().collect()
        );
        drive(&automaton, &mut state, "]");
        assert!(automaton.is_complete(&state));
    }

    #[test]
    fn wrapped_choice_elements_follow_the_wrap_sequence() {
        let spec = StrategySpec::List(ListSpec {
            open: Some("[".into()),
            close: Some("]".into()),
            wrap: Some("\"".into()),
            separator: Some(",".into()),
            end_with: None,
            min: 1,
            max: None,
            element: Box::new(StrategySpec::Choices {
                options: vec!["on".into(), "off".into()],
            }),
        });
        let automaton = spec.compile(&tok()).unwrap();
        let mut state = automaton.start();

        drive(&automaton, &mut state, "[\"on");
        // The element is done; only the closing wrap may follow.
        assert_eq!(
            automaton.allowed_tokens(&state),
            [id('"')].into_iter().collect()
        );
        drive(&automaton, &mut state, "\",\"off\"]");
        assert!(automaton.is_complete(&state));
        assert_eq!(automaton.elements_completed(&state), Some(2));
    }

    #[test]
    fn unbounded_chars_element_is_closed_by_its_wrapper() {
        let spec = StrategySpec::List(ListSpec {
            open: Some("[".into()),
            close: Some("]".into()),
            wrap: Some("\"".into()),
            separator: Some(",".into()),
            end_with: None,
            min: 1,
            max: Some(2),
            element: Box::new(StrategySpec::Chars {
                kind: crate::CharKind::Alpha,
                min: 2,
                max: None,
            }),
        });
        let automaton = spec.compile(&tok()).unwrap();
        let mut state = automaton.start();

        drive(&automaton, &mut state, "[\"a");
        // Below the minimum the wrapper cannot end the run yet.
        assert!(!automaton.allowed_tokens(&state).contains(&id('"')));
        drive(&automaton, &mut state, "b");
        let allowed = automaton.allowed_tokens(&state);
        assert!(allowed.contains(&id('"')));
        assert!(allowed.contains(&id('c')));

        drive(&automaton, &mut state, "\",\"xy\"]");
        assert!(automaton.is_complete(&state));
        assert_eq!(automaton.elements_completed(&state), Some(2));
    }

    #[test]
    fn end_with_suffix_is_required_before_completion() {
        let spec = StrategySpec::List(ListSpec {
            open: Some("[".into()),
            close: Some("]".into()),
            wrap: None,
            separator: Some(",".into()),
            end_with: Some(";\n".into()),
            min: 1,
            max: Some(1),
            element: Box::new(StrategySpec::Tokens {
                options: vec!["x".into()],
            }),
        });
        let automaton = spec.compile(&tok()).unwrap();
        let mut state = automaton.start();

        drive(&automaton, &mut state, "[x]");
        assert!(!automaton.is_complete(&state));
        drive(&automaton, &mut state, ";\n");
        assert!(automaton.is_complete(&state));
    }

    #[test]
    fn nested_lists_compile_and_run() {
        let inner = ListSpec {
            open: Some("(".into()),
            close: Some(")".into()),
            wrap: None,
            separator: Some(",".into()),
            end_with: None,
            min: 1,
            max: None,
            element: Box::new(StrategySpec::Chars {
                kind: crate::CharKind::Numeric,
                min: 1,
                max: Some(1),
            }),
        };
        let spec = StrategySpec::List(ListSpec {
            open: Some("[".into()),
            close: Some("]".into()),
            wrap: None,
            separator: Some(",".into()),
            end_with: None,
            min: 1,
            max: None,
            element: Box::new(StrategySpec::List(inner)),
        });
        let automaton = spec.compile(&tok()).unwrap();
        let mut state = automaton.start();

        drive(&automaton, &mut state, "[(1,2),(3)]");
        assert!(automaton.is_complete(&state));
        assert_eq!(automaton.elements_completed(&state), Some(2));
    }

    #[test]
    fn min_above_max_is_a_compile_error() {
        let spec = StrategySpec::Chars {
            kind: crate::CharKind::Numeric,
            min: 5,
            max: Some(2),
        };
        assert_eq!(
            spec.compile(&tok()).unwrap_err(),
            StrategyCompileError::MinExceedsMax { min: 5, max: 2 }
        );
    }
}
