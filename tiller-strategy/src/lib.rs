//! Declarative token-shape strategies.
//!
//! A [`StrategySpec`] describes the shape an answer must take (one of a
//! fixed set of choices, a character class, a delimited list, ...). It is
//! compiled once against a tokenizer into an immutable
//! [`StrategyAutomaton`], which then gates token emission step by step:
//! `allowed_tokens` for the logit mask, `step` to advance on each
//! committed token, `is_complete` to release the constraint.

pub mod automaton;
pub mod error;
pub mod spec;
pub mod trie;

pub use automaton::{ListPhase, ListState, RuntimeState, StrategyAutomaton};
pub use error::{StrategyCompileError, StrategyResult};
pub use spec::{CharKind, ListSpec, StrategySpec};
pub use trie::TokenTrie;
