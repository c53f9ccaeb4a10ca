//! Declarative strategy specifications.

use serde::{Deserialize, Serialize};

/// Character class for [`StrategySpec::Chars`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharKind {
    Alpha,
    Alphanumeric,
    Numeric,
}

impl CharKind {
    /// Whether every character of `text` belongs to the class.
    #[must_use]
    pub fn matches(self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        match self {
            CharKind::Alpha => text.chars().all(|c| c.is_alphabetic()),
            CharKind::Alphanumeric => text.chars().all(|c| c.is_alphanumeric()),
            CharKind::Numeric => text.chars().all(|c| c.is_ascii_digit()),
        }
    }
}

/// Delimited-list shape: `open e [sep e]* close [end_with]`, each element
/// optionally wrapped on both sides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListSpec {
    /// Opening delimiter, e.g. `[`.
    #[serde(default)]
    pub open: Option<String>,
    /// Closing delimiter, e.g. `]`.
    #[serde(default)]
    pub close: Option<String>,
    /// Per-element wrapper emitted before and after each element, e.g. `"`.
    #[serde(default)]
    pub wrap: Option<String>,
    /// Separator between elements, e.g. `,`.
    #[serde(default)]
    pub separator: Option<String>,
    /// Fixed suffix after the close, e.g. a newline.
    #[serde(default)]
    pub end_with: Option<String>,
    /// Minimum element count before the close becomes reachable.
    #[serde(default)]
    pub min: usize,
    /// Maximum element count; opening another element is gated on it.
    #[serde(default)]
    pub max: Option<usize>,
    /// Shape of each element. Boxed: specs are trees, never graphs.
    pub element: Box<StrategySpec>,
}

/// The shape an answer must take, compiled by
/// [`StrategySpec::compile`](crate::StrategyAutomaton) into a token-gating
/// automaton.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategySpec {
    /// Exactly one of a fixed set of strings.
    Choices { options: Vec<String> },
    /// Free text until a stop character appears; the stop is part of the
    /// consumed answer.
    Until { stop: char },
    /// A run of characters from a class, bounded by `min..=max` counted
    /// characters. Without `max` the run only ends under an enclosing
    /// wrapper.
    Chars {
        kind: CharKind,
        #[serde(default)]
        min: usize,
        #[serde(default)]
        max: Option<usize>,
    },
    /// Exactly one token drawn from a fixed set, each option a single
    /// token in the vocabulary.
    Tokens { options: Vec<String> },
    /// A delimited list of elements.
    List(ListSpec),
}
