//! Strategy compilation errors.

use thiserror::Error;

/// A spec could not be compiled into an automaton.
///
/// Compile errors are fatal before generation starts; a malformed spec is
/// never silently degraded into a weaker constraint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrategyCompileError {
    /// A choices or tokens spec with nothing to choose from.
    #[error("strategy has no options to choose from")]
    EmptyOptions,

    /// A tokens spec item that does not encode to exactly one token id.
    #[error("'{text}' encodes to {count} tokens, expected exactly one")]
    NotSingleToken { text: String, count: usize },

    /// An element-count or character-count window with min above max.
    #[error("minimum {min} exceeds maximum {max}")]
    MinExceedsMax { min: usize, max: usize },

    /// A choice or delimiter string that encodes to no tokens at all.
    #[error("'{0}' encodes to no tokens")]
    Unencodable(String),

    /// A character class no token in the vocabulary satisfies.
    #[error("no token in the vocabulary matches the character class")]
    UnsatisfiableCharClass,
}

pub type StrategyResult<T> = Result<T, StrategyCompileError>;
