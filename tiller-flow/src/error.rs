//! Flow-level errors.

use thiserror::Error;

/// A completed answer matched no route and the question has no default.
///
/// Degrades to an `EmitError` action for the caller; never a panic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("answer '{answer}' from question '{question}' has no matching route")]
pub struct FlowRouteError {
    pub question: String,
    pub answer: String,
}

pub type FlowResult<T> = Result<T, FlowRouteError>;
