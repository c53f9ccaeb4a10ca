//! Error types for the control runtime.

use thiserror::Error;
use tiller_protocol::InvalidActionError;

/// Errors raised by [`crate::buffer::TokenBuffer`] mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// `adjust_prefill` was called after the first forward pass.
    #[error("prefill can no longer be adjusted: generation has started")]
    PrefillLocked,
}

/// Errors raised when applying a backtrack.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BacktrackError {
    /// The requested backtrack exceeds the live history available since
    /// the prompt. Fatal to the request.
    #[error("backtrack of {requested} steps exceeds available live history of {available}")]
    InsufficientHistory { requested: usize, available: usize },
}

/// A mod failed while handling an event.
#[derive(Debug, Clone, Error)]
pub enum ModError {
    /// The mod returned an error of its own.
    #[error("mod failed: {0}")]
    Failed(String),
    /// The mod panicked; the payload is captured as text.
    #[error("mod panicked: {0}")]
    Panicked(String),
}

/// Errors that can occur in the control runtime.
#[derive(Debug, Error)]
pub enum ControlError {
    /// A mod returned an action illegal for the event.
    #[error(transparent)]
    InvalidAction(#[from] InvalidActionError),

    /// Buffer mutation error.
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// Backtrack exceeded available history.
    #[error(transparent)]
    Backtrack(#[from] BacktrackError),

    /// A mod exceeded its wall-clock budget. Fatal to the request: a
    /// synchronous mod call cannot be preempted, so the overrun is only
    /// observable after the fact and the request cannot be trusted.
    #[error("mod '{mod_name}' exceeded its {budget_ms}ms budget ({elapsed_ms}ms)")]
    ModBudgetExceeded {
        mod_name: String,
        budget_ms: u64,
        elapsed_ms: u64,
    },

    /// The request was aborted and no longer accepts events.
    #[error("request '{0}' was aborted")]
    Aborted(String),

    /// No mod with this name is registered.
    #[error("unknown mod '{0}'")]
    UnknownMod(String),
}

/// Result type for control runtime operations.
pub type ControlResult<T> = Result<T, ControlError>;
