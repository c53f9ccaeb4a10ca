//! Backtrack coordination.
//!
//! Translates a Backtrack action into token-buffer mutations and the
//! cache-invalidation instruction the external model engine must consume
//! before its next forward pass. The coordinator never touches cache
//! memory itself; the instruction is the contract.

use serde::{Deserialize, Serialize};

use crate::buffer::TokenBuffer;
use crate::error::BacktrackError;

/// Instruction to the model engine: any cached state at or after
/// `from_step` is stale and must be dropped before the next forward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInvalidation {
    pub from_step: u32,
}

/// Result of applying one backtrack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacktrackOutcome {
    /// Tokens tombstoned, oldest first.
    pub erased_tokens: Vec<u32>,
    /// Replacement tokens appended as forced, if any.
    pub replacement_tokens: Vec<u32>,
    /// Instruction the engine must honor before continuing.
    pub cache_invalidation: CacheInvalidation,
}

/// Applies Backtrack actions to a [`TokenBuffer`].
#[derive(Debug, Default, Clone, Copy)]
pub struct BacktrackCoordinator;

impl BacktrackCoordinator {
    /// Tombstone the last `steps` live tokens and, if given, append
    /// `replacement` as forced tokens at the rewound cursor.
    pub fn apply(
        &self,
        buffer: &mut TokenBuffer,
        steps: usize,
        replacement: Option<&[u32]>,
        step: u32,
    ) -> Result<BacktrackOutcome, BacktrackError> {
        let span = buffer.backtrack(steps)?;
        let replacement_tokens = replacement.unwrap_or_default().to_vec();
        if !replacement_tokens.is_empty() {
            buffer.append(&replacement_tokens, true, step);
        }
        Ok(BacktrackOutcome {
            erased_tokens: span.tokens,
            replacement_tokens,
            cache_invalidation: CacheInvalidation {
                from_step: span.from_step,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backtrack_with_replacement_reappends_forced() {
        let mut buffer = TokenBuffer::new(&[1]);
        buffer.append(&[2], false, 1);
        buffer.append(&[3], false, 2);

        let outcome = BacktrackCoordinator
            .apply(&mut buffer, 1, Some(&[9, 10]), 3)
            .unwrap();
        assert_eq!(outcome.erased_tokens, vec![3]);
        assert_eq!(outcome.replacement_tokens, vec![9, 10]);
        assert_eq!(outcome.cache_invalidation, CacheInvalidation { from_step: 2 });
        assert_eq!(buffer.live_tokens(), vec![1, 2, 9, 10]);
        assert!(buffer.audit_entries().iter().any(|e| e.token == 9 && e.forced));
    }

    #[test]
    fn insufficient_history_is_surfaced() {
        let mut buffer = TokenBuffer::new(&[1]);
        let err = BacktrackCoordinator.apply(&mut buffer, 1, None, 1);
        assert!(matches!(
            err,
            Err(BacktrackError::InsufficientHistory { requested: 1, available: 0 })
        ));
    }
}
