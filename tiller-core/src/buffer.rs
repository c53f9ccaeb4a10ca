//! Per-request token buffer with tombstoned history.
//!
//! Backtracked tokens are marked erased, never removed, so audit and
//! replay see the full history while the model only ever consumes the
//! live view. The live view is always the prompt prefix plus the
//! non-erased completion suffix, with no gaps.

use crate::error::{BacktrackError, BufferError};

/// One committed token and its metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenEntry {
    /// The token id.
    pub token: u32,
    /// True when the token was forced rather than sampled.
    pub forced: bool,
    /// True when the token was tombstoned by a backtrack.
    pub erased: bool,
    /// The generation step that committed this token.
    pub step: u32,
}

/// The span removed by a backtrack, reported for cache accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErasedSpan {
    /// Step of the earliest erased token.
    pub from_step: u32,
    /// Token ids erased, oldest first.
    pub tokens: Vec<u32>,
}

/// Append-only, backtrackable token sequence for one request.
///
/// Created at Prefilled, mutated by Added/Backtrack, dropped when the
/// request completes or errors.
#[derive(Debug, Clone)]
pub struct TokenBuffer {
    entries: Vec<TokenEntry>,
    prompt_len: usize,
    /// Number of live (non-erased) tokens, prompt included.
    cursor: usize,
    prefill_locked: bool,
}

impl TokenBuffer {
    /// Create a buffer seeded with the prompt tokens.
    #[must_use]
    pub fn new(prompt_tokens: &[u32]) -> Self {
        let entries: Vec<TokenEntry> = prompt_tokens
            .iter()
            .map(|&token| TokenEntry {
                token,
                forced: false,
                erased: false,
                step: 0,
            })
            .collect();
        let prompt_len = entries.len();
        Self {
            entries,
            prompt_len,
            cursor: prompt_len,
            prefill_locked: false,
        }
    }

    /// Length of the prompt prefix.
    #[must_use]
    pub fn prompt_len(&self) -> usize {
        self.prompt_len
    }

    /// Current generation position: number of live tokens, prompt included.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// The current prompt prefix.
    #[must_use]
    pub fn prompt_tokens(&self) -> Vec<u32> {
        self.entries[..self.prompt_len]
            .iter()
            .map(|e| e.token)
            .collect()
    }

    /// Number of live completion tokens (past the prompt).
    #[must_use]
    pub fn completion_len(&self) -> usize {
        self.cursor - self.prompt_len
    }

    /// The live token sequence the model consumes: prompt plus non-erased
    /// completion suffix.
    #[must_use]
    pub fn live_tokens(&self) -> Vec<u32> {
        self.entries
            .iter()
            .filter(|e| !e.erased)
            .map(|e| e.token)
            .collect()
    }

    /// Live completion tokens only.
    #[must_use]
    pub fn live_completion(&self) -> Vec<u32> {
        self.entries[self.prompt_len..]
            .iter()
            .filter(|e| !e.erased)
            .map(|e| e.token)
            .collect()
    }

    /// Every entry ever committed, tombstones included, for audit.
    #[must_use]
    pub fn audit_entries(&self) -> &[TokenEntry] {
        &self.entries
    }

    /// Append completion tokens at the cursor.
    pub fn append(&mut self, tokens: &[u32], forced: bool, step: u32) {
        self.prefill_locked = true;
        for &token in tokens {
            self.entries.push(TokenEntry {
                token,
                forced,
                erased: false,
                step,
            });
        }
        self.cursor += tokens.len();
    }

    /// Tombstone the last `steps` live completion tokens.
    ///
    /// Entries are retained with `erased` set; the cursor rewinds past
    /// them. Returns the erased span, oldest token first.
    pub fn backtrack(&mut self, steps: usize) -> Result<ErasedSpan, BacktrackError> {
        let available = self.completion_len();
        if steps > available {
            return Err(BacktrackError::InsufficientHistory {
                requested: steps,
                available,
            });
        }
        let mut erased: Vec<(u32, u32)> = Vec::with_capacity(steps);
        let mut remaining = steps;
        for entry in self.entries[self.prompt_len..].iter_mut().rev() {
            if remaining == 0 {
                break;
            }
            if entry.erased {
                continue;
            }
            entry.erased = true;
            erased.push((entry.token, entry.step));
            remaining -= 1;
        }
        erased.reverse();
        self.cursor -= steps;
        Ok(ErasedSpan {
            from_step: erased.first().map_or(0, |&(_, step)| step),
            tokens: erased.into_iter().map(|(token, _)| token).collect(),
        })
    }

    /// Replace the prompt prefix and reset the cursor to the new prompt
    /// length. Only legal before the first completion token is appended;
    /// mods must guard re-application themselves since Prefilled recurs.
    pub fn adjust_prefill(&mut self, tokens: &[u32]) -> Result<(), BufferError> {
        if self.prefill_locked {
            return Err(BufferError::PrefillLocked);
        }
        self.entries = tokens
            .iter()
            .map(|&token| TokenEntry {
                token,
                forced: false,
                erased: false,
                step: 0,
            })
            .collect();
        self.prompt_len = self.entries.len();
        self.cursor = self.prompt_len;
        Ok(())
    }

    /// Forbid further prefill adjustment. Called when the first forward
    /// pass begins even if nothing was appended yet.
    pub fn lock_prefill(&mut self) {
        self.prefill_locked = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_with_completion(prompt: &[u32], completion: &[u32]) -> TokenBuffer {
        let mut buffer = TokenBuffer::new(prompt);
        for (i, &token) in completion.iter().enumerate() {
            buffer.append(&[token], false, i as u32 + 1);
        }
        buffer
    }

    #[test]
    fn backtrack_then_reappend_restores_live_view() {
        let mut buffer = buffer_with_completion(&[10, 11], &[20, 21, 22]);
        let before = buffer.live_tokens();

        let span = buffer.backtrack(2).unwrap();
        assert_eq!(span.tokens, vec![21, 22]);
        assert_eq!(span.from_step, 2);
        assert_eq!(buffer.live_tokens(), vec![10, 11, 20]);

        buffer.append(&[21], false, 4);
        buffer.append(&[22], false, 5);
        assert_eq!(buffer.live_tokens(), before);

        // Tombstones stay in the audit trail.
        let erased: Vec<u32> = buffer
            .audit_entries()
            .iter()
            .filter(|e| e.erased)
            .map(|e| e.token)
            .collect();
        assert_eq!(erased, vec![21, 22]);
    }

    #[test]
    fn backtrack_never_reaches_into_prompt() {
        let mut buffer = buffer_with_completion(&[1, 2, 3], &[4]);
        let err = buffer.backtrack(2).unwrap_err();
        assert_eq!(
            err,
            BacktrackError::InsufficientHistory {
                requested: 2,
                available: 1
            }
        );
    }

    #[test]
    fn backtrack_skips_existing_tombstones() {
        let mut buffer = buffer_with_completion(&[1], &[2, 3, 4]);
        buffer.backtrack(1).unwrap();
        buffer.append(&[5], true, 4);
        let span = buffer.backtrack(2).unwrap();
        assert_eq!(span.tokens, vec![3, 5]);
        assert_eq!(buffer.live_tokens(), vec![1, 2]);
    }

    #[test]
    fn adjust_prefill_locks_after_first_append() {
        let mut buffer = TokenBuffer::new(&[1, 2]);
        buffer.adjust_prefill(&[7, 8, 9]).unwrap();
        assert_eq!(buffer.prompt_len(), 3);
        assert_eq!(buffer.cursor(), 3);

        buffer.append(&[10], false, 1);
        assert_eq!(buffer.adjust_prefill(&[1]), Err(BufferError::PrefillLocked));
    }

    #[test]
    fn lock_prefill_blocks_adjustment_without_appends() {
        let mut buffer = TokenBuffer::new(&[1]);
        buffer.lock_prefill();
        assert_eq!(buffer.adjust_prefill(&[2]), Err(BufferError::PrefillLocked));
    }
}
