//! Tokenizer boundary.
//!
//! The control layer never owns a tokenizer; it talks to one through this
//! trait. Strategy compilation and self-prompt setup are the heavy users
//! and do their encoding up front, so per-step work stays off this surface
//! where possible.

use tokenizers::Tokenizer as InnerTokenizer;

/// Encode/decode boundary supplied by the serving layer.
pub trait Tokenizer: Send + Sync {
    /// Encode text into token ids, without special tokens.
    fn encode(&self, text: &str) -> Vec<u32>;

    /// Decode token ids into text, skipping special tokens.
    fn decode(&self, tokens: &[u32]) -> String;

    /// Decode a single token id.
    fn decode_token(&self, token: u32) -> String {
        self.decode(&[token])
    }

    /// Number of ids in the vocabulary.
    fn vocab_size(&self) -> usize;

    /// End-of-sequence token id, if the model defines one.
    fn eos_token_id(&self) -> Option<u32> {
        None
    }
}

/// Adapter over a Hugging Face `tokenizers` tokenizer.
pub struct HfTokenizer {
    inner: InnerTokenizer,
    eos_token_id: Option<u32>,
}

impl HfTokenizer {
    /// Wrap a loaded tokenizer. `eos_token_id` comes from the model config;
    /// the tokenizer file does not carry it.
    #[must_use]
    pub fn new(inner: InnerTokenizer, eos_token_id: Option<u32>) -> Self {
        Self {
            inner,
            eos_token_id,
        }
    }
}

/// Character-level tokenizer: each Unicode scalar maps to its code point.
///
/// Deterministic and self-describing, which makes strategy and flow
/// behavior easy to assert against; unit tests throughout the workspace
/// use it in place of a real vocabulary.
#[derive(Debug, Clone)]
pub struct CharTokenizer {
    vocab_size: usize,
    eos_token_id: Option<u32>,
}

impl Default for CharTokenizer {
    fn default() -> Self {
        Self {
            vocab_size: 256,
            eos_token_id: Some(0),
        }
    }
}

impl CharTokenizer {
    /// A tokenizer over the first `vocab_size` code points.
    #[must_use]
    pub fn new(vocab_size: usize, eos_token_id: Option<u32>) -> Self {
        Self {
            vocab_size,
            eos_token_id,
        }
    }
}

impl Tokenizer for CharTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        text.chars().map(|c| c as u32).collect()
    }

    fn decode(&self, tokens: &[u32]) -> String {
        tokens
            .iter()
            .filter(|&&t| Some(t) != self.eos_token_id)
            .filter_map(|&t| char::from_u32(t))
            .collect()
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn eos_token_id(&self) -> Option<u32> {
        self.eos_token_id
    }
}

impl Tokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        self.inner
            .encode(text, false)
            .map(|encoding| encoding.get_ids().to_vec())
            .unwrap_or_default()
    }

    fn decode(&self, tokens: &[u32]) -> String {
        self.inner.decode(tokens, true).unwrap_or_default()
    }

    fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    fn eos_token_id(&self) -> Option<u32> {
        self.eos_token_id
    }
}
