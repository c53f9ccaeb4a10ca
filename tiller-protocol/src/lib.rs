//! Event/Action protocol for the tiller generation control layer.
//!
//! This crate defines the closed set of generation-loop events and the
//! actions a mod may return from each of them, together with the legality
//! table that binds the two. Everything above it (dispatch, buffering,
//! strategies, flows) depends on these definitions.

pub mod actions;
pub mod error;
pub mod events;
pub mod legality;
pub mod logits;
pub mod tokenizer;

pub use actions::{Action, ActionBuilder, ActionKind};
pub use error::{InvalidActionError, ProtocolResult};
pub use events::{Event, EventKind, RequestId};
pub use legality::validate;
pub use logits::Logits;
pub use tokenizer::{CharTokenizer, HfTokenizer, Tokenizer};
