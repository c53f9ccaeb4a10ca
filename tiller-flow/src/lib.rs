//! Self-prompting and multi-step flows.
//!
//! [`SelfPrompt`] injects a fixed prompt into a running generation, holds
//! the model to a compiled strategy shape while it answers, and optionally
//! erases its own traces afterwards. [`FlowEngine`] chains self-prompts
//! into a question graph, branching on each decoded answer.

pub mod error;
pub mod flow;
pub mod repair;
pub mod self_prompt;

pub use error::{FlowResult, FlowRouteError};
pub use flow::{FlowEngine, FlowQuestion, Route};
pub use repair::{ElementValidation, Fallback, RepairPolicy, ValueCheck};
pub use self_prompt::{ErasePolicy, SelfPrompt};
