//! Mod dispatch runtime and per-request generation control.
//!
//! This crate owns everything between one forward pass and the next: the
//! token buffer (with its tombstone backtracking model), the mod registry
//! and dispatcher, the trace sink boundary, and the request controller
//! that the serving loop drives step by step.

pub mod backtrack;
pub mod buffer;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod mods;
pub mod trace;

pub use backtrack::{BacktrackCoordinator, BacktrackOutcome, CacheInvalidation};
pub use buffer::{TokenBuffer, TokenEntry};
pub use config::ControlConfig;
pub use controller::{Directive, RequestController};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use error::{BacktrackError, BufferError, ControlError, ControlResult, ModError};
pub use mods::{Mod, ModFactory, ModRegistry, RegisteredMod};
pub use trace::{ChannelTraceSink, NullTraceSink, TraceRecord, TraceSink};
