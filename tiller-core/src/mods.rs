//! Mod trait and shared registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tiller_protocol::{Action, ActionBuilder, Event, Tokenizer};

use crate::error::{ControlError, ControlResult, ModError};

/// A user-supplied handler invoked at generation events.
///
/// Mods are stateful per request: each request gets its own instance from
/// the registry's factory, so `on_event` takes `&mut self` and no state is
/// shared across requests. An `Err` is captured by the dispatcher and
/// treated as Noop for that invocation.
pub trait Mod: Send {
    /// Handle one event, returning the action to take.
    fn on_event(
        &mut self,
        event: &Event,
        actions: &ActionBuilder,
        tokenizer: &dyn Tokenizer,
    ) -> Result<Action, ModError>;
}

impl<F> Mod for F
where
    F: FnMut(&Event, &ActionBuilder, &dyn Tokenizer) -> Result<Action, ModError> + Send,
{
    fn on_event(
        &mut self,
        event: &Event,
        actions: &ActionBuilder,
        tokenizer: &dyn Tokenizer,
    ) -> Result<Action, ModError> {
        self(event, actions, tokenizer)
    }
}

/// Builds a fresh mod instance for each request.
pub type ModFactory = Arc<dyn Fn() -> Box<dyn Mod> + Send + Sync>;

/// A named mod instance attached to one request.
pub struct RegisteredMod {
    pub name: String,
    pub handler: Box<dyn Mod>,
}

/// Shared name-to-factory registry.
///
/// The only cross-request shared state besides the trace sink. Reads are
/// concurrent; registration takes the write lock so no request observes a
/// partially-registered mod. Registration is ephemeral (cleared on process
/// restart) and validated lazily: legality errors surface per invocation,
/// not here. Re-registering a name replaces the previous factory.
#[derive(Default, Clone)]
pub struct ModRegistry {
    inner: Arc<RwLock<HashMap<String, ModFactory>>>,
}

impl ModRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`, replacing any previous one.
    pub fn register(&self, name: impl Into<String>, factory: ModFactory) {
        let name = name.into();
        tracing::info!(mod_name = %name, "registering mod");
        self.inner.write().insert(name, factory);
    }

    /// Remove a mod by name.
    pub fn unregister(&self, name: &str) -> bool {
        self.inner.write().remove(name).is_some()
    }

    /// Names of all registered mods, unordered.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    /// Instantiate the named mods, in the given order, for one request.
    pub fn instantiate(&self, names: &[&str]) -> ControlResult<Vec<RegisteredMod>> {
        let registry = self.inner.read();
        names
            .iter()
            .map(|&name| {
                let factory = registry
                    .get(name)
                    .ok_or_else(|| ControlError::UnknownMod(name.to_string()))?;
                Ok(RegisteredMod {
                    name: name.to_string(),
                    handler: factory(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_factory() -> ModFactory {
        Arc::new(|| {
            Box::new(
                |_event: &Event, actions: &ActionBuilder, _tok: &dyn Tokenizer| Ok(actions.noop()),
            )
        })
    }

    #[test]
    fn instantiate_preserves_order_and_rejects_unknown() {
        let registry = ModRegistry::new();
        registry.register("a", noop_factory());
        registry.register("b", noop_factory());

        let mods = registry.instantiate(&["b", "a"]).unwrap();
        let names: Vec<&str> = mods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);

        assert!(matches!(
            registry.instantiate(&["missing"]),
            Err(ControlError::UnknownMod(_))
        ));
    }

    #[test]
    fn reregistration_replaces() {
        let registry = ModRegistry::new();
        registry.register("a", noop_factory());
        registry.register("a", noop_factory());
        assert_eq!(registry.names(), vec!["a".to_string()]);
        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
    }
}
