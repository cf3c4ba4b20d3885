//! Handler registry: event kind → ordered handlers.
//!
//! Populated once during startup wiring, then shared read-only (behind an
//! `Arc`) with every dispatch. Registering the same handler twice for a kind
//! appends a second entry; both run.

use crate::event::EventKind;
use crate::handler::EventHandler;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Maps event kinds to the handlers that should run for them.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to the list for `kind`.
    pub fn register(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) -> &mut Self {
        self.handlers.entry(kind).or_default().push(handler);
        self
    }

    /// Handlers for `kind` in registration order; empty if none.
    #[must_use]
    pub fn lookup(&self, kind: EventKind) -> &[Arc<dyn EventHandler>] {
        self.handlers.get(&kind).map_or(&[], Vec::as_slice)
    }

    /// Total number of registrations across all kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counts: Vec<_> = self
            .handlers
            .iter()
            .map(|(kind, list)| (kind.name(), list.len()))
            .collect();
        counts.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &counts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerReply, handler_fn};

    fn noop() -> Arc<dyn EventHandler> {
        handler_fn(|_, _| async { Ok(HandlerReply::Done) })
    }

    #[test]
    fn lookup_without_registrations_is_empty() {
        let registry = HandlerRegistry::new();
        assert!(registry.lookup(EventKind::PersonDeleted).is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn registrations_keep_insertion_order() {
        let first = noop();
        let second = noop();
        let mut registry = HandlerRegistry::new();
        registry
            .register(EventKind::PersonDeleted, Arc::clone(&first))
            .register(EventKind::PersonDeleted, Arc::clone(&second))
            .register(EventKind::RoleUpdated, noop());

        let handlers = registry.lookup(EventKind::PersonDeleted);
        assert_eq!(handlers.len(), 2);
        assert!(Arc::ptr_eq(&handlers[0], &first));
        assert!(Arc::ptr_eq(&handlers[1], &second));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn duplicate_registration_appends() {
        let handler = noop();
        let mut registry = HandlerRegistry::new();
        registry.register(EventKind::RoleUpdated, Arc::clone(&handler));
        registry.register(EventKind::RoleUpdated, handler);

        assert_eq!(registry.lookup(EventKind::RoleUpdated).len(), 2);
        assert_eq!(
            format!("{registry:?}"),
            "HandlerRegistry { handlers: [(\"RoleUpdated\", 2)] }"
        );
    }
}
