use parking_lot::{RwLock, RwLockUpgradableReadGuard};
/// Event bus for pub/sub messaging
///
/// Modules register handlers for event kinds and publish events to every
/// handler whose kind is the event's kind or one of its ancestors.
use std::sync::Arc;

use super::events::{Event, EventKind};
use super::registry::{Listener, ListenerId, ListenerRegistry, Registrar};
use crate::error::BusError;
use crate::utils;

pub(crate) const LOG_TARGET: &str = "lyra::bus";

/// Event bus dispatching synchronously on the publishing thread
pub struct EventBus {
    registry: Arc<RwLock<ListenerRegistry>>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self {
            registry: Arc::new(RwLock::new(ListenerRegistry::default())),
        }
    }

    /// Register a single handler for `kind`
    pub fn register<F>(
        &self,
        module: &str,
        handler: &str,
        kind: &'static EventKind,
        callback: F,
    ) -> Result<ListenerId, BusError>
    where
        F: Fn(&dyn Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut registrar = Registrar::new(module);
        registrar.on_kind(handler, kind, callback);
        let ids = self.register_module(registrar)?;
        Ok(ids[0])
    }

    /// Register every handler a module declared, all or nothing
    pub fn register_module(&self, registrar: Registrar) -> Result<Vec<ListenerId>, BusError> {
        let (module, decls) = registrar.into_validated()?;

        let mut registry = self.registry.write();
        let ids: Vec<ListenerId> = decls
            .into_iter()
            .map(|decl| registry.add(&module, decl))
            .collect();
        drop(registry);

        tracing::debug!(
            target: LOG_TARGET,
            "Registered {} handler(s) for module {}",
            ids.len(),
            module
        );
        Ok(ids)
    }

    /// Publish an event to all matching handlers.
    ///
    /// Returns the number of handlers the event was dispatched to. Typed
    /// handlers whose parameter type the payload does not extend are skipped
    /// and not counted. Handler failures are logged and never reach the caller.
    pub fn publish<E: Event>(&self, event: E) -> Result<usize, BusError> {
        self.publish_dyn(&event)
    }

    /// Publish an already type-erased event
    pub fn publish_dyn(&self, event: &dyn Event) -> Result<usize, BusError> {
        let kind = event.kind();
        if !kind.is_rooted() {
            return Err(BusError::InvalidEvent(format!(
                "kind '{}' is not rooted at BaseEvent",
                kind
            )));
        }
        if let Err(reason) = event.validate() {
            return Err(BusError::InvalidEvent(format!("{}: {}", kind, reason)));
        }

        let listeners = self.snapshot(kind);
        let mut delivered = 0;
        for listener in listeners.iter() {
            if !listener.accepts_payload(event) {
                tracing::warn!(
                    target: LOG_TARGET,
                    module = listener.module(),
                    handler = listener.handler(),
                    "Skipping handler for {}: payload does not extend {}",
                    kind,
                    listener.kind()
                );
                continue;
            }
            invoke(listener, event);
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Resolve handlers for `kind`; the lock is released before dispatch so
    /// handlers may publish or register reentrantly.
    fn snapshot(&self, kind: &'static EventKind) -> Arc<[Listener]> {
        let registry = self.registry.upgradable_read();
        if let Some(hit) = registry.cached(kind) {
            return hit;
        }
        let mut registry = RwLockUpgradableReadGuard::upgrade(registry);
        registry.resolve(kind)
    }

    /// Remove one handler
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.registry.write().remove(id)
    }

    /// Remove every handler owned by `module`
    pub fn unsubscribe_module(&self, module: &str) -> usize {
        let removed = self.registry.write().remove_module(module);
        if removed > 0 {
            tracing::debug!(
                target: LOG_TARGET,
                "Removed {} handler(s) of module {}",
                removed,
                module
            );
        }
        removed
    }

    /// Get number of registered handlers
    pub fn listener_count(&self) -> usize {
        self.registry.read().len()
    }

    /// Clear all handlers
    pub fn clear(&self) {
        self.registry.write().clear();
    }
}

fn invoke(listener: &Listener, event: &dyn Event) {
    let failure = match utils::contain(|| listener.call(event)) {
        Ok(Ok(())) => return,
        Ok(Err(err)) => format!("{:#}", err),
        Err(payload) => format!("panicked: {}", utils::panic_message(payload.as_ref())),
    };

    // Logging must not break iteration either
    let _ = utils::contain(|| {
        tracing::error!(
            target: LOG_TARGET,
            module = listener.module(),
            handler = listener.handler(),
            "Handler failed on {}: {}",
            event.kind(),
            failure
        );
    });
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
