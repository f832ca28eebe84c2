/// Listener registry
///
/// Holds every (module, handler, declared kind) registration in the order it
/// was added, plus a per-kind dispatch table resolved lazily on publish.
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use super::events::{Event, EventKind, TypedEvent};
use crate::error::BusError;

/// Handler body; receives the event as its sole argument
pub type HandlerFn = Arc<dyn Fn(&dyn Event) -> anyhow::Result<()> + Send + Sync>;

/// Payload check of a typed handler
type PayloadCheck = fn(&dyn Event) -> bool;

/// Listener ID for tracking registrations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// One registered handler
#[derive(Clone)]
pub struct Listener {
    id: ListenerId,
    module: Arc<str>,
    handler: Arc<str>,
    kind: &'static EventKind,
    payload: Option<PayloadCheck>,
    callback: HandlerFn,
}

impl Listener {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn handler(&self) -> &str {
        &self.handler
    }

    pub fn kind(&self) -> &'static EventKind {
        self.kind
    }

    /// True if this listener wants events of `kind`
    pub fn accepts(&self, kind: &EventKind) -> bool {
        kind.is_a(self.kind)
    }

    /// False if a typed handler cannot view the event as its parameter type
    pub fn accepts_payload(&self, event: &dyn Event) -> bool {
        self.payload.map_or(true, |check| check(event))
    }

    pub(crate) fn call(&self, event: &dyn Event) -> anyhow::Result<()> {
        (self.callback)(event)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("module", &self.module)
            .field("handler", &self.handler)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Handler declaration collected by a [`Registrar`]
pub struct HandlerDecl {
    name: String,
    kind: &'static EventKind,
    payload: Option<PayloadCheck>,
    callback: HandlerFn,
}

/// Collects the handler declarations of one module.
///
/// Declarations are only validated when the registrar is handed to the bus,
/// so a module either registers all of its handlers or none of them.
pub struct Registrar {
    module: String,
    decls: Vec<HandlerDecl>,
}

impl Registrar {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            decls: Vec::new(),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Declare a handler for a concrete event type; the declared kind is the
    /// parameter type's kind.
    ///
    /// Events of descendant kinds are delivered when their payload can be
    /// viewed as `T` (see [`Event::as_ancestor`]); the bus skips the handler
    /// for the others.
    pub fn on<T, F>(&mut self, name: &str, handler: F) -> &mut Self
    where
        T: TypedEvent,
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let callback: HandlerFn = Arc::new(move |event: &dyn Event| {
            let typed = event.project::<T>().ok_or_else(|| {
                anyhow::anyhow!(
                    "{} payload is not a {}",
                    event.kind(),
                    std::any::type_name::<T>()
                )
            })?;
            handler(typed)
        });
        self.decls.push(HandlerDecl {
            name: name.to_string(),
            kind: T::static_kind(),
            payload: Some(projects_to::<T> as PayloadCheck),
            callback,
        });
        self
    }

    /// Declare a handler for a kind category (e.g. every lyrics event)
    pub fn on_kind<F>(&mut self, name: &str, kind: &'static EventKind, handler: F) -> &mut Self
    where
        F: Fn(&dyn Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.decls.push(HandlerDecl {
            name: name.to_string(),
            kind,
            payload: None,
            callback: Arc::new(handler),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }

    /// Validate every declaration, failing on the first malformed one
    pub(crate) fn into_validated(self) -> Result<(String, Vec<HandlerDecl>), BusError> {
        let mut seen = HashSet::new();
        for decl in &self.decls {
            let reason = if decl.name.trim().is_empty() {
                Some("handler name is empty".to_string())
            } else if !seen.insert(decl.name.as_str()) {
                Some("handler declared more than once".to_string())
            } else if !decl.kind.is_rooted() {
                Some(format!(
                    "parameter kind '{}' is not an event kind",
                    decl.kind
                ))
            } else {
                None
            };

            if let Some(reason) = reason {
                return Err(BusError::InvalidListenerSignature {
                    module: self.module.clone(),
                    handler: decl.name.clone(),
                    reason,
                });
            }
        }
        Ok((self.module, self.decls))
    }
}

fn projects_to<T: TypedEvent>(event: &dyn Event) -> bool {
    event.project::<T>().is_some()
}

/// Registration list plus the resolved dispatch table
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    listeners: Vec<Listener>,
    dispatch: HashMap<&'static EventKind, Arc<[Listener]>>,
    next_id: u64,
}

impl ListenerRegistry {
    pub fn add(&mut self, module: &str, decl: HandlerDecl) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;

        self.listeners.push(Listener {
            id,
            module: Arc::from(module),
            handler: Arc::from(decl.name),
            kind: decl.kind,
            payload: decl.payload,
            callback: decl.callback,
        });
        self.dispatch.clear();
        id
    }

    /// Cached handlers for `kind`, if resolved since the last mutation
    pub fn cached(&self, kind: &'static EventKind) -> Option<Arc<[Listener]>> {
        self.dispatch.get(kind).cloned()
    }

    /// Resolve and cache the handlers for `kind`, in registration order
    pub fn resolve(&mut self, kind: &'static EventKind) -> Arc<[Listener]> {
        if let Some(hit) = self.dispatch.get(kind) {
            return Arc::clone(hit);
        }

        let matching: Arc<[Listener]> = self
            .listeners
            .iter()
            .filter(|listener| listener.accepts(kind))
            .cloned()
            .collect();
        self.dispatch.insert(kind, Arc::clone(&matching));
        matching
    }

    pub fn remove_module(&mut self, module: &str) -> usize {
        let before = self.listeners.len();
        self.listeners.retain(|l| &*l.module != module);
        let removed = before - self.listeners.len();
        if removed > 0 {
            self.dispatch.clear();
        }
        removed
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| l.id != id);
        let removed = before != self.listeners.len();
        if removed {
            self.dispatch.clear();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
        self.dispatch.clear();
    }
}
