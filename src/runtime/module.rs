/// Module contract and discovery catalog
///
/// A module is an independently developed unit with optional lifecycle hooks
/// and event handlers. Modules are listed in a [`ModuleCatalog`] under a
/// dotted namespace; the supervisor discovers them from there.
use std::fmt;
use std::sync::Arc;

use crate::error::BusError;
use crate::messaging::{Event, EventBus, Registrar};

/// Implemented by every pluggable module
pub trait Module: Send + Sync + 'static {
    /// Declare event handlers. Called once, before any start hook.
    fn register_handlers(self: Arc<Self>, registrar: &mut Registrar) {
        let _ = registrar;
    }

    fn start(&self, ctx: &ModuleContext) -> anyhow::Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Must return promptly; stop hooks are not abortable
    fn stop(&self, ctx: &ModuleContext) -> anyhow::Result<()> {
        let _ = ctx;
        Ok(())
    }
}

/// Handle given to lifecycle hooks
#[derive(Clone, Debug)]
pub struct ModuleContext {
    module: Arc<str>,
    bus: EventBus,
}

impl ModuleContext {
    pub fn new(module: &str, bus: EventBus) -> Self {
        Self {
            module: Arc::from(module),
            bus,
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Bus handle; clone it to publish from worker threads
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn publish<E: Event>(&self, event: E) -> Result<usize, BusError> {
        self.bus.publish(event)
    }
}

type Factory = Arc<dyn Fn() -> Arc<dyn Module> + Send + Sync>;

/// A module known to the catalog
#[derive(Clone)]
pub struct ModuleDescriptor {
    name: String,
    namespace: String,
    factory: Factory,
}

impl ModuleDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// True if the descriptor lives in `namespace` or below it
    pub fn is_in(&self, namespace: &str) -> bool {
        self.namespace == namespace
            || (self.namespace.starts_with(namespace)
                && self.namespace[namespace.len()..].starts_with('.'))
    }

    pub fn instantiate(&self) -> Arc<dyn Module> {
        (self.factory)()
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .finish()
    }
}

/// Ordered table of known modules, built at startup
#[derive(Clone, Debug, Default)]
pub struct ModuleCatalog {
    descriptors: Vec<ModuleDescriptor>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module under `namespace`.
    ///
    /// A name already present is ignored so each module has one instance.
    pub fn register<F, M>(&mut self, namespace: &str, name: &str, factory: F) -> &mut Self
    where
        F: Fn() -> Arc<M> + Send + Sync + 'static,
        M: Module,
    {
        if self.descriptors.iter().any(|d| d.name == name) {
            tracing::warn!(
                target: super::supervisor::LOG_TARGET,
                "Module {} registered twice; keeping the first registration",
                name
            );
            return self;
        }

        self.descriptors.push(ModuleDescriptor {
            name: name.to_string(),
            namespace: namespace.to_string(),
            factory: Arc::new(move || -> Arc<dyn Module> { factory() }),
        });
        self
    }

    /// Descriptors in `namespace`, in registration order
    pub fn discover(&self, namespace: &str) -> Vec<&ModuleDescriptor> {
        self.descriptors
            .iter()
            .filter(|d| d.is_in(namespace))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
