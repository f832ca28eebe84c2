/// Module supervisor
///
/// Discovers modules from a catalog, wires their handlers into the bus and
/// drives one shared start/stop lifecycle for all of them.
use std::sync::Arc;

use parking_lot::RwLock;

use super::lifecycle::{LifecycleMachine, LifecycleState};
use super::module::{Module, ModuleCatalog, ModuleContext};
use crate::error::{BusError, SupervisorError};
use crate::messaging::{Event, EventBus, Registrar, SupervisorStarted, SupervisorStopping};
use crate::utils;

pub(crate) const LOG_TARGET: &str = "lyra::supervisor";

/// A discovered module instance
#[derive(Clone)]
struct ModuleSlot {
    name: String,
    instance: Arc<dyn Module>,
    ctx: ModuleContext,
}

/// Owns every module instance and the bus they communicate through
pub struct Supervisor {
    namespace: RwLock<String>,
    bus: EventBus,
    modules: RwLock<Vec<ModuleSlot>>,
    lifecycle: RwLock<LifecycleMachine>,
}

impl Supervisor {
    /// Create an empty supervisor in the Uninitialized state
    pub fn new(bus: EventBus) -> Self {
        Self {
            namespace: RwLock::new(String::new()),
            bus,
            modules: RwLock::new(Vec::new()),
            lifecycle: RwLock::new(LifecycleMachine::new()),
        }
    }

    /// Create a supervisor with its own bus and discover `namespace`
    pub fn with_catalog(
        catalog: &ModuleCatalog,
        namespace: &str,
    ) -> Result<Self, SupervisorError> {
        let supervisor = Self::new(EventBus::new());
        supervisor.discover(catalog, namespace)?;
        Ok(supervisor)
    }

    /// Instantiate every module of `namespace` and register its handlers.
    ///
    /// Fails fast on the first module declaring a malformed handler. The
    /// handlers of every module discovered so far are unsubscribed again.
    pub fn discover(
        &self,
        catalog: &ModuleCatalog,
        namespace: &str,
    ) -> Result<(), SupervisorError> {
        self.lifecycle.write().begin_discovery()?;
        *self.namespace.write() = namespace.to_string();

        let descriptors = catalog.discover(namespace);
        if descriptors.is_empty() {
            tracing::warn!(
                target: LOG_TARGET,
                "No modules found in namespace '{}'",
                namespace
            );
        }

        for descriptor in descriptors {
            let name = descriptor.name().to_string();
            if self.modules.read().iter().any(|slot| slot.name == name) {
                tracing::debug!(target: LOG_TARGET, "Module {} already discovered", name);
                continue;
            }

            let instance = descriptor.instantiate();
            let mut registrar = Registrar::new(name.as_str());
            Arc::clone(&instance).register_handlers(&mut registrar);
            let handlers = registrar.len();
            if let Err(err) = self.bus.register_module(registrar) {
                for slot in self.modules.write().drain(..) {
                    self.bus.unsubscribe_module(&slot.name);
                }
                return Err(err.into());
            }

            tracing::info!(
                target: LOG_TARGET,
                "Discovered module {} ({}) with {} handler(s)",
                name,
                descriptor.namespace(),
                handlers
            );
            self.modules.write().push(ModuleSlot {
                ctx: ModuleContext::new(&name, self.bus.clone()),
                name,
                instance,
            });
        }
        Ok(())
    }

    /// Run every start hook in discovery order.
    ///
    /// On the first failing hook the remaining modules are not started, the
    /// already started ones are stopped in reverse order and the supervisor
    /// ends in `Stopped`.
    pub fn start(&self) -> Result<(), SupervisorError> {
        self.lifecycle.write().begin_start()?;
        let modules = self.modules.read().clone();

        for (index, slot) in modules.iter().enumerate() {
            tracing::info!(target: LOG_TARGET, "Starting module {}", slot.name);

            let failure = match utils::contain_startup(|| slot.instance.start(&slot.ctx)) {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(payload) => anyhow::anyhow!(
                    "start hook panicked: {}",
                    utils::panic_message(payload.as_ref())
                ),
            };

            tracing::error!(
                target: LOG_TARGET,
                "Module {} failed to start: {:#}",
                slot.name,
                failure
            );
            for started in modules[..index].iter().rev() {
                run_stop_hook(started);
            }
            if let Err(err) = self.lifecycle.write().abort_start() {
                tracing::warn!(
                    target: LOG_TARGET,
                    "Unexpected state after failed start: {}",
                    err
                );
            }

            return Err(SupervisorError::ModuleInitialization {
                module: slot.name.clone(),
                source: failure.into(),
            });
        }

        self.lifecycle.write().mark_running()?;
        tracing::info!(target: LOG_TARGET, "{} module(s) running", modules.len());

        let names = modules.iter().map(|slot| slot.name.clone()).collect();
        self.publish_quietly(SupervisorStarted { modules: names });
        Ok(())
    }

    /// Run every stop hook in reverse discovery order.
    ///
    /// No-op unless running. Hook failures are logged and never keep the
    /// remaining modules from stopping.
    pub fn stop(&self) {
        if let Err(reason) = self.lifecycle.write().begin_stop() {
            tracing::debug!(target: LOG_TARGET, "Stop ignored: {}", reason);
            return;
        }

        tracing::info!(target: LOG_TARGET, "Stopping modules");
        self.publish_quietly(SupervisorStopping);

        let modules = self.modules.read().clone();
        for slot in modules.iter().rev() {
            run_stop_hook(slot);
        }

        if let Err(err) = self.lifecycle.write().mark_stopped() {
            tracing::warn!(target: LOG_TARGET, "Unexpected state after stop: {}", err);
        }
        tracing::info!(target: LOG_TARGET, "All modules stopped");
    }

    /// Stop (if running) and remove every module's handlers from the bus
    pub fn teardown(&self) {
        self.stop();
        let modules = std::mem::take(&mut *self.modules.write());
        for slot in &modules {
            self.bus.unsubscribe_module(&slot.name);
        }
        tracing::debug!(target: LOG_TARGET, "Released {} module(s)", modules.len());
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.read().state()
    }

    pub fn namespace(&self) -> String {
        self.namespace.read().clone()
    }

    /// Names of discovered modules, in discovery order
    pub fn module_names(&self) -> Vec<String> {
        self.modules.read().iter().map(|slot| slot.name.clone()).collect()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Publish on the bus, independent of the run state
    pub fn publish<E: Event>(&self, event: E) -> Result<usize, BusError> {
        self.bus.publish(event)
    }

    fn publish_quietly<E: Event>(&self, event: E) {
        if let Err(err) = self.bus.publish(event) {
            tracing::warn!(target: LOG_TARGET, "Lifecycle event rejected: {}", err);
        }
    }
}

fn run_stop_hook(slot: &ModuleSlot) {
    tracing::info!(target: LOG_TARGET, "Stopping module {}", slot.name);
    match utils::contain(|| slot.instance.stop(&slot.ctx)) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::error!(
            target: LOG_TARGET,
            "Module {} failed to stop: {:#}",
            slot.name,
            err
        ),
        Err(payload) => tracing::error!(
            target: LOG_TARGET,
            "Module {} panicked while stopping: {}",
            slot.name,
            utils::panic_message(payload.as_ref())
        ),
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("namespace", &self.namespace())
            .field("state", &self.state())
            .field("modules", &self.module_names())
            .finish()
    }
}

static GLOBAL: RwLock<Option<Arc<Supervisor>>> = parking_lot::const_rwlock(None);

/// Create the process-wide supervisor and discover `namespace`.
///
/// Calling this again before [`teardown`] fails with `AlreadyInitialized`.
pub fn initialize(
    catalog: &ModuleCatalog,
    namespace: &str,
) -> Result<Arc<Supervisor>, SupervisorError> {
    if GLOBAL.read().is_some() {
        return Err(SupervisorError::AlreadyInitialized);
    }

    // Discovery runs module code, so it happens outside the lock
    let supervisor = Arc::new(Supervisor::with_catalog(catalog, namespace)?);

    let mut global = GLOBAL.write();
    if global.is_some() {
        drop(global);
        supervisor.teardown();
        return Err(SupervisorError::AlreadyInitialized);
    }
    *global = Some(Arc::clone(&supervisor));
    Ok(supervisor)
}

/// The process-wide supervisor
pub fn instance() -> Result<Arc<Supervisor>, SupervisorError> {
    GLOBAL
        .read()
        .as_ref()
        .map(Arc::clone)
        .ok_or(SupervisorError::NotInitialized)
}

/// Stop and release the process-wide supervisor so `initialize` may run again
pub fn teardown() -> Option<Arc<Supervisor>> {
    let supervisor = GLOBAL.write().take()?;
    supervisor.teardown();
    Some(supervisor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::events::{PlaybackError, BASE_EVENT, LIFECYCLE_EVENT};
    use crate::messaging::NextLyricLine;
    use parking_lot::Mutex;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        journal: Journal,
        fail_start: bool,
        fail_stop: bool,
    }

    impl Recorder {
        fn new(name: &'static str, journal: &Journal) -> Self {
            Self {
                name,
                journal: Arc::clone(journal),
                fail_start: false,
                fail_stop: false,
            }
        }
    }

    impl Module for Recorder {
        fn register_handlers(self: Arc<Self>, registrar: &mut Registrar) {
            let me = Arc::clone(&self);
            registrar.on::<PlaybackError, _>("on_error", move |event| {
                me.journal
                    .lock()
                    .push(format!("{}:error:{}", me.name, event.message));
                Ok(())
            });
        }

        fn start(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
            self.journal.lock().push(format!("{}:start", self.name));
            if self.fail_start {
                anyhow::bail!("{} refused to start", self.name);
            }
            Ok(())
        }

        fn stop(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
            self.journal.lock().push(format!("{}:stop", self.name));
            if self.fail_stop {
                anyhow::bail!("{} refused to stop", self.name);
            }
            Ok(())
        }
    }

    fn catalog(journal: &Journal, failing_start: Option<&'static str>) -> ModuleCatalog {
        let mut catalog = ModuleCatalog::new();
        for name in ["m1", "m2", "m3"] {
            let journal = Arc::clone(journal);
            catalog.register("app", name, move || {
                let mut module = Recorder::new(name, &journal);
                module.fail_start = failing_start == Some(name);
                module.fail_stop = name == "m3";
                Arc::new(module)
            });
        }
        catalog
    }

    #[test]
    fn test_start_and_stop_order() {
        let journal = Journal::default();
        let supervisor = Supervisor::with_catalog(&catalog(&journal, None), "app").unwrap();
        assert_eq!(supervisor.state(), LifecycleState::Discovering);
        assert_eq!(supervisor.module_names(), vec!["m1", "m2", "m3"]);

        supervisor.start().unwrap();
        assert!(supervisor.is_running());

        supervisor.stop();
        assert!(!supervisor.is_running());
        assert_eq!(supervisor.state(), LifecycleState::Stopped);

        // m3's failing stop hook does not keep m2 and m1 from stopping
        assert_eq!(
            *journal.lock(),
            vec!["m1:start", "m2:start", "m3:start", "m3:stop", "m2:stop", "m1:stop"]
        );
    }

    #[test]
    fn test_second_stop_is_noop() {
        let journal = Journal::default();
        let supervisor = Supervisor::with_catalog(&catalog(&journal, None), "app").unwrap();
        supervisor.start().unwrap();
        supervisor.stop();
        let after_first = journal.lock().len();

        supervisor.stop();
        assert_eq!(journal.lock().len(), after_first);
        assert!(!supervisor.is_running());
    }

    #[test]
    fn test_failing_start_aborts_remaining() {
        let journal = Journal::default();
        let supervisor = Supervisor::with_catalog(&catalog(&journal, Some("m2")), "app").unwrap();

        match supervisor.start() {
            Err(SupervisorError::ModuleInitialization { module, .. }) => assert_eq!(module, "m2"),
            other => panic!("Expected ModuleInitialization, got {:?}", other),
        }

        assert!(!supervisor.is_running());
        assert_eq!(supervisor.state(), LifecycleState::Stopped);
        assert_eq!(*journal.lock(), vec!["m1:start", "m2:start", "m1:stop"]);
    }

    #[test]
    fn test_panicking_start_hook_is_reported() {
        struct Exploding;

        impl Module for Exploding {
            fn start(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
                panic!("audio device vanished");
            }
        }

        let mut catalog = ModuleCatalog::new();
        catalog.register("app", "exploding", || Arc::new(Exploding));
        let supervisor = Supervisor::with_catalog(&catalog, "app").unwrap();

        let err = supervisor.start().unwrap_err();
        assert!(matches!(err, SupervisorError::ModuleInitialization { .. }));
        assert!(!supervisor.is_running());
    }

    #[test]
    fn test_restart_after_stop_is_rejected() {
        let journal = Journal::default();
        let supervisor = Supervisor::with_catalog(&catalog(&journal, None), "app").unwrap();
        supervisor.start().unwrap();
        supervisor.stop();

        assert!(matches!(
            supervisor.start(),
            Err(SupervisorError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_publish_works_before_start() {
        let journal = Journal::default();
        let supervisor = Supervisor::with_catalog(&catalog(&journal, None), "app").unwrap();

        assert_eq!(supervisor.publish(PlaybackError::new("early")).unwrap(), 3);
        assert_eq!(
            *journal.lock(),
            vec!["m1:error:early", "m2:error:early", "m3:error:early"]
        );
    }

    #[test]
    fn test_lifecycle_events_published() {
        let journal = Journal::default();
        let supervisor = Supervisor::with_catalog(&catalog(&journal, None), "app").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        supervisor
            .bus()
            .register("test", "lifecycle", &LIFECYCLE_EVENT, move |event| {
                sink.lock().push(event.kind().name());
                Ok(())
            })
            .unwrap();

        supervisor.start().unwrap();
        supervisor.stop();
        assert_eq!(*seen.lock(), vec!["SupervisorStarted", "SupervisorStopping"]);
    }

    #[test]
    fn test_invalid_handler_fails_discovery() {
        struct Sloppy;

        impl Module for Sloppy {
            fn register_handlers(self: Arc<Self>, registrar: &mut Registrar) {
                registrar
                    .on::<NextLyricLine, _>("handle", |_| Ok(()))
                    .on_kind("handle", &BASE_EVENT, |_| Ok(()));
            }
        }

        let mut catalog = ModuleCatalog::new();
        catalog.register("app", "sloppy", || Arc::new(Sloppy));

        let err = Supervisor::with_catalog(&catalog, "app").unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::Bus(BusError::InvalidListenerSignature { .. })
        ));
    }

    #[test]
    fn test_failed_discovery_rolls_back_earlier_modules() {
        struct Sloppy;

        impl Module for Sloppy {
            fn register_handlers(self: Arc<Self>, registrar: &mut Registrar) {
                registrar.on_kind("", &BASE_EVENT, |_| Ok(()));
            }
        }

        let journal = Journal::default();
        let mut catalog = catalog(&journal, None);
        catalog.register("app", "sloppy", || Arc::new(Sloppy));

        let bus = EventBus::new();
        let supervisor = Supervisor::new(bus.clone());
        assert!(supervisor.discover(&catalog, "app").is_err());

        assert_eq!(bus.listener_count(), 0);
        assert!(supervisor.module_names().is_empty());
        assert_eq!(bus.publish(PlaybackError::new("late")).unwrap(), 0);
        assert!(journal.lock().is_empty());
    }

    #[test]
    fn test_teardown_unsubscribes_modules() {
        let journal = Journal::default();
        let supervisor = Supervisor::with_catalog(&catalog(&journal, None), "app").unwrap();
        assert_eq!(supervisor.bus().listener_count(), 3);

        supervisor.teardown();
        assert_eq!(supervisor.bus().listener_count(), 0);
        assert!(supervisor.module_names().is_empty());
    }
}
