/// Runtime module
///
/// Module discovery and lifecycle supervision, plus the escalation path for
/// failures that must end the process.
///
/// ## Architecture
///
/// ```text
/// ModuleCatalog ──discover(ns)──> Supervisor ──register_handlers──> EventBus
///                                    │
///                                    ├── start(): hooks in discovery order
///                                    └── stop():  hooks in reverse order
///
/// panic hook ──> PanicRouter ──fatal──────> FatalErrorPath ──> stop() on worker, exit(1)
///                            └─non-fatal──> ErrorEvent on the bus
/// ```
///
/// ## Usage
///
/// ```rust,ignore
/// let mut catalog = ModuleCatalog::new();
/// catalog.register("app.lyrics", "lyrics", || Arc::new(LyricsDisplay::new()));
///
/// let supervisor = runtime::initialize(&catalog, "app")?;
/// PanicRouter::for_process().install();
/// supervisor.start()?;
/// ```

pub mod fatal;
pub mod lifecycle;
pub mod module;
pub mod panic_router;
pub mod supervisor;

// Re-export commonly used types
pub use fatal::{report_fatal_error, FatalErrorPath, FatalOutcome, Terminator};
pub use lifecycle::{LifecycleMachine, LifecycleState, TransitionError};
pub use module::{Module, ModuleCatalog, ModuleContext, ModuleDescriptor};
pub use panic_router::{PanicRouter, Unrecoverable};
pub use supervisor::{initialize, instance, teardown, Supervisor};
