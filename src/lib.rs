//! Lyra: a pluggable-module runtime.
//!
//! Modules are listed in a [`ModuleCatalog`], discovered by namespace and
//! driven through their lifecycle by a [`Supervisor`]. They talk to each
//! other only through the typed, polymorphic [`EventBus`]. Uncaught panics
//! are routed by the [`PanicRouter`]; unrecoverable ones end the process
//! through the fatal error path with a bounded shutdown wait.
//!
//! Event types are declared with the exported [`impl_event!`] macro.

pub mod config;
pub mod error;
pub mod messaging;
pub mod modules;
pub mod runtime;
pub mod utils;

pub use config::RuntimeConfig;
pub use error::{AppResult, BusError, ConfigError, SupervisorError};
pub use messaging::{Event, EventBus, EventKind, Registrar, TypedEvent};
pub use runtime::{
    report_fatal_error, FatalOutcome, Module, ModuleCatalog, ModuleContext, PanicRouter,
    Supervisor, Unrecoverable,
};
