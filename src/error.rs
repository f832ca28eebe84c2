use thiserror::Error;

use crate::runtime::lifecycle::TransitionError;

/// Runtime errors using thiserror for structured error handling.
///
/// These errors are returned at the edges of the runtime: the bus boundary,
/// the supervisor lifecycle and configuration loading. Handler and hook
/// bodies use anyhow and are converted into these at the boundary.

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Invalid listener signature for {module}::{handler}: {reason}")]
    InvalidListenerSignature {
        module: String,
        handler: String,
        reason: String,
    },
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Supervisor has not been initialized")]
    NotInitialized,

    #[error("Supervisor is already initialized")]
    AlreadyInitialized,

    #[error("Invalid lifecycle transition")]
    InvalidTransition(#[from] TransitionError),

    #[error("Module '{module}' failed to start")]
    ModuleInitialization {
        module: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    Bus(#[from] BusError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration from {path}")]
    LoadFailed {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Failed to save configuration to {path}")]
    SaveFailed {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to create config directory: {path}")]
    DirectoryCreationFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Type alias for application Results using anyhow for context chaining
pub type AppResult<T> = anyhow::Result<T>;
