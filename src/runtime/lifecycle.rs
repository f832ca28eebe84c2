/// Supervisor lifecycle state machine
///
/// Represents the lifecycle shared by all modules with one-directional
/// transitions. `Stopped` is terminal.

use std::time::Instant;

/// State of the supervisor
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LifecycleState {
    /// Created, no modules discovered yet
    Uninitialized,

    /// Modules discovered and wired into the bus
    Discovering,

    /// Start hooks are running (transitional state)
    Starting,

    /// Every start hook succeeded
    Running { since: Instant },

    /// Stop hooks are running (transitional state)
    Stopping,

    /// Terminal; a fresh supervisor is required to run again
    Stopped,
}

impl LifecycleState {
    pub fn is_running(&self) -> bool {
        matches!(self, LifecycleState::Running { .. })
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, LifecycleState::Stopped)
    }

    /// Check if the supervisor is in a transitional state
    pub fn is_transitioning(&self) -> bool {
        matches!(self, LifecycleState::Starting | LifecycleState::Stopping)
    }

    /// Get the time since modules started (if running)
    pub fn running_duration(&self) -> Option<std::time::Duration> {
        match self {
            LifecycleState::Running { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    /// Get a human-readable description of the state
    pub fn description(&self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "Uninitialized",
            LifecycleState::Discovering => "Discovering",
            LifecycleState::Starting => "Starting...",
            LifecycleState::Running { .. } => "Running",
            LifecycleState::Stopping => "Stopping...",
            LifecycleState::Stopped => "Stopped",
        }
    }
}

impl Default for LifecycleState {
    fn default() -> Self {
        LifecycleState::Uninitialized
    }
}

/// Rejected transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    /// Cannot start when already running
    AlreadyRunning,

    /// The supervisor already stopped and cannot be reused
    Terminated,

    /// Cannot stop when not running
    NotRunning,

    /// Cannot perform this action during a transition
    InTransition,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionError::AlreadyRunning => write!(f, "Modules are already running"),
            TransitionError::Terminated => {
                write!(f, "Supervisor has stopped; create a new one to restart")
            }
            TransitionError::NotRunning => write!(f, "Modules are not running"),
            TransitionError::InTransition => {
                write!(f, "Cannot perform action during state transition")
            }
        }
    }
}

impl std::error::Error for TransitionError {}

/// State machine for lifecycle transitions
#[derive(Debug, Default)]
pub struct LifecycleMachine {
    state: LifecycleState,
}

impl LifecycleMachine {
    /// Create a new state machine in the Uninitialized state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current state
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Transition to Discovering
    pub fn begin_discovery(&mut self) -> Result<(), TransitionError> {
        match self.state {
            LifecycleState::Uninitialized | LifecycleState::Discovering => {
                self.state = LifecycleState::Discovering;
                Ok(())
            }
            other => Err(Self::blocked(other)),
        }
    }

    /// Transition to Starting
    pub fn begin_start(&mut self) -> Result<(), TransitionError> {
        match self.state {
            LifecycleState::Uninitialized | LifecycleState::Discovering => {
                self.state = LifecycleState::Starting;
                Ok(())
            }
            other => Err(Self::blocked(other)),
        }
    }

    /// Transition from Starting to Running
    pub fn mark_running(&mut self) -> Result<(), TransitionError> {
        match self.state {
            LifecycleState::Starting => {
                self.state = LifecycleState::Running {
                    since: Instant::now(),
                };
                Ok(())
            }
            other => Err(Self::blocked(other)),
        }
    }

    /// Transition to Stopping
    pub fn begin_stop(&mut self) -> Result<(), TransitionError> {
        match self.state {
            LifecycleState::Running { .. } => {
                self.state = LifecycleState::Stopping;
                Ok(())
            }
            LifecycleState::Stopped => Err(TransitionError::Terminated),
            LifecycleState::Starting | LifecycleState::Stopping => {
                Err(TransitionError::InTransition)
            }
            _ => Err(TransitionError::NotRunning),
        }
    }

    /// Transition from Stopping to Stopped
    pub fn mark_stopped(&mut self) -> Result<(), TransitionError> {
        match self.state {
            LifecycleState::Stopping => {
                self.state = LifecycleState::Stopped;
                Ok(())
            }
            other => Err(Self::blocked(other)),
        }
    }

    /// A start hook failed; go straight to Stopped
    pub fn abort_start(&mut self) -> Result<(), TransitionError> {
        match self.state {
            LifecycleState::Starting => {
                self.state = LifecycleState::Stopped;
                Ok(())
            }
            other => Err(Self::blocked(other)),
        }
    }

    fn blocked(state: LifecycleState) -> TransitionError {
        match state {
            LifecycleState::Running { .. } => TransitionError::AlreadyRunning,
            LifecycleState::Stopped => TransitionError::Terminated,
            LifecycleState::Uninitialized | LifecycleState::Discovering => {
                TransitionError::NotRunning
            }
            LifecycleState::Starting | LifecycleState::Stopping => TransitionError::InTransition,
        }
    }
}
