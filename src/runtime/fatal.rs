/// Fatal error path
///
/// The single place where the process is terminated after an unrecoverable
/// failure. The shutdown body runs at most once per [`FatalErrorPath`]; the
/// supervisor is stopped on a dedicated worker thread while the reporting
/// thread waits a bounded amount of time, then termination is forced.
///
/// ```text
/// report ──> guard: Normal? ──no──> log, return (Ignored)
///                 │ yes
///                 ▼
///        supervisor running? ──no──> terminate (Direct)
///                 │ yes
///                 ▼
///   worker: stop() ; terminate      reporter: wait ≤ timeout ──timeout──> terminate (Forced)
/// ```
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;

use super::supervisor::{self, Supervisor};
use crate::error::SupervisorError;
use crate::utils;

const LOG_TARGET: &str = "lyra::fatal";

/// Bounded wait for the shutdown worker
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Exit status used by every fatal termination
pub const FATAL_EXIT_CODE: i32 = 1;

/// Ends the process
pub trait Terminator: Send + Sync {
    fn terminate(&self, code: i32);
}

/// Exits the current process
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessTerminator;

impl Terminator for ProcessTerminator {
    fn terminate(&self, code: i32) {
        tracing::error!(target: LOG_TARGET, "Terminating process with status {}", code);
        std::process::exit(code);
    }
}

/// Shutdown guard states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalState {
    Normal,
    ShuttingDown,
    Terminated,
}

/// How a fatal report was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalOutcome {
    /// A shutdown was already in flight; nothing was done
    Ignored,
    /// The worker stopped the supervisor and terminated
    Graceful,
    /// The worker did not finish in time; the reporter terminated
    Forced,
    /// No running supervisor; terminated immediately
    Direct,
}

/// Lets exactly one caller reach the terminator
struct TerminateGate {
    fired: AtomicBool,
    terminator: Arc<dyn Terminator>,
}

impl TerminateGate {
    fn fire(&self, code: i32) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.terminator.terminate(code);
        true
    }
}

type SupervisorProvider = Arc<dyn Fn() -> Result<Arc<Supervisor>, SupervisorError> + Send + Sync>;

pub struct FatalErrorPath {
    guard: Mutex<FatalState>,
    gate: Arc<TerminateGate>,
    supervisor: SupervisorProvider,
    timeout: Duration,
}

impl FatalErrorPath {
    pub fn new<P>(supervisor: P, terminator: Arc<dyn Terminator>, timeout: Duration) -> Self
    where
        P: Fn() -> Result<Arc<Supervisor>, SupervisorError> + Send + Sync + 'static,
    {
        Self {
            guard: Mutex::new(FatalState::Normal),
            gate: Arc::new(TerminateGate {
                fired: AtomicBool::new(false),
                terminator,
            }),
            supervisor: Arc::new(supervisor),
            timeout,
        }
    }

    /// Fatal path bound to the process-wide supervisor
    pub fn for_process(timeout: Duration) -> Self {
        Self::new(supervisor::instance, Arc::new(ProcessTerminator), timeout)
    }

    pub fn state(&self) -> FatalState {
        *self.guard.lock()
    }

    /// Report an unrecoverable failure. Safe to call from any thread,
    /// including from inside a handler or a lifecycle hook.
    pub fn report(&self, message: &str, cause: Option<&dyn fmt::Display>) -> FatalOutcome {
        {
            let mut state = self.guard.lock();
            if *state != FatalState::Normal {
                tracing::warn!(
                    target: LOG_TARGET,
                    "Fatal error while shutdown is already in progress: {}",
                    message
                );
                return FatalOutcome::Ignored;
            }
            *state = FatalState::ShuttingDown;
        }

        match cause {
            Some(cause) => tracing::error!(target: LOG_TARGET, "FATAL: {}: {}", message, cause),
            None => tracing::error!(target: LOG_TARGET, "FATAL: {}", message),
        }

        let outcome = match (self.supervisor)() {
            Ok(supervisor) if supervisor.is_running() => self.shutdown_on_worker(supervisor),
            Ok(_) => {
                tracing::info!(target: LOG_TARGET, "Supervisor not running, terminating");
                self.terminate_directly()
            }
            Err(err) => {
                tracing::info!(target: LOG_TARGET, "{}, terminating", err);
                self.terminate_directly()
            }
        };

        *self.guard.lock() = FatalState::Terminated;
        outcome
    }

    fn terminate_directly(&self) -> FatalOutcome {
        self.gate.fire(FATAL_EXIT_CODE);
        FatalOutcome::Direct
    }

    fn shutdown_on_worker(&self, supervisor: Arc<Supervisor>) -> FatalOutcome {
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        let gate = Arc::clone(&self.gate);

        let spawned = thread::Builder::new()
            .name("lyra-fatal-shutdown".to_string())
            .spawn(move || {
                if let Err(payload) = utils::contain(|| supervisor.stop()) {
                    tracing::error!(
                        target: LOG_TARGET,
                        "Supervisor stop panicked: {}",
                        utils::panic_message(payload.as_ref())
                    );
                }
                gate.fire(FATAL_EXIT_CODE);
                let _ = done_tx.send(());
            });

        if let Err(err) = spawned {
            tracing::error!(target: LOG_TARGET, "Failed to spawn shutdown worker: {}", err);
            return self.terminate_directly();
        }

        match done_rx.recv_timeout(self.timeout) {
            Ok(()) => FatalOutcome::Graceful,
            Err(RecvTimeoutError::Timeout) => {
                tracing::error!(
                    target: LOG_TARGET,
                    "Shutdown did not finish within {:?}, forcing exit",
                    self.timeout
                );
                self.gate.fire(FATAL_EXIT_CODE);
                FatalOutcome::Forced
            }
            Err(RecvTimeoutError::Disconnected) => {
                tracing::error!(target: LOG_TARGET, "Shutdown worker vanished, forcing exit");
                self.gate.fire(FATAL_EXIT_CODE);
                FatalOutcome::Forced
            }
        }
    }
}

static PROCESS_PATH: OnceLock<FatalErrorPath> = OnceLock::new();

/// Set the bounded wait of the process-wide fatal path.
///
/// Returns false if the path was already created.
pub fn configure(timeout: Duration) -> bool {
    PROCESS_PATH
        .set(FatalErrorPath::for_process(timeout))
        .is_ok()
}

/// Process-wide entry point
pub fn report_fatal_error(message: &str, cause: Option<&dyn fmt::Display>) -> FatalOutcome {
    PROCESS_PATH
        .get_or_init(|| FatalErrorPath::for_process(SHUTDOWN_TIMEOUT))
        .report(message, cause)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::module::{Module, ModuleCatalog, ModuleContext};
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    #[derive(Default)]
    struct RecordingTerminator {
        calls: Mutex<Vec<i32>>,
    }

    impl Terminator for RecordingTerminator {
        fn terminate(&self, code: i32) {
            self.calls.lock().push(code);
        }
    }

    struct Counted {
        stops: Arc<AtomicUsize>,
        stall: Duration,
    }

    impl Module for Counted {
        fn stop(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.stall);
            Ok(())
        }
    }

    fn running_supervisor(stops: &Arc<AtomicUsize>, stall: Duration) -> Arc<Supervisor> {
        let stops = Arc::clone(stops);
        let mut catalog = ModuleCatalog::new();
        catalog.register("app", "counted", move || {
            Arc::new(Counted {
                stops: Arc::clone(&stops),
                stall,
            })
        });
        let supervisor = Arc::new(Supervisor::with_catalog(&catalog, "app").unwrap());
        supervisor.start().unwrap();
        supervisor
    }

    fn path_for(
        supervisor: Option<Arc<Supervisor>>,
        terminator: &Arc<RecordingTerminator>,
        timeout: Duration,
    ) -> FatalErrorPath {
        FatalErrorPath::new(
            move || supervisor.clone().ok_or(SupervisorError::NotInitialized),
            Arc::clone(terminator) as Arc<dyn Terminator>,
            timeout,
        )
    }

    #[test]
    fn test_graceful_shutdown_stops_supervisor() {
        let stops = Arc::new(AtomicUsize::new(0));
        let supervisor = running_supervisor(&stops, Duration::ZERO);
        let terminator = Arc::new(RecordingTerminator::default());
        let path = path_for(Some(Arc::clone(&supervisor)), &terminator, SHUTDOWN_TIMEOUT);

        let cause = "allocation failed";
        assert_eq!(
            path.report("decoder exhausted memory", Some(&cause)),
            FatalOutcome::Graceful
        );
        assert!(!supervisor.is_running());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(*terminator.calls.lock(), vec![FATAL_EXIT_CODE]);
        assert_eq!(path.state(), FatalState::Terminated);
    }

    #[test]
    fn test_concurrent_reports_shut_down_once() {
        let stops = Arc::new(AtomicUsize::new(0));
        let supervisor = running_supervisor(&stops, Duration::from_millis(50));
        let terminator = Arc::new(RecordingTerminator::default());
        let path = Arc::new(path_for(Some(supervisor), &terminator, SHUTDOWN_TIMEOUT));

        let started = Instant::now();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let path = Arc::clone(&path);
                thread::spawn(move || path.report(&format!("worker {} failed", i), None))
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(started.elapsed() < SHUTDOWN_TIMEOUT + Duration::from_secs(1));
        assert_eq!(
            outcomes.iter().filter(|o| **o != FatalOutcome::Ignored).count(),
            1
        );
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(terminator.calls.lock().len(), 1);
    }

    #[test]
    fn test_hung_shutdown_is_forced_after_timeout() {
        let stops = Arc::new(AtomicUsize::new(0));
        let supervisor = running_supervisor(&stops, Duration::from_millis(500));
        let terminator = Arc::new(RecordingTerminator::default());
        let path = path_for(Some(supervisor), &terminator, Duration::from_millis(50));

        let started = Instant::now();
        assert_eq!(path.report("hung", None), FatalOutcome::Forced);
        assert!(started.elapsed() < Duration::from_millis(450));
        assert_eq!(terminator.calls.lock().len(), 1);

        // The worker finishing later must not terminate a second time
        thread::sleep(Duration::from_millis(700));
        assert_eq!(terminator.calls.lock().len(), 1);
    }

    #[test]
    fn test_missing_supervisor_terminates_directly() {
        let terminator = Arc::new(RecordingTerminator::default());
        let path = path_for(None, &terminator, SHUTDOWN_TIMEOUT);

        assert_eq!(path.report("no runtime", None), FatalOutcome::Direct);
        assert_eq!(*terminator.calls.lock(), vec![FATAL_EXIT_CODE]);
        assert_eq!(path.report("again", None), FatalOutcome::Ignored);
        assert_eq!(terminator.calls.lock().len(), 1);
    }

    #[test]
    fn test_stopped_supervisor_terminates_directly() {
        let stops = Arc::new(AtomicUsize::new(0));
        let supervisor = running_supervisor(&stops, Duration::ZERO);
        supervisor.stop();
        let terminator = Arc::new(RecordingTerminator::default());
        let path = path_for(Some(supervisor), &terminator, SHUTDOWN_TIMEOUT);

        assert_eq!(path.report("late", None), FatalOutcome::Direct);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }
}
