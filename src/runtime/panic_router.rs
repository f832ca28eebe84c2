/// Uncaught panic router
///
/// Installed as the process panic hook. Fatal panics are escalated to the
/// fatal error path; everything else is published on the bus as a non-fatal
/// [`ErrorEvent`] so interested modules can surface it. The previously
/// installed hook runs afterwards.
use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::panic::{self, PanicHookInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;

use crossbeam_channel::Sender;

use super::{fatal, supervisor};
use crate::messaging::ErrorEvent;
use crate::utils;

const LOG_TARGET: &str = "lyra::panic";

/// Panic payload marking an unrecoverable condition.
///
/// ```rust,ignore
/// std::panic::panic_any(Unrecoverable::new("decoder buffer pool exhausted"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unrecoverable {
    reason: String,
}

impl Unrecoverable {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for Unrecoverable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecoverable: {}", self.reason)
    }
}

/// Resource exhaustion messages raised by std and the allocator
const EXHAUSTION_MARKERS: &[&str] = &[
    "out of memory",
    "capacity overflow",
    "memory allocation",
    "stack overflow",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanicClass {
    Fatal,
    NonFatal,
}

/// Classify a panic payload
pub fn classify(payload: &(dyn Any + Send)) -> PanicClass {
    if payload.is::<Unrecoverable>() {
        return PanicClass::Fatal;
    }

    let message = utils::panic_message(payload).to_lowercase();
    if EXHAUSTION_MARKERS.iter().any(|marker| message.contains(marker)) {
        PanicClass::Fatal
    } else {
        PanicClass::NonFatal
    }
}

/// What the router did with a panic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    Escalated,
    Published,
    /// Caught locally by the bus or the supervisor
    Contained,
    /// Raised by a start hook; the supervisor reports it as a start failure
    Bootstrap,
    /// No supervisor to publish on
    Dropped,
}

/// Panic as seen by the router
#[derive(Debug, Clone)]
pub struct PanicReport {
    pub thread: String,
    pub message: String,
    pub location: Option<String>,
    pub class: PanicClass,
    pub contained: bool,
    /// Raised inside a module start hook
    pub startup: bool,
}

impl PanicReport {
    fn from_hook(info: &PanicHookInfo<'_>) -> Self {
        let payload = info.payload();
        Self {
            thread: utils::thread_label(),
            message: utils::panic_message(payload),
            location: info
                .location()
                .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column())),
            class: classify(payload),
            contained: utils::panic_is_contained(),
            startup: utils::panic_in_startup(),
        }
    }

    fn cause(&self) -> String {
        match &self.location {
            Some(location) => format!("panic in thread '{}' at {}", self.thread, location),
            None => format!("panic in thread '{}'", self.thread),
        }
    }
}

type PublishSink = Arc<dyn Fn(ErrorEvent) -> bool + Send + Sync>;
type EscalateSink = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Routes panics to the fatal path or the bus
#[derive(Clone)]
pub struct PanicRouter {
    publish: PublishSink,
    escalate: EscalateSink,
}

impl PanicRouter {
    /// Router with custom sinks; `publish` returns false if the event had
    /// nowhere to go.
    pub fn new<P, E>(publish: P, escalate: E) -> Self
    where
        P: Fn(ErrorEvent) -> bool + Send + Sync + 'static,
        E: Fn(&str, &str) + Send + Sync + 'static,
    {
        Self {
            publish: Arc::new(publish),
            escalate: Arc::new(escalate),
        }
    }

    /// Router bound to the process-wide supervisor and fatal path.
    ///
    /// Error events are published from a relay thread: a handler panicking
    /// inside the panic hook would abort the process.
    pub fn for_process() -> Self {
        Self::new(
            |event| supervisor::instance().is_ok() && relay().send(event).is_ok(),
            |message, cause| {
                fatal::report_fatal_error(message, Some(&cause));
            },
        )
    }

    pub fn route(&self, report: &PanicReport) -> Routing {
        tracing::error!(
            target: LOG_TARGET,
            thread = report.thread.as_str(),
            "Uncaught panic: {} ({})",
            report.message,
            report.location.as_deref().unwrap_or("unknown location")
        );

        match report.class {
            // Bootstrap failures never reach the fatal path
            PanicClass::Fatal if report.startup => Routing::Bootstrap,
            PanicClass::Fatal => {
                (self.escalate)(
                    &format!("Unrecoverable panic in thread '{}'", report.thread),
                    &report.message,
                );
                Routing::Escalated
            }
            PanicClass::NonFatal if report.contained => Routing::Contained,
            PanicClass::NonFatal => {
                let event = ErrorEvent::non_fatal(report.message.clone(), Some(report.cause()));
                if (self.publish)(event) {
                    Routing::Published
                } else {
                    Routing::Dropped
                }
            }
        }
    }

    /// Install as the process panic hook, chaining to the current one.
    ///
    /// Only the first call installs; later calls return false.
    pub fn install(self) -> bool {
        static INSTALLED: AtomicBool = AtomicBool::new(false);
        if INSTALLED.swap(true, Ordering::SeqCst) {
            return false;
        }

        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let report = PanicReport::from_hook(info);
            if !ROUTING.with(Cell::get) {
                ROUTING.with(|routing| routing.set(true));
                self.route(&report);
                ROUTING.with(|routing| routing.set(false));
            }

            // Locally caught panics are reported by whoever caught them
            if !report.contained {
                previous(info);
            }
        }));
        tracing::debug!(target: LOG_TARGET, "Panic router installed");
        true
    }
}

thread_local! {
    /// Set while a panic is being routed on this thread
    static ROUTING: Cell<bool> = const { Cell::new(false) };
}

fn relay() -> &'static Sender<ErrorEvent> {
    static RELAY: OnceLock<Sender<ErrorEvent>> = OnceLock::new();
    RELAY.get_or_init(|| {
        let (tx, rx) = crossbeam_channel::unbounded::<ErrorEvent>();
        let spawned = thread::Builder::new()
            .name("lyra-panic-relay".to_string())
            .spawn(move || {
                for event in rx {
                    match supervisor::instance() {
                        Ok(supervisor) => {
                            if let Err(err) = supervisor.publish(event) {
                                tracing::warn!(target: LOG_TARGET, "Error event rejected: {}", err);
                            }
                        }
                        Err(_) => tracing::debug!(target: LOG_TARGET, "Dropped {:?}", event),
                    }
                }
            });
        if let Err(err) = spawned {
            tracing::warn!(target: LOG_TARGET, "Failed to spawn panic relay: {}", err);
        }
        tx
    })
}

impl fmt::Debug for PanicRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanicRouter").finish_non_exhaustive()
    }
}
