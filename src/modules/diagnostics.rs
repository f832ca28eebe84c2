use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::messaging::events::BASE_EVENT;
use crate::messaging::{ErrorEvent, Event, PlaybackError, Registrar};
use crate::runtime::Module;

const LOG_TARGET: &str = "lyra::diagnostics";

/// Traces every event and keeps the error reports seen so far
#[derive(Debug, Default)]
pub struct Diagnostics {
    seen: AtomicUsize,
    errors: Mutex<Vec<String>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events_seen(&self) -> usize {
        self.seen.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    fn record_error(&self, report: String) {
        tracing::warn!(target: LOG_TARGET, "{}", report);
        self.errors.lock().push(report);
    }
}

impl Module for Diagnostics {
    fn register_handlers(self: Arc<Self>, registrar: &mut Registrar) {
        let trace = Arc::clone(&self);
        let errors = Arc::clone(&self);
        registrar
            .on_kind("trace_event", &BASE_EVENT, move |event| {
                trace.seen.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(target: LOG_TARGET, "{}", event.description());
                Ok(())
            })
            .on::<ErrorEvent, _>("report_error", move |event: &ErrorEvent| {
                errors.record_error(event.description());
                Ok(())
            })
            .on::<PlaybackError, _>("report_playback_error", move |event: &PlaybackError| {
                self.record_error(format!("Playback error: {}", event.message));
                Ok(())
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{EventBus, PlaybackStarted};

    #[test]
    fn test_traces_everything_and_keeps_errors() {
        let diagnostics = Arc::new(Diagnostics::new());
        let bus = EventBus::new();
        let mut registrar = Registrar::new("diagnostics");
        Arc::clone(&diagnostics).register_handlers(&mut registrar);
        bus.register_module(registrar).unwrap();

        bus.publish(PlaybackStarted {
            track: "t".to_string(),
        })
        .unwrap();
        assert_eq!(bus.publish(PlaybackError::new("disk read failed")).unwrap(), 2);
        bus.publish(ErrorEvent::non_fatal("worker panicked", Some("thread 'x'".to_string())))
            .unwrap();

        assert_eq!(diagnostics.events_seen(), 3);
        assert_eq!(
            diagnostics.errors(),
            vec![
                "Playback error: disk read failed".to_string(),
                "Error: worker panicked (thread 'x')".to_string(),
            ]
        );
    }
}
