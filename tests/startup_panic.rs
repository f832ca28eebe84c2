// An unrecoverable panic inside a start hook is a bootstrap failure: the
// supervisor reports it to the caller and the fatal path stays untouched.
// The panic hook is process-wide, so this file holds a single test.

use std::panic;
use std::sync::Arc;

use parking_lot::Mutex;

use lyra::error::SupervisorError;
use lyra::runtime::{Module, ModuleCatalog, ModuleContext, PanicRouter, Supervisor, Unrecoverable};

struct ExhaustedDevice;

impl Module for ExhaustedDevice {
    fn start(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        panic::panic_any(Unrecoverable::new("device pool exhausted"))
    }
}

#[test]
fn test_unrecoverable_start_hook_panic_fails_bootstrap_only() {
    let published: Arc<Mutex<usize>> = Arc::default();
    let escalated: Arc<Mutex<Vec<String>>> = Arc::default();

    let p = Arc::clone(&published);
    let e = Arc::clone(&escalated);
    assert!(PanicRouter::new(
        move |_| {
            *p.lock() += 1;
            true
        },
        move |message, cause| e.lock().push(format!("{}: {}", message, cause)),
    )
    .install());

    let mut catalog = ModuleCatalog::new();
    catalog.register("app", "device", || Arc::new(ExhaustedDevice));
    let supervisor = Supervisor::with_catalog(&catalog, "app").unwrap();

    match supervisor.start().unwrap_err() {
        SupervisorError::ModuleInitialization { module, source } => {
            assert_eq!(module, "device");
            assert!(source.to_string().contains("device pool exhausted"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert!(supervisor.state().is_stopped());
    assert!(escalated.lock().is_empty());
    assert_eq!(*published.lock(), 0);
}
