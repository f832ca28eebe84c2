use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

thread_local! {
    static CONTAINED_DEPTH: Cell<usize> = const { Cell::new(0) };
    static STARTUP_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Marks the current thread as running code whose panics are caught locally
struct ContainedScope {
    outer_startup: usize,
}

impl ContainedScope {
    /// Plain scopes hide an enclosing startup scope: a handler run from a
    /// start hook is not startup code.
    fn enter(startup: bool) -> Self {
        CONTAINED_DEPTH.with(|depth| depth.set(depth.get() + 1));
        let outer_startup = STARTUP_DEPTH.with(|depth| {
            let outer = depth.get();
            depth.set(if startup { outer + 1 } else { 0 });
            outer
        });
        ContainedScope { outer_startup }
    }
}

impl Drop for ContainedScope {
    fn drop(&mut self) {
        CONTAINED_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
        STARTUP_DEPTH.with(|depth| depth.set(self.outer_startup));
    }
}

/// Run `f`, catching any panic it raises.
///
/// While `f` runs, [`panic_is_contained`] reports true on this thread so the
/// panic router can tell a locally handled panic from an uncaught one.
pub fn contain<R>(f: impl FnOnce() -> R) -> Result<R, Box<dyn Any + Send>> {
    let _scope = ContainedScope::enter(false);
    panic::catch_unwind(AssertUnwindSafe(f))
}

/// [`contain`] for module start hooks. A panic raised here is a bootstrap
/// failure reported by the caller, whatever its payload.
pub fn contain_startup<R>(f: impl FnOnce() -> R) -> Result<R, Box<dyn Any + Send>> {
    let _scope = ContainedScope::enter(true);
    panic::catch_unwind(AssertUnwindSafe(f))
}

/// True while the current thread is inside [`contain`] or [`contain_startup`]
pub fn panic_is_contained() -> bool {
    CONTAINED_DEPTH.with(|depth| depth.get() > 0)
}

/// True while the current thread is inside [`contain_startup`]
pub fn panic_in_startup() -> bool {
    STARTUP_DEPTH.with(|depth| depth.get() > 0)
}

/// Extract a readable message from a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(unrecoverable) =
        payload.downcast_ref::<crate::runtime::panic_router::Unrecoverable>()
    {
        unrecoverable.to_string()
    } else {
        "Box<dyn Any>".to_string()
    }
}

/// Thread name (or id for unnamed threads) for log lines
pub fn thread_label() -> String {
    let current = thread::current();
    match current.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", current.id()),
    }
}
