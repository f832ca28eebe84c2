/// Messaging module for typed publish/subscribe
///
/// Modules never hold references to each other; they publish events on the
/// bus and receive events through handlers registered for event kinds.
///
/// ## Architecture
///
/// ```text
/// ┌──────────┐   publish(event)   ┌─────────────┐   kind.is_a(k)   ┌──────────────┐
/// │  Module  │ ─────────────────> │  Event Bus  │ ───────────────> │  Handlers    │
/// │ (any     │                    │ (registry + │                  │ registered   │
/// │  thread) │ <───────────────── │  dispatch)  │                  │ for k        │
/// └──────────┘   reentrant ok     └─────────────┘                  └──────────────┘
/// ```
///
/// Kinds form a tree rooted at `BaseEvent`:
///
/// ```text
/// BaseEvent
///   ├── LyricsEvent    ── LyricsLoaded, NextLyricLine
///   ├── PlaybackEvent  ── PlaybackStarted, PlaybackFinished, PlaybackError
///   ├── LifecycleEvent ── SupervisorStarted, SupervisorStopping
///   └── ErrorEvent
/// ```
///
/// ## Usage
///
/// ```rust,ignore
/// let bus = EventBus::new();
///
/// let mut registrar = Registrar::new("ui");
/// registrar
///     .on::<PlaybackError, _>("show_error", |err| { show(&err.message); Ok(()) })
///     .on_kind("trace", &BASE_EVENT, |event| { trace(event.description()); Ok(()) });
/// bus.register_module(registrar)?;
///
/// bus.publish(PlaybackError::new("disk read failed"))?;
/// ```

pub mod bus;
pub mod events;
pub mod registry;

// Re-export commonly used types
pub use bus::EventBus;
pub use events::{
    ErrorEvent, Event, EventKind, LyricsLoaded, NextLyricLine, PlaybackError, PlaybackFinished,
    PlaybackStarted, SupervisorStarted, SupervisorStopping, TypedEvent,
};
pub use registry::{Listener, ListenerId, Registrar};
