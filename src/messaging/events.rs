/// Event types for the runtime
///
/// Events represent things that have happened (past tense).
/// Every event carries a kind descriptor; kinds form a single tree rooted at
/// [`BASE_EVENT`], and a handler registered for a kind receives every event
/// of that kind or of any descendant kind.
use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Node of the event kind tree.
///
/// Kinds are declared as `static` items and compared by address, so two
/// kinds with the same name are still distinct.
pub struct EventKind {
    name: &'static str,
    parent: Option<&'static EventKind>,
}

impl EventKind {
    /// Declare a tree root. Only [`BASE_EVENT`] should be a root; events of
    /// any other root are rejected by the bus.
    pub const fn root(name: &'static str) -> Self {
        Self { name, parent: None }
    }

    /// Declare a kind nested under `parent`
    pub const fn child(name: &'static str, parent: &'static EventKind) -> Self {
        Self {
            name,
            parent: Some(parent),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn parent(&self) -> Option<&'static EventKind> {
        self.parent
    }

    /// True if `ancestor` is this kind or one of its ancestors
    pub fn is_a(&self, ancestor: &EventKind) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if std::ptr::eq(kind, ancestor) {
                return true;
            }
            current = kind.parent;
        }
        false
    }

    /// Walk from this kind up to its root, self first
    pub fn lineage(&'static self) -> impl Iterator<Item = &'static EventKind> {
        std::iter::successors(Some(self), |kind| kind.parent)
    }

    /// True if the kind belongs to the runtime's event tree
    pub fn is_rooted(&self) -> bool {
        self.is_a(&BASE_EVENT)
    }
}

impl PartialEq for EventKind {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for EventKind {}

impl Hash for EventKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self as *const EventKind as usize).hash(state);
    }
}

impl fmt::Debug for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

pub static BASE_EVENT: EventKind = EventKind::root("BaseEvent");

pub static LYRICS_EVENT: EventKind = EventKind::child("LyricsEvent", &BASE_EVENT);
pub static LYRICS_LOADED: EventKind = EventKind::child("LyricsLoaded", &LYRICS_EVENT);
pub static NEXT_LYRIC_LINE: EventKind = EventKind::child("NextLyricLine", &LYRICS_EVENT);

pub static PLAYBACK_EVENT: EventKind = EventKind::child("PlaybackEvent", &BASE_EVENT);
pub static PLAYBACK_STARTED: EventKind = EventKind::child("PlaybackStarted", &PLAYBACK_EVENT);
pub static PLAYBACK_FINISHED: EventKind = EventKind::child("PlaybackFinished", &PLAYBACK_EVENT);
pub static PLAYBACK_ERROR: EventKind = EventKind::child("PlaybackError", &PLAYBACK_EVENT);

pub static LIFECYCLE_EVENT: EventKind = EventKind::child("LifecycleEvent", &BASE_EVENT);
pub static SUPERVISOR_STARTED: EventKind =
    EventKind::child("SupervisorStarted", &LIFECYCLE_EVENT);
pub static SUPERVISOR_STOPPING: EventKind =
    EventKind::child("SupervisorStopping", &LIFECYCLE_EVENT);

pub static ERROR_EVENT: EventKind = EventKind::child("ErrorEvent", &BASE_EVENT);

/// Payload broadcast through the bus.
///
/// Implement with [`impl_event!`](crate::impl_event) unless the type needs a
/// custom `validate` or `description`.
pub trait Event: Any + Send + Sync + fmt::Debug {
    /// Runtime kind of this event
    fn kind(&self) -> &'static EventKind;

    fn as_any(&self) -> &dyn Any;

    /// Reject malformed payloads before dispatch
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    /// Get a human-readable description of the event
    fn description(&self) -> String {
        self.kind().name().to_string()
    }

    /// View this payload as the payload of `kind`, one of its own kind's
    /// ancestors. Events that embed their parent's payload return it here so
    /// handlers typed on the parent still receive them.
    fn as_ancestor(&self, kind: &'static EventKind) -> Option<&dyn Any> {
        std::ptr::eq(self.kind(), kind).then(|| self.as_any())
    }
}

/// Event type whose kind is known statically, used to infer a handler's
/// declared kind from its parameter type.
pub trait TypedEvent: Event + Sized {
    fn static_kind() -> &'static EventKind;
}

impl dyn Event {
    /// Downcast to a concrete event type
    pub fn downcast_ref<T: Event>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn is<T: Event>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// The `T` payload carried by this event, if its kind descends from `T`'s
    /// and the payload can be viewed as a `T`
    pub fn project<T: TypedEvent>(&self) -> Option<&T> {
        self.as_ancestor(T::static_kind())?.downcast_ref::<T>()
    }
}

/// Implement [`Event`] and [`TypedEvent`] for a payload type bound to a
/// static kind.
///
/// A payload that embeds its parent kind's payload names that field with
/// `extends`, so handlers typed on the parent receive it too.
///
/// ```rust,ignore
/// pub static TRACK_SKIPPED: EventKind = EventKind::child("TrackSkipped", &PLAYBACK_EVENT);
///
/// #[derive(Debug, Clone)]
/// pub struct TrackSkipped { pub track: String }
///
/// lyra::impl_event!(TrackSkipped => TRACK_SKIPPED);
///
/// pub static DISK_ERROR: EventKind = EventKind::child("DiskError", &PLAYBACK_ERROR);
///
/// #[derive(Debug, Clone)]
/// pub struct DiskError { pub base: PlaybackError, pub device: String }
///
/// lyra::impl_event!(DiskError => DISK_ERROR, extends base);
/// ```
#[macro_export]
macro_rules! impl_event {
    ($ty:ty => $kind:path, extends $field:ident) => {
        impl $crate::messaging::events::Event for $ty {
            fn kind(&self) -> &'static $crate::messaging::events::EventKind {
                &$kind
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn as_ancestor(
                &self,
                kind: &'static $crate::messaging::events::EventKind,
            ) -> ::std::option::Option<&dyn ::std::any::Any> {
                if ::std::ptr::eq(kind, &$kind) {
                    ::std::option::Option::Some(self as &dyn ::std::any::Any)
                } else {
                    $crate::messaging::events::Event::as_ancestor(&self.$field, kind)
                }
            }
        }

        impl $crate::messaging::events::TypedEvent for $ty {
            fn static_kind() -> &'static $crate::messaging::events::EventKind {
                &$kind
            }
        }
    };
    ($ty:ty => $kind:path) => {
        impl $crate::messaging::events::Event for $ty {
            fn kind(&self) -> &'static $crate::messaging::events::EventKind {
                &$kind
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }
        }

        impl $crate::messaging::events::TypedEvent for $ty {
            fn static_kind() -> &'static $crate::messaging::events::EventKind {
                &$kind
            }
        }
    };
}

/// Lyrics were loaded for the current track
#[derive(Debug, Clone, PartialEq)]
pub struct LyricsLoaded {
    pub title: String,
    pub line_count: usize,
}

crate::impl_event!(LyricsLoaded => LYRICS_LOADED);

/// The playback position reached a new lyric line
#[derive(Debug, Clone, PartialEq)]
pub struct NextLyricLine {
    pub index: usize,
    pub text: String,
    pub timestamp_ms: u64,
}

crate::impl_event!(NextLyricLine => NEXT_LYRIC_LINE);

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackStarted {
    pub track: String,
}

crate::impl_event!(PlaybackStarted => PLAYBACK_STARTED);

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackFinished {
    pub track: String,
}

crate::impl_event!(PlaybackFinished => PLAYBACK_FINISHED);

/// Playback failed; the message is shown to the user as-is
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackError {
    pub message: String,
}

impl PlaybackError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

crate::impl_event!(PlaybackError => PLAYBACK_ERROR);

/// All modules finished their start hooks
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorStarted {
    pub modules: Vec<String>,
}

crate::impl_event!(SupervisorStarted => SUPERVISOR_STARTED);

/// The supervisor is about to run stop hooks
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorStopping;

crate::impl_event!(SupervisorStopping => SUPERVISOR_STOPPING);

/// Generic error report, published for non-fatal uncaught panics
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEvent {
    pub message: String,
    pub cause: Option<String>,
    pub fatal: bool,
}

impl ErrorEvent {
    pub fn non_fatal(message: impl Into<String>, cause: Option<String>) -> Self {
        Self {
            message: message.into(),
            cause,
            fatal: false,
        }
    }
}

impl Event for ErrorEvent {
    fn kind(&self) -> &'static EventKind {
        &ERROR_EVENT
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn validate(&self) -> Result<(), String> {
        if self.message.trim().is_empty() {
            return Err("error event without a message".to_string());
        }
        Ok(())
    }

    fn description(&self) -> String {
        match &self.cause {
            Some(cause) => format!("Error: {} ({})", self.message, cause),
            None => format!("Error: {}", self.message),
        }
    }
}

impl TypedEvent for ErrorEvent {
    fn static_kind() -> &'static EventKind {
        &ERROR_EVENT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static ORPHAN_ROOT: EventKind = EventKind::root("OrphanRoot");
    static ORPHAN_LEAF: EventKind = EventKind::child("OrphanLeaf", &ORPHAN_ROOT);

    #[test]
    fn test_kind_ancestry() {
        assert!(NEXT_LYRIC_LINE.is_a(&NEXT_LYRIC_LINE));
        assert!(NEXT_LYRIC_LINE.is_a(&LYRICS_EVENT));
        assert!(NEXT_LYRIC_LINE.is_a(&BASE_EVENT));
        assert!(!NEXT_LYRIC_LINE.is_a(&PLAYBACK_EVENT));
        assert!(!LYRICS_EVENT.is_a(&NEXT_LYRIC_LINE));
    }

    #[test]
    fn test_lineage_walks_to_root() {
        let names: Vec<_> = PLAYBACK_ERROR.lineage().map(|k| k.name()).collect();
        assert_eq!(names, vec!["PlaybackError", "PlaybackEvent", "BaseEvent"]);
    }

    #[test]
    fn test_foreign_tree_is_not_rooted() {
        assert!(ERROR_EVENT.is_rooted());
        assert!(!ORPHAN_LEAF.is_rooted());
        assert_ne!(ORPHAN_ROOT, BASE_EVENT);
    }

    #[test]
    fn test_downcast() {
        let event: Box<dyn Event> = Box::new(PlaybackError::new("disk read failed"));
        assert!(event.is::<PlaybackError>());
        assert!(event.downcast_ref::<NextLyricLine>().is_none());
        assert_eq!(
            event.downcast_ref::<PlaybackError>().unwrap().message,
            "disk read failed"
        );
        assert_eq!(PlaybackError::static_kind(), &PLAYBACK_ERROR);
    }

    #[test]
    fn test_error_event_validation_and_description() {
        let event = ErrorEvent::non_fatal("worker crashed", Some("thread 'timer'".to_string()));
        assert!(event.validate().is_ok());
        assert!(!event.fatal);
        assert_eq!(event.description(), "Error: worker crashed (thread 'timer')");

        let empty = ErrorEvent::non_fatal("  ", None);
        assert!(empty.validate().is_err());
    }
}
