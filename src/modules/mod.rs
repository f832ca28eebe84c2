/// Built-in modules wired by the `lyra` binary
///
/// Small collaborators that exercise the runtime: a playback clock that
/// publishes a lyric timeline, a lyrics view that follows it and a
/// diagnostics module that traces every event.

pub mod diagnostics;
pub mod lyrics;
pub mod playback;

use std::sync::Arc;

use crate::runtime::ModuleCatalog;

pub use diagnostics::Diagnostics;
pub use lyrics::{LyricsDisplay, LyricsView};
pub use playback::{PlaybackClock, TimedLine};

/// Root namespace of the built-in modules
pub const APP_NAMESPACE: &str = "app";

/// Catalog of the built-in modules.
///
/// Diagnostics comes first so it observes the other modules' start events
/// and is stopped last.
pub fn catalog() -> ModuleCatalog {
    let mut catalog = ModuleCatalog::new();
    catalog
        .register("app.diagnostics", "diagnostics", || Arc::new(Diagnostics::new()))
        .register("app.lyrics", "lyrics", || Arc::new(LyricsDisplay::new()))
        .register("app.playback", "playback", || Arc::new(PlaybackClock::demo()));
    catalog
}
