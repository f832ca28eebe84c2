use std::sync::Arc;

use parking_lot::Mutex;

use crate::messaging::{LyricsLoaded, NextLyricLine, PlaybackFinished, Registrar};
use crate::runtime::Module;

const LOG_TARGET: &str = "lyra::lyrics";

/// What the lyrics view currently shows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LyricsView {
    pub title: Option<String>,
    pub line_count: usize,
    pub current: Option<String>,
    pub lines_shown: usize,
}

/// Renders the current lyric line
#[derive(Debug, Default)]
pub struct LyricsDisplay {
    view: Mutex<LyricsView>,
}

impl LyricsDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self) -> LyricsView {
        self.view.lock().clone()
    }

    fn on_loaded(&self, event: &LyricsLoaded) -> anyhow::Result<()> {
        let mut view = self.view.lock();
        *view = LyricsView {
            title: Some(event.title.clone()),
            line_count: event.line_count,
            ..LyricsView::default()
        };
        tracing::info!(
            target: LOG_TARGET,
            "Loaded lyrics for {} ({} lines)",
            event.title,
            event.line_count
        );
        Ok(())
    }

    fn on_next_line(&self, event: &NextLyricLine) -> anyhow::Result<()> {
        if event.text.trim().is_empty() {
            anyhow::bail!("lyric line {} is empty", event.index);
        }

        let mut view = self.view.lock();
        view.current = Some(event.text.clone());
        view.lines_shown += 1;
        tracing::info!(
            target: LOG_TARGET,
            "[{:>6}ms] {}",
            event.timestamp_ms,
            event.text
        );
        Ok(())
    }

    fn on_finished(&self, _event: &PlaybackFinished) -> anyhow::Result<()> {
        self.view.lock().current = None;
        Ok(())
    }
}

impl Module for LyricsDisplay {
    fn register_handlers(self: Arc<Self>, registrar: &mut Registrar) {
        let loaded = Arc::clone(&self);
        let next = Arc::clone(&self);
        registrar
            .on::<LyricsLoaded, _>("on_lyrics_loaded", move |event| loaded.on_loaded(event))
            .on::<NextLyricLine, _>("on_next_line", move |event| next.on_next_line(event))
            .on::<PlaybackFinished, _>("on_playback_finished", move |event| {
                self.on_finished(event)
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::EventBus;

    fn registered() -> (Arc<LyricsDisplay>, EventBus) {
        let display = Arc::new(LyricsDisplay::new());
        let bus = EventBus::new();
        let mut registrar = Registrar::new("lyrics");
        Arc::clone(&display).register_handlers(&mut registrar);
        bus.register_module(registrar).unwrap();
        (display, bus)
    }

    #[test]
    fn test_lines_update_the_view() {
        let (display, bus) = registered();

        bus.publish(LyricsLoaded {
            title: "Song".to_string(),
            line_count: 2,
        })
        .unwrap();
        bus.publish(NextLyricLine {
            index: 0,
            text: "hello".to_string(),
            timestamp_ms: 100,
        })
        .unwrap();

        let view = display.view();
        assert_eq!(view.title.as_deref(), Some("Song"));
        assert_eq!(view.current.as_deref(), Some("hello"));
        assert_eq!(view.lines_shown, 1);

        bus.publish(PlaybackFinished {
            track: "Song".to_string(),
        })
        .unwrap();
        assert_eq!(display.view().current, None);
    }

    #[test]
    fn test_empty_line_is_rejected_by_handler() {
        let (display, bus) = registered();

        // The handler fails; the bus logs it and reports one delivery
        let delivered = bus
            .publish(NextLyricLine {
                index: 3,
                text: "  ".to_string(),
                timestamp_ms: 0,
            })
            .unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(display.view().lines_shown, 0);
    }
}
