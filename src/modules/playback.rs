use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::messaging::{
    Event, EventBus, LyricsLoaded, NextLyricLine, PlaybackFinished, PlaybackStarted,
};
use crate::runtime::{Module, ModuleContext};

const LOG_TARGET: &str = "lyra::playback";

#[derive(Debug, Clone, PartialEq)]
pub struct TimedLine {
    pub at: Duration,
    pub text: String,
}

impl TimedLine {
    pub fn new(at_ms: u64, text: impl Into<String>) -> Self {
        Self {
            at: Duration::from_millis(at_ms),
            text: text.into(),
        }
    }
}

enum ClockCommand {
    Stop,
}

/// Plays a track's lyric timeline on a timer thread
pub struct PlaybackClock {
    track: String,
    lines: Vec<TimedLine>,
    clock_thread: Mutex<Option<thread::JoinHandle<()>>>,
    clock_cmd_tx: Mutex<Option<Sender<ClockCommand>>>,
}

impl PlaybackClock {
    pub fn new(track: impl Into<String>, lines: Vec<TimedLine>) -> Self {
        Self {
            track: track.into(),
            lines,
            clock_thread: Mutex::new(None),
            clock_cmd_tx: Mutex::new(None),
        }
    }

    /// Short built-in timeline used by the binary
    pub fn demo() -> Self {
        Self::new(
            "Demo Track",
            vec![
                TimedLine::new(200, "First light on the water"),
                TimedLine::new(500, "Hold the line until it breaks"),
                TimedLine::new(800, "And then we sing it back"),
                TimedLine::new(1100, "(instrumental)"),
            ],
        )
    }

    pub fn track(&self) -> &str {
        &self.track
    }

    pub fn is_playing(&self) -> bool {
        self.clock_thread
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn shutdown_clock(&self) {
        if let Some(tx) = self.clock_cmd_tx.lock().take() {
            let _ = tx.send(ClockCommand::Stop);
        }
        if let Some(handle) = self.clock_thread.lock().take() {
            if handle.join().is_err() {
                tracing::warn!(target: LOG_TARGET, "Playback clock thread panicked");
            }
        }
    }
}

impl Module for PlaybackClock {
    fn start(&self, ctx: &ModuleContext) -> anyhow::Result<()> {
        self.shutdown_clock();

        let (cmd_tx, cmd_rx) = unbounded();
        let bus = ctx.bus().clone();
        let track = self.track.clone();
        let lines = self.lines.clone();

        let handle = thread::Builder::new()
            .name("lyra-playback".to_string())
            .spawn(move || run_clock(&bus, &track, &lines, &cmd_rx))
            .context("Failed to spawn playback clock")?;

        *self.clock_cmd_tx.lock() = Some(cmd_tx);
        *self.clock_thread.lock() = Some(handle);
        Ok(())
    }

    fn stop(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        self.shutdown_clock();
        Ok(())
    }
}

fn run_clock(bus: &EventBus, track: &str, lines: &[TimedLine], cmd_rx: &Receiver<ClockCommand>) {
    let started = Instant::now();
    emit(
        bus,
        LyricsLoaded {
            title: track.to_string(),
            line_count: lines.len(),
        },
    );
    emit(
        bus,
        PlaybackStarted {
            track: track.to_string(),
        },
    );

    for (index, line) in lines.iter().enumerate() {
        let wait = line.at.saturating_sub(started.elapsed());
        match cmd_rx.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(ClockCommand::Stop) | Err(RecvTimeoutError::Disconnected) => {
                tracing::debug!(target: LOG_TARGET, "Playback of {} interrupted", track);
                return;
            }
        }

        emit(
            bus,
            NextLyricLine {
                index,
                text: line.text.clone(),
                timestamp_ms: line.at.as_millis() as u64,
            },
        );
    }

    emit(
        bus,
        PlaybackFinished {
            track: track.to_string(),
        },
    );
}

fn emit<E: Event>(bus: &EventBus, event: E) {
    if let Err(err) = bus.publish(event) {
        tracing::warn!(target: LOG_TARGET, "Playback event rejected: {}", err);
    }
}

impl std::fmt::Debug for PlaybackClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackClock")
            .field("track", &self.track)
            .field("lines", &self.lines.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::events::{NEXT_LYRIC_LINE, PLAYBACK_EVENT};
    use crate::messaging::Registrar;

    fn recording_bus() -> (EventBus, Receiver<String>) {
        let bus = EventBus::new();
        let (tx, rx) = unbounded();
        let mut registrar = Registrar::new("recorder");
        let lines_tx = tx.clone();
        registrar
            .on_kind("line", &NEXT_LYRIC_LINE, move |event| {
                let line = event.downcast_ref::<NextLyricLine>().unwrap();
                let _ = lines_tx.send(format!("line:{}", line.index));
                Ok(())
            })
            .on_kind("playback", &PLAYBACK_EVENT, move |event| {
                let _ = tx.send(event.kind().name().to_string());
                Ok(())
            });
        bus.register_module(registrar).unwrap();
        (bus, rx)
    }

    #[test]
    fn test_timeline_plays_to_the_end() {
        let (bus, rx) = recording_bus();
        let clock = PlaybackClock::new("t", vec![TimedLine::new(0, "a"), TimedLine::new(10, "b")]);
        let ctx = ModuleContext::new("playback", bus);

        clock.start(&ctx).unwrap();
        let received: Vec<String> = (0..4)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(
            received,
            vec!["PlaybackStarted", "line:0", "line:1", "PlaybackFinished"]
        );
        clock.stop(&ctx).unwrap();
        assert!(!clock.is_playing());
    }

    #[test]
    fn test_stop_interrupts_the_clock() {
        let (bus, rx) = recording_bus();
        let clock = PlaybackClock::new("t", vec![TimedLine::new(10_000, "never")]);
        let ctx = ModuleContext::new("playback", bus);

        clock.start(&ctx).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "PlaybackStarted");

        let started = Instant::now();
        clock.stop(&ctx).unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!clock.is_playing());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let clock = PlaybackClock::demo();
        clock
            .stop(&ModuleContext::new("playback", EventBus::new()))
            .unwrap();
        assert_eq!(clock.track(), "Demo Track");
    }
}
