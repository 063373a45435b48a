//! Pacing scheduler for time-accurate playback.
//!
//! # State machine
//!
//! ```text
//!            ┌──────────┐  landing frame   ┌──────────┐  Interrupt  ┌──────────┐
//!   start ──▶│ Seeking  │─────────────────▶│ Playing  │────────────▶│ Halted   │
//!            └──────────┘                  └──────────┘◀────────────└──────────┘
//!                 ▲  │ end of stream /          │          Resume       │  │
//!                 │  │ end offset               │ end of stream /       │  │ Interrupt,
//!                 │  ▼                          ▼ end offset            │  │ Quit
//!                 │ ┌──────────┐         ┌──────────┐                   │  ▼
//!                 │ │ Finished │◀────────┘          │                   │ ┌──────────┐
//!                 │ └──────────┘                                        │ │ Aborted  │
//!                 └─────────────── Skip / Restart ──────────────────────┘ └──────────┘
//! ```
//!
//! # Timing
//!
//! Seeking ends on a landing frame which is published at once and becomes the
//! anchor `(message timestamp, wall clock)`. Every later frame is due at
//! `anchor wall clock + (timestamp - anchor timestamp) + halt offset`, where
//! the halt offset is the wall-clock time spent halted since the anchor was
//! set. The wait is a poll loop with a short sleep so that control events are
//! seen within one poll interval.

use log::{debug, info, warn};
use std::fmt;
use std::io::{self, Read, Seek};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::cursor::PlaybackCursor;
use crate::frame::Frame;
use crate::message::RecordedMessage;

/// Sleep between clock checks while waiting for a frame to become due
pub const POLL_INTERVAL: Duration = Duration::from_micros(200);

/// Default distance for skip forward/backward
pub const SKIP_MILLIS: i64 = 5000;

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Searching for a start point, nothing is published
    Seeking,
    /// Waiting for and publishing frames in time order
    Playing,
    /// Paused, waiting for an operator decision
    Halted,
    /// End of recording or end offset reached
    Finished,
    /// Exit requested
    Aborted,
}

impl PlaybackState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlaybackState::Finished | PlaybackState::Aborted)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackState::Seeking => write!(f, "seeking"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Halted => write!(f, "halted"),
            PlaybackState::Finished => write!(f, "finished"),
            PlaybackState::Aborted => write!(f, "aborted"),
        }
    }
}

/// Discrete transport events, decoupled from how they were produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Interrupt signal: halts while playing, aborts while halted
    Interrupt,
    Resume,
    SkipForward,
    SkipBackward,
    Restart,
    Quit,
}

/// Source of control events.
pub trait Controls {
    /// Non-blocking check, called on every wait iteration
    fn poll(&mut self) -> Option<ControlEvent>;

    /// Block until the next event while playback is halted
    fn wait_halted(&mut self) -> io::Result<ControlEvent>;
}

/// A single publish that did not go out. Playback carries on after it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Publish to '{topic}' failed: {reason}")]
pub struct PublishError {
    pub topic: String,
    pub reason: String,
}

/// Destination for replayed messages
pub trait Publisher {
    /// Publish and return once the client has accepted the message for dispatch
    fn publish(&mut self, message: &RecordedMessage) -> Result<(), PublishError>;
}

/// Monotonic time source
pub trait Clock {
    /// Time elapsed since an arbitrary, fixed origin
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);
}

/// [`Clock`] backed by [`Instant`] and `thread::sleep`
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Playback settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackSettings {
    /// Relative time of the first frame to play
    pub start_millis: i64,
    /// Stop before any frame later than this relative time
    pub end_millis: Option<i64>,
    /// Distance for skip forward/backward
    pub skip_millis: i64,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            start_millis: 0,
            end_millis: None,
            skip_millis: SKIP_MILLIS,
        }
    }
}

impl PlaybackSettings {
    /// Build from whole seconds, where an end of 0 means "play to the end"
    pub fn from_seconds(start_sec: u64, end_sec: u64) -> Self {
        Self {
            start_millis: start_sec as i64 * 1000,
            end_millis: (end_sec > 0).then(|| end_sec as i64 * 1000),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Anchor {
    message_millis: i64,
    wallclock: Duration,
}

/// Result of waiting for one frame
enum Pacing {
    /// The frame is due, publish it
    Due,
    /// The cursor moved; the pending frame is dropped
    Repositioned,
    /// Playback aborted
    Stopped,
}

/// Drives a [`PlaybackCursor`] and publishes frames at their original pace.
pub struct PacingScheduler<R, P, C, K>
where
    R: Read + Seek,
    P: Publisher,
    C: Clock,
    K: Controls,
{
    cursor: PlaybackCursor<R>,
    publisher: P,
    clock: C,
    controls: K,
    settings: PlaybackSettings,
    state: PlaybackState,
    anchor: Option<Anchor>,
    halt_offset: Duration,
    halt_started: Option<Duration>,
    published: u64,
    publish_failures: u64,
}

impl<R, P, C, K> PacingScheduler<R, P, C, K>
where
    R: Read + Seek,
    P: Publisher,
    C: Clock,
    K: Controls,
{
    pub fn new(
        cursor: PlaybackCursor<R>,
        publisher: P,
        clock: C,
        controls: K,
        settings: PlaybackSettings,
    ) -> Self {
        Self {
            cursor,
            publisher,
            clock,
            controls,
            settings,
            state: PlaybackState::Seeking,
            anchor: None,
            halt_offset: Duration::ZERO,
            halt_started: None,
            published: 0,
            publish_failures: 0,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Number of frames handed to the publisher successfully
    pub fn published_count(&self) -> u64 {
        self.published
    }

    pub fn publish_failures(&self) -> u64 {
        self.publish_failures
    }

    /// Play until the recording ends, the end offset is reached or an abort
    /// is requested. Returns the terminal state.
    pub fn run(&mut self) -> io::Result<PlaybackState> {
        self.reposition(self.settings.start_millis)?;

        while self.state == PlaybackState::Playing {
            let Some(frame) = self.cursor.read_next()? else {
                info!("End of recording reached");
                self.state = PlaybackState::Finished;
                break;
            };

            if self.past_end(&frame) {
                info!("Requested end time reached");
                self.state = PlaybackState::Finished;
                break;
            }

            match self.wait_until_due(&frame)? {
                Pacing::Due => self.publish(&frame),
                Pacing::Repositioned | Pacing::Stopped => {}
            }
        }

        Ok(self.state)
    }

    /// Seek to `target_millis`, publish the landing frame and re-anchor on it
    fn reposition(&mut self, target_millis: i64) -> io::Result<()> {
        self.state = PlaybackState::Seeking;
        self.halt_offset = Duration::ZERO;
        self.halt_started = None;

        match self.cursor.seek_to_relative_time(target_millis.max(0))? {
            None => {
                info!("End of recording reached");
                self.state = PlaybackState::Finished;
            }
            Some(frame) if self.past_end(&frame) => {
                info!("Requested end time reached");
                self.state = PlaybackState::Finished;
            }
            Some(frame) => {
                self.publish(&frame);
                self.anchor = Some(Anchor {
                    message_millis: frame.message.captured_at_millis,
                    wallclock: self.clock.now(),
                });
                self.state = PlaybackState::Playing;
            }
        }
        Ok(())
    }

    fn wait_until_due(&mut self, frame: &Frame) -> io::Result<Pacing> {
        loop {
            if let Some(event) = self.controls.poll() {
                if let Some(outcome) = self.handle_event(event)? {
                    return Ok(outcome);
                }
            }

            if self.state == PlaybackState::Halted {
                let event = self.controls.wait_halted()?;
                if let Some(outcome) = self.handle_event(event)? {
                    return Ok(outcome);
                }
                continue;
            }

            if self.clock.now() >= self.due_at(frame) {
                return Ok(Pacing::Due);
            }
            self.clock.sleep(POLL_INTERVAL);
        }
    }

    fn handle_event(&mut self, event: ControlEvent) -> io::Result<Option<Pacing>> {
        let position = self.cursor.current_relative_millis();
        let skip = self.settings.skip_millis;

        match (self.state, event) {
            (PlaybackState::Playing, ControlEvent::Interrupt) => {
                self.halt();
                Ok(None)
            }
            (PlaybackState::Halted, ControlEvent::Interrupt) | (_, ControlEvent::Quit) => {
                info!("Exit requested");
                self.state = PlaybackState::Aborted;
                Ok(Some(Pacing::Stopped))
            }
            (PlaybackState::Halted, ControlEvent::Resume) => {
                self.resume();
                Ok(None)
            }
            (PlaybackState::Halted, ControlEvent::SkipForward) => {
                info!("Skipping forward to t={:.2} s", (position + skip) as f64 / 1000.0);
                self.reposition(position + skip)?;
                Ok(Some(Pacing::Repositioned))
            }
            (PlaybackState::Halted, ControlEvent::SkipBackward) => {
                let target = (position - skip).max(0);
                info!("Skipping backward to t={:.2} s", target as f64 / 1000.0);
                self.reposition(target)?;
                Ok(Some(Pacing::Repositioned))
            }
            (PlaybackState::Halted, ControlEvent::Restart) => {
                info!("Restarting from the beginning");
                self.reposition(0)?;
                Ok(Some(Pacing::Repositioned))
            }
            (state, event) => {
                debug!("Ignoring {:?} while {}", event, state);
                Ok(None)
            }
        }
    }

    fn halt(&mut self) {
        info!(
            "Playback halted at t={:.2} s",
            self.cursor.current_relative_millis() as f64 / 1000.0
        );
        self.state = PlaybackState::Halted;
        self.halt_started = Some(self.clock.now());
    }

    fn resume(&mut self) {
        if let Some(started) = self.halt_started.take() {
            let halted_for = self.clock.now().saturating_sub(started);
            self.halt_offset += halted_for;
            debug!(
                "Resuming after {}ms halt, total offset {}ms",
                halted_for.as_millis(),
                self.halt_offset.as_millis()
            );
        }
        info!("Playback resumed");
        self.state = PlaybackState::Playing;
    }

    fn due_at(&self, frame: &Frame) -> Duration {
        match self.anchor {
            Some(anchor) => {
                let since_anchor = frame.message.captured_at_millis - anchor.message_millis;
                anchor.wallclock
                    + Duration::from_millis(since_anchor.max(0) as u64)
                    + self.halt_offset
            }
            None => Duration::ZERO,
        }
    }

    fn past_end(&self, frame: &Frame) -> bool {
        match self.settings.end_millis {
            Some(end) => self.cursor.relative_millis(frame) > end,
            None => false,
        }
    }

    fn publish(&mut self, frame: &Frame) {
        info!(
            "t={:6.2} s, {:6} bytes, topic={}",
            self.cursor.relative_millis(frame) as f64 / 1000.0,
            frame.len,
            frame.message.topic
        );

        match self.publisher.publish(&frame.message) {
            Ok(()) => self.published += 1,
            Err(e) => {
                warn!("{}", e);
                self.publish_failures += 1;
            }
        }
    }
}
