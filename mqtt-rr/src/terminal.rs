//! Keyboard transport controls for the replay tool.
//!
//! While playing, only interrupts (Ctrl-C delivered as a signal) are read. While
//! halted, the terminal is switched to raw mode so single key presses can be
//! read without waiting for enter. In raw mode Ctrl-C arrives as a key press
//! and is treated as a second interrupt.

use crossbeam::channel::Receiver;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use mqtt_rr_core::{ControlEvent, Controls};
use std::io::{self, Write};
use std::time::Duration;

const KEY_POLL_INTERVAL: Duration = Duration::from_millis(50);

const KEY_HELP: &[&str] = &[
    "  <space>       to play again",
    "  <right arrow> to skip forwards",
    "  <left arrow>  to skip backwards",
    "  <up arrow>    to start from beginning",
    "  q             to quit",
    "  Ctrl-C        to exit",
];

/// Map a key press to a transport event
pub fn map_key(key: &KeyEvent) -> Option<ControlEvent> {
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(ControlEvent::Interrupt)
        }
        KeyCode::Char(' ') => Some(ControlEvent::Resume),
        KeyCode::Right => Some(ControlEvent::SkipForward),
        KeyCode::Left => Some(ControlEvent::SkipBackward),
        KeyCode::Up => Some(ControlEvent::Restart),
        KeyCode::Char('q') | KeyCode::Char('Q') => Some(ControlEvent::Quit),
        _ => None,
    }
}

/// [`Controls`] reading interrupts from a signal channel and keys from the terminal
pub struct TerminalControls {
    signals: Receiver<ControlEvent>,
}

impl TerminalControls {
    pub fn new(signals: Receiver<ControlEvent>) -> Self {
        Self { signals }
    }

    fn pending_signal(&self) -> Option<ControlEvent> {
        self.signals.try_recv().ok()
    }
}

impl Controls for TerminalControls {
    fn poll(&mut self) -> Option<ControlEvent> {
        self.pending_signal()
    }

    fn wait_halted(&mut self) -> io::Result<ControlEvent> {
        print_help("Playback halted, use:")?;
        let _raw = RawMode::enable()?;

        loop {
            if let Some(event) = self.pending_signal() {
                return Ok(event);
            }
            if !event::poll(KEY_POLL_INTERVAL)? {
                continue;
            }
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match map_key(&key) {
                    Some(event) => return Ok(event),
                    None => print_help("Unknown key, use:")?,
                }
            }
        }
    }
}

/// Raw terminal mode, restored on drop
struct RawMode;

impl RawMode {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Lines end in `\r\n` since this may be printed in raw mode
fn print_help(header: &str) -> io::Result<()> {
    let mut out = io::stdout().lock();
    write!(out, "{}\r\n", header)?;
    for line in KEY_HELP {
        write!(out, "{}\r\n", line)?;
    }
    out.flush()
}
