//! Keyboard input dispatcher.
//!
//! Puts the terminal in raw mode and translates key events into the
//! controller's input events: space toggles recording, `q` or Ctrl-C
//! quits. Terminals do not reliably deliver key-release events, so the
//! space bar toggles rather than acting as push-to-talk.

use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use log::{error, info};

use crate::controller::{ControllerEvent, InputEvent};

const POLL: Duration = Duration::from_millis(100);

pub struct InputDispatcher {
    handle: Option<JoinHandle<()>>,
}

impl InputDispatcher {
    /// Start the listener thread. It exits after emitting a quit event
    /// or when the controller side of the queue goes away.
    pub fn spawn(events: Sender<ControllerEvent>) -> Result<Self> {
        terminal::enable_raw_mode()?;
        let handle = thread::spawn(move || {
            info!("keyboard listener started (space: talk, q: quit)");
            let mut recording = false;
            loop {
                match event::poll(POLL) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        error!("input poll failed: {}", e);
                        break;
                    }
                }
                let Ok(Event::Key(key)) = event::read() else {
                    continue;
                };
                if key.kind == KeyEventKind::Release {
                    continue;
                }
                match key.code {
                    KeyCode::Char(' ') => {
                        recording = !recording;
                        let input = if recording { InputEvent::RecordStart } else { InputEvent::RecordStop };
                        if events.send(ControllerEvent::Input(input)).is_err() {
                            break;
                        }
                    }
                    KeyCode::Char('q') | KeyCode::Esc => {
                        let _ = events.send(ControllerEvent::Input(InputEvent::Quit));
                        break;
                    }
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        let _ = events.send(ControllerEvent::Input(InputEvent::Quit));
                        break;
                    }
                    _ => {}
                }
            }
            if let Err(e) = terminal::disable_raw_mode() {
                error!("failed to restore terminal: {}", e);
            }
            info!("keyboard listener stopped");
        });
        Ok(Self { handle: Some(handle) })
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
