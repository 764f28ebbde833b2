// event.rs
use std::{
    sync::mpsc::{self, Receiver, RecvTimeoutError},
    thread,
    time::{Duration, Instant},
};

use crossterm::event::{self, Event as CrosstermEvent, KeyEvent, MouseEvent};
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalEvent {
    Resize(u16, u16),
}

#[derive(Debug)]
pub enum Event {
    Tick,
    Input(KeyEvent),
    Mouse(MouseEvent),
    TerminalEvent(TerminalEvent),
}

impl Event {
    fn from_crossterm(event: CrosstermEvent) -> Option<Event> {
        match event {
            CrosstermEvent::Key(e) => Some(Event::Input(e)),
            CrosstermEvent::Mouse(e) => Some(Event::Mouse(e)),
            CrosstermEvent::Resize(w, h) => Some(Event::TerminalEvent(TerminalEvent::Resize(w, h))),
            _ => None,
        }
    }
}

/// Reads terminal input on a background thread and forwards it, plus a
/// periodic `Tick`, over a channel.
pub struct EventHandler {
    receiver: Receiver<Event>,
    #[allow(dead_code)]
    event_thread: thread::JoinHandle<()>,
}

impl EventHandler {
    pub fn new(tick_rate: Duration) -> EventHandler {
        let (sender, receiver) = mpsc::channel();
        let event_thread = thread::spawn(move || {
            let mut last_tick = Instant::now();
            loop {
                let timeout = tick_rate
                    .checked_sub(last_tick.elapsed())
                    .unwrap_or_else(|| Duration::from_secs(0));

                // Poll for a crossterm event.
                match event::poll(timeout) {
                    Ok(true) => match event::read() {
                        Ok(raw) => {
                            if let Some(e) = Event::from_crossterm(raw) {
                                if sender.send(e).is_err() {
                                    break; // receiver gone, the app is shutting down
                                }
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "unable to read terminal event");
                            break;
                        }
                    },
                    Ok(false) => {}
                    Err(e) => {
                        error!(error = %e, "unable to poll for terminal events");
                        break;
                    }
                }

                // If enough time has passed, send a `Tick` event.
                if last_tick.elapsed() >= tick_rate {
                    if sender.send(Event::Tick).is_err() {
                        break;
                    }
                    last_tick = Instant::now();
                }
            }
        });
        EventHandler {
            receiver,
            event_thread,
        }
    }

    /// Next event, or `None` if nothing arrived within `timeout`. Errors once
    /// the input thread has stopped.
    pub fn next(&self, timeout: Duration) -> Result<Option<Event>, RecvTimeoutError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyCode, KeyModifiers};

    #[test]
    fn crossterm_events_are_mapped() {
        let key = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE);
        assert!(matches!(
            Event::from_crossterm(CrosstermEvent::Key(key)),
            Some(Event::Input(k)) if k.code == KeyCode::Char('q')
        ));
        assert!(matches!(
            Event::from_crossterm(CrosstermEvent::Resize(80, 24)),
            Some(Event::TerminalEvent(TerminalEvent::Resize(80, 24)))
        ));
        assert!(Event::from_crossterm(CrosstermEvent::FocusGained).is_none());
    }
}
