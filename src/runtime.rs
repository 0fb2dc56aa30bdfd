use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

use crossterm::event::{self, Event as CtEvent, KeyCode, KeyEvent, KeyModifiers};

/// Discrete inputs a running trial understands.
///
/// Raw terminal events are reduced to this set at the source, so the trial
/// loop only ever sees keys from the valid-key set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrialSignal {
    /// The continue key (Space) confirming a gate or notice.
    Continue,
    /// Restart from the results screen.
    Restart,
    /// Abandon the session (Esc or Ctrl-C).
    Quit,
    /// The terminal changed size and needs a redraw.
    Redraw,
    /// One poll interval elapsed with no input.
    Tick { dt_ms: u64 },
}

/// Reduce a raw key press to a trial signal. Keys outside the valid-key
/// set are dropped here and never reach the trial.
pub fn map_key(key: KeyEvent) -> Option<TrialSignal> {
    match key.code {
        KeyCode::Char(' ') => Some(TrialSignal::Continue),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(TrialSignal::Quit)
        }
        KeyCode::Char('r') => Some(TrialSignal::Restart),
        KeyCode::Esc => Some(TrialSignal::Quit),
        _ => None,
    }
}

/// Source of trial signals (keyboard, resize)
pub trait SignalSource: Send + 'static {
    /// Block for up to `timeout` waiting for a signal.
    /// Returns Ok(signal) if one arrives before the timeout, or Err(Timeout) if it expires.
    fn recv_timeout(&self, timeout: Duration) -> Result<TrialSignal, RecvTimeoutError>;
}

/// Production signal source: a reader thread reduces crossterm events as
/// they arrive.
pub struct CrosstermSignalSource {
    rx: Receiver<TrialSignal>,
}

impl CrosstermSignalSource {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();

        std::thread::spawn(move || loop {
            let signal = match event::read() {
                Ok(CtEvent::Key(key)) => map_key(key),
                Ok(CtEvent::Resize(_, _)) => Some(TrialSignal::Redraw),
                Ok(_) => None,
                Err(_) => break,
            };
            if let Some(signal) = signal {
                if tx.send(signal).is_err() {
                    break;
                }
            }
        });

        Self { rx }
    }
}

impl Default for CrosstermSignalSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalSource for CrosstermSignalSource {
    fn recv_timeout(&self, timeout: Duration) -> Result<TrialSignal, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

/// Test signal source for unit tests
pub struct TestSignalSource {
    rx: Receiver<TrialSignal>,
}

impl TestSignalSource {
    pub fn new(rx: Receiver<TrialSignal>) -> Self {
        Self { rx }
    }
}

impl SignalSource for TestSignalSource {
    fn recv_timeout(&self, timeout: Duration) -> Result<TrialSignal, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

/// Drives the trial's cooperative poll loop: blocks up to one poll
/// interval for input, and otherwise reports how much trial time passed.
pub struct Runner<S: SignalSource> {
    source: S,
    tick: Duration,
}

impl<S: SignalSource> Runner<S> {
    pub fn new(source: S, tick: Duration) -> Self {
        Self { source, tick }
    }

    pub fn tick_ms(&self) -> u64 {
        self.tick.as_millis() as u64
    }

    /// The next signal, or a Tick carrying the poll interval on timeout
    pub fn step(&self) -> TrialSignal {
        match self.source.recv_timeout(self.tick) {
            Ok(signal) => signal,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                TrialSignal::Tick {
                    dt_ms: self.tick_ms(),
                }
            }
        }
    }
}
