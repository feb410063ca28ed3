use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Directive from the interactive operator, polled once per iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlSignal {
    #[default]
    Continue,
    Restart,
    Quit,
}

impl ControlSignal {
    fn as_u8(self) -> u8 {
        match self {
            Self::Continue => 0,
            Self::Restart => 1,
            Self::Quit => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Restart,
            2 => Self::Quit,
            _ => Self::Continue,
        }
    }

    /// Map a key or typed word to a signal: `q`/`quit`, `r`/`restart`.
    pub fn from_key(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "q" | "quit" => Some(Self::Quit),
            "r" | "restart" => Some(Self::Restart),
            _ => None,
        }
    }
}

/// Non-blocking producer of control signals.
pub trait ControlSource: Send {
    /// Absence of input is `Continue`.
    fn poll(&mut self) -> ControlSignal;
}

/// Shared latch written by any number of input threads and polled by the loop.
///
/// Restart is consumed by the poll that observes it. Quit is sticky and
/// overrides a pending restart.
#[derive(Debug, Clone, Default)]
pub struct SignalLatch {
    state: Arc<AtomicU8>,
}

impl SignalLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_restart(&self) {
        // Never downgrade a pending quit.
        let _ = self.state.compare_exchange(
            ControlSignal::Continue.as_u8(),
            ControlSignal::Restart.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn request_quit(&self) {
        self.state
            .store(ControlSignal::Quit.as_u8(), Ordering::Release);
    }

    pub fn send(&self, signal: ControlSignal) {
        match signal {
            ControlSignal::Continue => {}
            ControlSignal::Restart => self.request_restart(),
            ControlSignal::Quit => self.request_quit(),
        }
    }

    pub fn quit_requested(&self) -> bool {
        self.peek() == ControlSignal::Quit
    }

    pub fn peek(&self) -> ControlSignal {
        ControlSignal::from_u8(self.state.load(Ordering::Acquire))
    }
}

impl ControlSource for SignalLatch {
    fn poll(&mut self) -> ControlSignal {
        let restart = ControlSignal::Restart.as_u8();
        match self.state.compare_exchange(
            restart,
            ControlSignal::Continue.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => ControlSignal::Restart,
            Err(current) => ControlSignal::from_u8(current),
        }
    }
}

/// A source that never asks for anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSignals;

impl ControlSource for NoSignals {
    fn poll(&mut self) -> ControlSignal {
        ControlSignal::Continue
    }
}
