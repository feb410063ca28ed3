use simloop_core::{ControlSignal, SignalLatch};
use std::io::BufRead;
use std::thread;
use tracing::{debug, info, warn};

/// Read control keys from stdin, one per line, and forward them to the
/// loop's latch. The thread ends on quit or end of input.
pub fn spawn_keyboard(latch: SignalLatch) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        info!("Keyboard control: 'r' + Enter restarts, 'q' + Enter quits");
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!(error = %err, "Keyboard input error");
                    break;
                }
            };
            match ControlSignal::from_key(&line) {
                Some(signal) => {
                    info!(?signal, "Control key received");
                    latch.send(signal);
                    if signal == ControlSignal::Quit {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => debug!(input = %line.trim(), "Ignoring unknown key"),
            }
        }
        debug!("Keyboard input closed");
    })
}
