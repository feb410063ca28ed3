use simloop_core::LoopMonitor;
use simloop_io::metrics::{init_metrics, serve_metrics, LoopStatusSync};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

const UPDATE_INTERVAL: Duration = Duration::from_millis(200);

pub fn init() {
    init_metrics();
}

pub fn start_metrics_server(addr: &Option<String>) -> Option<thread::JoinHandle<()>> {
    addr.as_ref().map(|addr| {
        info!(addr = %addr, "Starting metrics server");
        serve_metrics(addr.clone())
    })
}

/// Copy the loop's status snapshot into the metrics registry until `stop`.
pub fn start_metrics_updater(
    monitor: Arc<LoopMonitor>,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut sync = LoopStatusSync::new();
        while !stop.load(Ordering::Relaxed) {
            sync.apply(&monitor.read());
            thread::sleep(UPDATE_INTERVAL);
        }
        sync.apply(&monitor.read());
    })
}
