use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Monotonic wall-time source used by the control loop for rate governance.
pub trait Clock: Send {
    /// Time elapsed since the clock's epoch.
    fn now(&self) -> Duration;

    fn sleep(&mut self, duration: Duration);
}

#[derive(Debug, Clone, Copy)]
pub struct TimeBase {
    start: Instant,
}

impl TimeBase {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Monotonic microseconds since start.
    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    /// Wall-clock microseconds since Unix epoch (for cross-process logs only).
    pub fn unix_us(&self) -> u64 {
        unix_now_us()
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TimeBase {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

pub fn unix_now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

/// A clock that only moves when told to. Sleeping advances it instantly.
///
/// Clones share the same time, so a test stepper can charge simulated
/// compute cost against the loop's clock.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
    slept: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        self.nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Total time passed to [`Clock::sleep`].
    pub fn total_slept(&self) -> Duration {
        Duration::from_nanos(self.slept.load(Ordering::SeqCst))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }

    fn sleep(&mut self, duration: Duration) {
        self.slept
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let mut clock = ManualClock::new();
        let handle = clock.clone();
        handle.advance(Duration::from_millis(3));
        clock.sleep(Duration::from_millis(2));
        assert_eq!(handle.now(), Duration::from_millis(5));
        assert_eq!(handle.total_slept(), Duration::from_millis(2));
    }

    #[test]
    fn timebase_is_monotonic() {
        let tb = TimeBase::new();
        let a = tb.now();
        let b = tb.now();
        assert!(b >= a);
        assert!(tb.unix_us() > 0);
    }
}
