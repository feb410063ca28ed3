use serde::Serialize;
use std::time::Duration;

/// Smoothed ratio of simulated time to wall time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RateEstimate {
    /// `None` until the first sample.
    pub current: Option<f64>,
    pub samples: u64,
}

/// Tracks how fast the simulation runs and throttles it to a target
/// multiple of real time.
#[derive(Debug, Clone)]
pub struct RateGovernor {
    time_constant_s: f64,
    estimate: RateEstimate,
}

impl RateGovernor {
    pub fn new(time_constant: Duration) -> Self {
        Self {
            time_constant_s: time_constant.as_secs_f64(),
            estimate: RateEstimate::default(),
        }
    }

    /// Fold one step's throughput into the moving average.
    ///
    /// `alpha = dt / (time_constant + dt)`, so large steps relative to the
    /// time constant move the estimate faster. The first sample seeds it.
    pub fn observe(&mut self, delta_sim: Duration, delta_wall: Duration) {
        let dt_s = delta_sim.as_secs_f64();
        let wall_s = delta_wall.as_secs_f64();
        if wall_s <= 0.0 {
            return;
        }

        let sample = dt_s / wall_s;
        let alpha = dt_s / (self.time_constant_s + dt_s);
        let next = match self.estimate.current {
            None => sample,
            Some(avg) => sample * alpha + (1.0 - alpha) * avg,
        };
        self.estimate.current = Some(next);
        self.estimate.samples += 1;
    }

    /// Sleep needed so that wall time catches up with `total_sim / target`.
    ///
    /// Zero when the loop is already behind schedule; there is no catch-up
    /// cap, a lagging loop simply stops sleeping. Saturates at
    /// `Duration::MAX` when the target is too slow to represent.
    pub fn compute_sleep(
        &self,
        total_sim: Duration,
        total_wall: Duration,
        target_multiplier: f64,
    ) -> Duration {
        let target_wall_s = total_sim.as_secs_f64() / target_multiplier;
        let ahead_s = target_wall_s - total_wall.as_secs_f64();
        if target_multiplier.is_infinite() || ahead_s.is_nan() || ahead_s <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(ahead_s).unwrap_or(Duration::MAX)
    }

    /// Simulated seconds per wall second since the session started.
    pub fn overall_rate(total_sim: Duration, total_wall: Duration) -> Option<f64> {
        let wall_s = total_wall.as_secs_f64();
        (wall_s > 0.0).then(|| total_sim.as_secs_f64() / wall_s)
    }

    pub fn estimate(&self) -> RateEstimate {
        self.estimate
    }

    pub fn reset(&mut self) {
        self.estimate = RateEstimate::default();
    }
}
