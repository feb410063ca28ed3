//! Prometheus metrics for the simulation loop and its command bridges.

use prometheus::{
    Counter, Encoder, Gauge, GaugeVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use simloop_core::{
    LoopPhase, LoopStats, LoopStatus, PublishError, StatusFrame, StatusPublisher,
};
use std::sync::LazyLock;
use std::thread;
use tiny_http::{Header, Response, Server};

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Loop Metrics
// ============================================================================

/// Total simulation steps executed across all sessions
pub static STEPS_EXECUTED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "simloop_steps_executed_total",
        "Total simulation steps executed",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

pub static PUBLISHES: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "simloop_status_publishes_total",
        "Status publications attempted",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

pub static PUBLISH_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "simloop_status_publish_failures_total",
        "Status publications that failed",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Sessions started, including restarts
pub static SESSIONS: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new("simloop_sessions_total", "Simulation sessions started")
        .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

pub static STEPPER_FAULTS: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "simloop_stepper_faults_total",
        "Fatal simulation backend faults",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Wall time the loop spent sleeping to hold the target rate
pub static SLEEP_SECONDS: LazyLock<Counter> = LazyLock::new(|| {
    let counter = Counter::new(
        "simloop_sleep_seconds_total",
        "Wall time spent sleeping to hold the target rate",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

pub static SIM_TIME_SECONDS: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(
        "simloop_sim_time_seconds",
        "Simulated time elapsed in the current session",
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Smoothed simulated seconds per wall second
pub static SMOOTHED_RATE: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(
        "simloop_rate_smoothed",
        "Smoothed simulated seconds per wall second",
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

pub static OVERALL_RATE: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(
        "simloop_rate_overall",
        "Simulated seconds per wall second since the session started",
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Loop phase (0=initializing,1=running,2=restarting,3=stopped)
pub static LOOP_PHASE: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(
        "simloop_phase",
        "Loop phase (0=initializing,1=running,2=restarting,3=stopped)",
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Command Metrics
// ============================================================================

pub static COMMANDS_ACCEPTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("simloop_commands_accepted_total", "Commands written to the buffer"),
        &["group"],
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

pub static COMMANDS_REJECTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "simloop_commands_rejected_total",
            "Commands rejected by validation or channel policy",
        ),
        &["group"],
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

pub static COMMANDS_OUT_OF_ORDER: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "simloop_commands_out_of_order_total",
            "Commands dropped due to out-of-order sequence",
        ),
        &["group"],
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

pub static MALFORMED_MESSAGES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "simloop_malformed_messages_total",
            "Inbound lines that were not a recognised message",
        ),
        &["channel"],
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

// ============================================================================
// Bridge and State Metrics
// ============================================================================

/// Bridge client connection status (1 = connected, 0 = disconnected)
pub static BRIDGE_CONNECTED: LazyLock<GaugeVec> = LazyLock::new(|| {
    let gauge = GaugeVec::new(
        Opts::new(
            "simloop_bridge_connected",
            "Bridge client connection status (1=connected, 0=disconnected)",
        ),
        &["channel"],
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

pub static JOINT_POSITION: LazyLock<GaugeVec> = LazyLock::new(|| {
    let gauge = GaugeVec::new(
        Opts::new("simloop_joint_position", "Measured joint position"),
        &["group", "joint"],
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

fn phase_value(phase: LoopPhase) -> f64 {
    match phase {
        LoopPhase::Initializing => 0.0,
        LoopPhase::Running => 1.0,
        LoopPhase::Restarting => 2.0,
        LoopPhase::Stopped => 3.0,
    }
}

/// Turns successive [`LoopStatus`] snapshots into counter increments.
///
/// Loop statistics restart from zero when the runtime builds a fresh loop
/// after a fault, so a counter that went backwards is treated as a new
/// baseline.
#[derive(Debug, Default)]
pub struct LoopStatusSync {
    last: LoopStats,
}

impl LoopStatusSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, status: &LoopStatus) {
        let stats = &status.stats;
        STEPS_EXECUTED.inc_by(delta(stats.steps_executed, self.last.steps_executed));
        PUBLISHES.inc_by(delta(stats.publishes, self.last.publishes));
        PUBLISH_FAILURES.inc_by(delta(stats.publish_failures, self.last.publish_failures));
        SESSIONS.inc_by(delta(stats.sessions, self.last.sessions));

        let slept = if stats.total_sleep >= self.last.total_sleep {
            stats.total_sleep - self.last.total_sleep
        } else {
            stats.total_sleep
        };
        SLEEP_SECONDS.inc_by(slept.as_secs_f64());

        SIM_TIME_SECONDS.set(status.sim_time_s);
        if let Some(rate) = status.rate.current {
            SMOOTHED_RATE.set(rate);
        }
        if let Some(rate) = status.overall_rate {
            OVERALL_RATE.set(rate);
        }
        LOOP_PHASE.set(phase_value(status.phase));

        self.last = stats.clone();
    }
}

fn delta(now: u64, last: u64) -> u64 {
    if now >= last {
        now - last
    } else {
        now
    }
}

/// Exports the measured joint positions of every published frame.
#[derive(Debug, Default)]
pub struct MetricsPublisher;

impl StatusPublisher for MetricsPublisher {
    fn publish(&mut self, status: &StatusFrame<'_>) -> Result<(), PublishError> {
        for (group, state) in status.observed {
            for (idx, q) in state.positions.iter().enumerate() {
                let joint = idx.to_string();
                JOINT_POSITION
                    .with_label_values(&[group.as_str(), joint.as_str()])
                    .set(*q);
            }
        }
        Ok(())
    }
}

// ============================================================================
// Metrics HTTP Server
// ============================================================================

/// Start the metrics HTTP server on the given address.
/// Returns a join handle for the server thread.
pub fn serve_metrics(bind_addr: String) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let server = match Server::http(&bind_addr) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to start metrics server on {}: {}", bind_addr, e);
                return;
            }
        };

        tracing::info!("Metrics server listening on http://{}/metrics", bind_addr);

        for request in server.incoming_requests() {
            match request.url() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let mut buffer = Vec::new();
                    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
                        tracing::warn!("Failed to encode metrics: {}", e);
                        let _ = request.respond(
                            Response::from_string("Internal Server Error").with_status_code(500),
                        );
                        continue;
                    }

                    let mut response = Response::from_data(buffer);
                    if let Ok(header) = Header::from_bytes(
                        &b"Content-Type"[..],
                        &b"text/plain; version=0.0.4"[..],
                    ) {
                        response = response.with_header(header);
                    }
                    let _ = request.respond(response);
                }
                "/health" => {
                    let _ = request.respond(Response::from_string("OK"));
                }
                "/ready" => {
                    // Ready once the loop has stepped at least once
                    if STEPS_EXECUTED.get() > 0 {
                        let _ = request.respond(Response::from_string("Ready"));
                    } else {
                        let _ = request
                            .respond(Response::from_string("Not Ready").with_status_code(503));
                    }
                }
                _ => {
                    let _ =
                        request.respond(Response::from_string("Not Found").with_status_code(404));
                }
            }
        }
    })
}

/// Initialize all metrics (forces lazy initialization)
pub fn init_metrics() {
    let _ = STEPS_EXECUTED.get();
    let _ = PUBLISHES.get();
    let _ = PUBLISH_FAILURES.get();
    let _ = SESSIONS.get();
    let _ = STEPPER_FAULTS.get();
    let _ = SLEEP_SECONDS.get();
    let _ = SIM_TIME_SECONDS.get();
    let _ = SMOOTHED_RATE.get();
    let _ = OVERALL_RATE.get();
    let _ = LOOP_PHASE.get();
    LazyLock::force(&COMMANDS_ACCEPTED);
    LazyLock::force(&COMMANDS_REJECTED);
    LazyLock::force(&COMMANDS_OUT_OF_ORDER);
    LazyLock::force(&MALFORMED_MESSAGES);
    LazyLock::force(&BRIDGE_CONNECTED);
    LazyLock::force(&JOINT_POSITION);
}

#[cfg(test)]
mod tests {
    use super::*;
    use simloop_core::{CommandFrame, GroupState, Observation, RateEstimate};
    use std::time::Duration;

    fn status(steps: u64, sleep_ms: u64) -> LoopStatus {
        LoopStatus {
            phase: LoopPhase::Running,
            sim_time_s: 0.5,
            session_steps: steps,
            overall_rate: Some(1.0),
            rate: RateEstimate {
                current: Some(0.98),
                samples: steps,
            },
            stats: LoopStats {
                sessions: 1,
                steps_executed: steps,
                total_sleep: Duration::from_millis(sleep_ms),
                ..LoopStats::default()
            },
        }
    }

    // Metrics are process-global, so assertions compare before/after values.
    #[test]
    fn sync_applies_deltas_and_survives_reset() {
        let mut sync = LoopStatusSync::new();
        let before = STEPS_EXECUTED.get();

        sync.apply(&status(100, 10));
        sync.apply(&status(250, 20));
        assert_eq!(STEPS_EXECUTED.get() - before, 250);

        // Fresh loop after a fault: counting resumes from its own zero.
        sync.apply(&status(5, 1));
        assert_eq!(STEPS_EXECUTED.get() - before, 255);
        assert_eq!(LOOP_PHASE.get(), 1.0);
    }

    #[test]
    fn publisher_exports_joint_positions() {
        let mut observed = Observation::new();
        observed.insert(
            "metrics_test_arm".into(),
            GroupState {
                positions: vec![0.25, -0.5],
                velocities: vec![0.0, 0.0],
                efforts: vec![0.0, 0.0],
            },
        );
        let commanded = CommandFrame::new();
        let frame = StatusFrame {
            sim_time: Duration::from_millis(33),
            unix_us: 0,
            observed: &observed,
            commanded: &commanded,
        };
        MetricsPublisher.publish(&frame).unwrap();
        assert_eq!(
            JOINT_POSITION
                .with_label_values(&["metrics_test_arm", "1"])
                .get(),
            -0.5
        );
    }
}
