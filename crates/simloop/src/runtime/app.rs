use crate::infra::audit::{AuditEventType, AuditLogger, StepperFaultDetails};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::keyboard::spawn_keyboard;
use crate::runtime::logging::init_tracing;
use crate::runtime::telemetry;
use simloop_core::actuator::{iiwa_arm, wsg50_gripper, IIWA_GROUP, WSG50_GROUP};
use simloop_core::{
    ActuatorGroup, CommandBuffer, ConfigError, ControlLoop, ControlSignal, ControlSource,
    LoopConfig, LoopError, LoopMonitor, LoopStats, PublisherSet, SignalLatch, SimulatedRobot,
    TimeBase,
};
use simloop_io::bridge::{BridgeConfig, BridgeError, CommandBridge};
use simloop_io::metrics::{MetricsPublisher, STEPPER_FAULTS};
use simloop_io::protocol::StatusFormat;
use simloop_io::status::{BridgePublisher, StatusBoard};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("failed to open audit log {path}: {source}")]
    Audit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("control loop failed: {0}")]
    Loop(#[from] LoopError),

    #[error("control loop thread panicked")]
    LoopPanicked,
}

pub fn run_from_args() -> ExitCode {
    let config = RuntimeConfig::from_env();
    if config.show_help {
        RuntimeConfig::print_help();
        return ExitCode::SUCCESS;
    }

    let _log_guard = init_tracing(config.json_logs, config.log_dir.as_deref());

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "simloop failed");
            ExitCode::FAILURE
        }
    }
}

pub fn run(config: RuntimeConfig) -> Result<(), AppError> {
    let loop_config = config.loop_config()?;

    telemetry::init();
    let metrics_enabled = config.metrics_addr.is_some();
    let _metrics_handle = telemetry::start_metrics_server(&config.metrics_addr);

    let timebase = TimeBase::new();
    let audit = init_audit_logger(config.audit_path.as_deref())?;
    let journal = Journal { audit, timebase };

    journal.record(
        AuditEventType::SystemStart,
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "timestep_s": loop_config.timestep.as_secs_f64(),
            "rate_multiplier": loop_config.rate_multiplier,
            "bridge_enabled": config.bridge_enabled,
            "metrics_enabled": metrics_enabled,
        }),
    );

    let groups = vec![iiwa_arm(), wsg50_gripper()];
    let buffer = Arc::new(CommandBuffer::new(groups.clone())?);
    let board = Arc::new(StatusBoard::new());
    let monitor = Arc::new(LoopMonitor::new());
    let latch = SignalLatch::new();
    let stop = Arc::new(AtomicBool::new(false));

    // Both channels are bound before anything runs so a bad address fails fast.
    let bridges = if config.bridge_enabled {
        vec![
            CommandBridge::bind(bridge_config(BridgeConfig::arm(), &config.arm_bind, &config))?,
            CommandBridge::bind(bridge_config(
                BridgeConfig::gripper(),
                &config.gripper_bind,
                &config,
            ))?,
        ]
    } else {
        info!("Bridges disabled");
        Vec::new()
    };
    let bridge_handles: Vec<_> = bridges
        .into_iter()
        .map(|bridge| {
            let buffer = Arc::clone(&buffer);
            let board = Arc::clone(&board);
            let stop = Arc::clone(&stop);
            thread::spawn(move || bridge.run(buffer, board, stop))
        })
        .collect();

    let updater = telemetry::start_metrics_updater(Arc::clone(&monitor), Arc::clone(&stop));

    // Blocked on stdin for the life of the process, so never joined.
    if config.keyboard_enabled {
        let _ = spawn_keyboard(latch.clone());
    }

    if let Some(seconds) = config.run_seconds {
        info!(seconds, "Running for limited duration");
        let latch = latch.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(seconds));
            latch.request_quit();
        });
    }

    info!(
        timestep_ms = loop_config.timestep.as_secs_f64() * 1000.0,
        rate_multiplier = loop_config.rate_multiplier,
        publish_interval_ms = loop_config.publish_interval.as_millis() as u64,
        "Starting simulation loop"
    );

    let sessions = SessionRunner {
        groups,
        buffer,
        board,
        monitor,
        latch,
        config: loop_config,
        journal: journal.clone(),
    };
    let outcome = thread::spawn(move || sessions.run()).join();

    stop.store(true, Ordering::Relaxed);
    for handle in bridge_handles {
        let _ = handle.join();
    }
    let _ = updater.join();

    let totals = outcome.map_err(|_| AppError::LoopPanicked)??;

    info!(
        sessions = totals.sessions,
        steps_executed = totals.steps_executed,
        publishes = totals.publishes,
        publish_failures = totals.publish_failures,
        total_sleep_s = totals.total_sleep.as_secs_f64(),
        "Run complete"
    );
    journal.record(
        AuditEventType::SystemShutdown,
        serde_json::json!({
            "sessions": totals.sessions,
            "steps_executed": totals.steps_executed,
            "publishes": totals.publishes,
            "publish_failures": totals.publish_failures,
        }),
    );
    Ok(())
}

fn bridge_config(base: BridgeConfig, bind_addr: &str, config: &RuntimeConfig) -> BridgeConfig {
    BridgeConfig {
        bind_addr: bind_addr.to_string(),
        require_handshake: config.bridge_require_handshake,
        ..base
    }
}

fn init_audit_logger(audit_path: Option<&Path>) -> Result<Option<Arc<AuditLogger>>, AppError> {
    let Some(path) = audit_path else {
        return Ok(None);
    };
    match AuditLogger::new(path) {
        Ok(logger) => {
            info!(path = %path.display(), "Audit logging enabled");
            Ok(Some(Arc::new(logger)))
        }
        Err(source) => Err(AppError::Audit {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Audit sink shared by the main and loop threads; a no-op when auditing
/// is off.
#[derive(Clone)]
struct Journal {
    audit: Option<Arc<AuditLogger>>,
    timebase: TimeBase,
}

impl Journal {
    fn record(&self, event_type: AuditEventType, details: serde_json::Value) {
        let Some(logger) = &self.audit else {
            return;
        };
        if let Err(e) = logger.log_event(
            self.timebase.now_us(),
            self.timebase.unix_us(),
            event_type,
            details,
        ) {
            warn!(error = %e, ?event_type, "Failed to write audit entry");
        }
    }
}

/// Owns the stepping thread: runs a control loop, and after a backend
/// fault waits for the operator to restart with a fresh backend or quit.
struct SessionRunner {
    groups: Vec<ActuatorGroup>,
    buffer: Arc<CommandBuffer>,
    board: Arc<StatusBoard>,
    monitor: Arc<LoopMonitor>,
    latch: SignalLatch,
    config: LoopConfig,
    journal: Journal,
}

impl SessionRunner {
    fn run(self) -> Result<LoopStats, LoopError> {
        let mut totals = LoopStats::default();
        let mut generation: u64 = 0;
        loop {
            generation += 1;
            let mut control = ControlLoop::new(
                SimulatedRobot::new(self.groups.clone()),
                self.publishers(),
                self.latch.clone(),
                Arc::clone(&self.buffer),
                self.config.clone(),
            )?
            .with_monitor(Arc::clone(&self.monitor));
            self.journal.record(
                AuditEventType::SessionStart,
                serde_json::json!({ "generation": generation }),
            );

            let outcome = control.run();
            accumulate(&mut totals, control.stats());

            match outcome {
                Ok(exit) => {
                    info!(?exit, "Simulation loop finished");
                    return Ok(totals);
                }
                Err(LoopError::Stepper { step, source }) => {
                    STEPPER_FAULTS.inc();
                    error!(
                        step,
                        error = %source,
                        "Simulation backend fault; enter 'r' to restart or 'q' to quit"
                    );
                    let details = StepperFaultDetails {
                        step,
                        sim_time_s: control.state().sim_time.as_secs_f64(),
                        error: source.to_string(),
                    };
                    self.journal.record(
                        AuditEventType::StepperFault,
                        serde_json::to_value(&details).unwrap_or_default(),
                    );

                    if !self.wait_for_restart() {
                        return Ok(totals);
                    }
                    info!("Restarting simulation with a fresh backend");
                    self.journal.record(
                        AuditEventType::SessionRestart,
                        serde_json::json!({ "after_fault_at_step": step }),
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn publishers(&self) -> PublisherSet {
        PublisherSet::new()
            .with(
                BridgePublisher::new(Arc::clone(&self.board))
                    .report(IIWA_GROUP, StatusFormat::Joint)
                    .report(WSG50_GROUP, StatusFormat::Gripper),
            )
            .with(MetricsPublisher)
    }

    /// `true` on restart, `false` on quit.
    fn wait_for_restart(&self) -> bool {
        let mut latch = self.latch.clone();
        loop {
            match latch.poll() {
                ControlSignal::Restart => return true,
                ControlSignal::Quit => return false,
                ControlSignal::Continue => thread::sleep(SIGNAL_POLL_INTERVAL),
            }
        }
    }
}

fn accumulate(totals: &mut LoopStats, stats: &LoopStats) {
    totals.sessions += stats.sessions;
    totals.steps_executed += stats.steps_executed;
    totals.publishes += stats.publishes;
    totals.publish_failures += stats.publish_failures;
    totals.sleeps_issued += stats.sleeps_issued;
    totals.steps_behind += stats.steps_behind;
    totals.total_sleep += stats.total_sleep;
}
