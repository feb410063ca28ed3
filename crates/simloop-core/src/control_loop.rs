use crate::actuator::Observation;
use crate::command_buffer::{CommandBuffer, CommandFrame};
use crate::error::{ConfigError, LoopError, StepError};
use crate::publisher::{StatusFrame, StatusPublisher};
use crate::rate::{RateEstimate, RateGovernor};
use crate::signal::{ControlSignal, ControlSource};
use crate::stepper::SimulationStepper;
use crate::timebase::{unix_now_us, Clock, TimeBase};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct LoopConfig {
    /// Simulated time advanced per step.
    pub timestep: Duration,
    /// Upper bound on simulated seconds per wall second. `f64::INFINITY`
    /// disables throttling.
    pub rate_multiplier: f64,
    /// Minimum simulated time between status publications.
    pub publish_interval: Duration,
    pub rate_time_constant: Duration,
    /// Wall time between rate reports.
    pub report_interval: Duration,
    /// Steps per session before the loop stops on its own.
    pub max_steps: Option<u64>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            timestep: Duration::from_millis(1),
            rate_multiplier: 1.0,
            publish_interval: Duration::from_millis(33),
            rate_time_constant: Duration::from_millis(100),
            report_interval: Duration::from_millis(100),
            max_steps: None,
        }
    }
}

/// Slower targets would ask for sleeps beyond what a `Duration` can hold.
pub const MIN_RATE_MULTIPLIER: f64 = 1e-6;

impl LoopConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timestep.is_zero() {
            return Err(ConfigError::NonPositiveTimestep);
        }
        if self.rate_multiplier.is_nan() || self.rate_multiplier < MIN_RATE_MULTIPLIER {
            return Err(ConfigError::InvalidRateMultiplier(self.rate_multiplier));
        }
        if self.report_interval.is_zero() {
            return Err(ConfigError::NonPositiveReportInterval);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Initializing,
    Running,
    Restarting,
    Stopped,
}

impl LoopPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Restarting => "restarting",
            Self::Stopped => "stopped",
        }
    }
}

/// Why a loop stopped without a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Quit,
    StepLimit,
}

/// Counters accumulated over every session of one loop.
#[derive(Clone, Default, Debug, Serialize)]
pub struct LoopStats {
    pub sessions: u64,
    pub steps_executed: u64,
    pub publishes: u64,
    pub publish_failures: u64,
    pub sleeps_issued: u64,
    /// Steps after which the loop was already behind schedule.
    pub steps_behind: u64,
    pub total_sleep: Duration,
}

/// Per-session state, owned by the stepping thread.
#[derive(Debug, Clone, Default)]
pub struct SimulationState {
    pub sim_time: Duration,
    pub steps: u64,
    pub observed: Observation,
    pub last_publish: Duration,
    /// Clock reading when the session started.
    pub session_wall_start: Duration,
}

/// Read-only view of a running loop for telemetry threads.
#[derive(Debug, Clone, Serialize)]
pub struct LoopStatus {
    pub phase: LoopPhase,
    pub sim_time_s: f64,
    pub session_steps: u64,
    pub overall_rate: Option<f64>,
    pub rate: RateEstimate,
    pub stats: LoopStats,
}

impl Default for LoopStatus {
    fn default() -> Self {
        Self {
            phase: LoopPhase::Initializing,
            sim_time_s: 0.0,
            session_steps: 0,
            overall_rate: None,
            rate: RateEstimate::default(),
            stats: LoopStats::default(),
        }
    }
}

/// Latest [`LoopStatus`], refreshed by the loop at its report interval.
#[derive(Debug, Default)]
pub struct LoopMonitor {
    status: Mutex<LoopStatus>,
}

impl LoopMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, status: LoopStatus) {
        *self
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = status;
    }

    pub fn read(&self) -> LoopStatus {
        self.status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

enum Flow {
    Continue,
    Restart,
    Exit(LoopExit),
}

/// Drives a [`SimulationStepper`] from the latest buffered commands at a
/// governed rate, publishing status on a simulated-time cadence.
pub struct ControlLoop<S, P, C, K = TimeBase>
where
    S: SimulationStepper,
    P: StatusPublisher,
    C: ControlSource,
    K: Clock,
{
    stepper: S,
    publisher: P,
    signals: C,
    commands: Arc<CommandBuffer>,
    clock: K,
    config: LoopConfig,
    governor: RateGovernor,
    state: SimulationState,
    phase: LoopPhase,
    stats: LoopStats,
    monitor: Option<Arc<LoopMonitor>>,
    last_report: Duration,
    outcome: Option<Result<LoopExit, LoopError>>,
}

impl<S, P, C> ControlLoop<S, P, C, TimeBase>
where
    S: SimulationStepper,
    P: StatusPublisher,
    C: ControlSource,
{
    pub fn new(
        stepper: S,
        publisher: P,
        signals: C,
        commands: Arc<CommandBuffer>,
        config: LoopConfig,
    ) -> Result<Self, ConfigError> {
        Self::with_clock(stepper, publisher, signals, commands, config, TimeBase::new())
    }
}

impl<S, P, C, K> ControlLoop<S, P, C, K>
where
    S: SimulationStepper,
    P: StatusPublisher,
    C: ControlSource,
    K: Clock,
{
    pub fn with_clock(
        stepper: S,
        publisher: P,
        signals: C,
        commands: Arc<CommandBuffer>,
        config: LoopConfig,
        clock: K,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            stepper,
            publisher,
            signals,
            commands,
            clock,
            governor: RateGovernor::new(config.rate_time_constant),
            config,
            state: SimulationState::default(),
            phase: LoopPhase::Initializing,
            stats: LoopStats::default(),
            monitor: None,
            last_report: Duration::ZERO,
            outcome: None,
        })
    }

    pub fn with_monitor(mut self, monitor: Arc<LoopMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Run until quit, step limit or a stepper fault. The loop is stopped
    /// and its stepper and publisher released on return; running a stopped
    /// loop again returns the same outcome.
    pub fn run(&mut self) -> Result<LoopExit, LoopError> {
        loop {
            match self.phase {
                LoopPhase::Initializing => {
                    if let Err(source) = self.initialize() {
                        return self.fail(source);
                    }
                }
                LoopPhase::Running => match self.iterate() {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Restart) => self.phase = LoopPhase::Restarting,
                    Ok(Flow::Exit(exit)) => {
                        self.stop(Ok(exit));
                        return Ok(exit);
                    }
                    Err(source) => return self.fail(source),
                },
                LoopPhase::Restarting => self.restart(),
                LoopPhase::Stopped => {
                    return self.outcome.clone().unwrap_or(Ok(LoopExit::Quit));
                }
            }
        }
    }

    fn initialize(&mut self) -> Result<(), StepError> {
        let observed = self.stepper.reset()?;
        let now = self.clock.now();
        self.state = SimulationState {
            observed,
            session_wall_start: now,
            ..SimulationState::default()
        };
        self.governor.reset();
        self.last_report = now;
        self.stats.sessions += 1;
        self.phase = LoopPhase::Running;
        info!(
            "Session {} started: dt = {:?}, rate x{}, publish every {:?}",
            self.stats.sessions,
            self.config.timestep,
            self.config.rate_multiplier,
            self.config.publish_interval
        );
        self.refresh_monitor();
        Ok(())
    }

    fn restart(&mut self) {
        info!(
            "Restarting simulation after {} steps ({:.3} s simulated)",
            self.state.steps,
            self.state.sim_time.as_secs_f64()
        );
        self.state = SimulationState::default();
        self.governor.reset();
        self.phase = LoopPhase::Initializing;
    }

    fn iterate(&mut self) -> Result<Flow, StepError> {
        let iteration_start = self.clock.now();

        match self.signals.poll() {
            ControlSignal::Quit => return Ok(Flow::Exit(LoopExit::Quit)),
            ControlSignal::Restart => return Ok(Flow::Restart),
            ControlSignal::Continue => {}
        }
        if let Some(max_steps) = self.config.max_steps {
            if self.state.steps >= max_steps {
                return Ok(Flow::Exit(LoopExit::StepLimit));
            }
        }

        let commands = self.commands.get_all();
        let dt = self.config.timestep;
        self.state.observed = self.stepper.step(&commands, dt)?;
        self.state.sim_time += dt;
        self.state.steps += 1;
        self.stats.steps_executed += 1;

        if self.state.sim_time.saturating_sub(self.state.last_publish)
            >= self.config.publish_interval
        {
            self.publish(&commands);
        }

        let now = self.clock.now();
        self.governor.observe(dt, now.saturating_sub(iteration_start));
        let session_wall = now.saturating_sub(self.state.session_wall_start);
        let sleep = self.governor.compute_sleep(
            self.state.sim_time,
            session_wall,
            self.config.rate_multiplier,
        );
        if sleep.is_zero() {
            self.stats.steps_behind += 1;
        } else {
            self.clock.sleep(sleep);
            self.stats.sleeps_issued += 1;
            self.stats.total_sleep += sleep;
        }

        self.maybe_report();
        Ok(Flow::Continue)
    }

    fn publish(&mut self, commands: &CommandFrame) {
        let frame = StatusFrame {
            sim_time: self.state.sim_time,
            unix_us: unix_now_us(),
            observed: &self.state.observed,
            commanded: commands,
        };
        match self.publisher.publish(&frame) {
            Ok(()) => self.stats.publishes += 1,
            Err(e) => {
                self.stats.publish_failures += 1;
                warn!(
                    "Status publish failed at {:.3} s: {}",
                    self.state.sim_time.as_secs_f64(),
                    e
                );
            }
        }
        self.state.last_publish = self.state.sim_time;
    }

    fn maybe_report(&mut self) {
        let now = self.clock.now();
        if now.saturating_sub(self.last_report) < self.config.report_interval {
            return;
        }
        self.last_report = now;
        let status = self.status();
        debug!(
            "Overall sim rate: {:?}, current sim rate: {:?} at time {:.3}",
            status.overall_rate, status.rate.current, status.sim_time_s
        );
        if let Some(monitor) = &self.monitor {
            monitor.update(status);
        }
    }

    fn fail(&mut self, source: StepError) -> Result<LoopExit, LoopError> {
        let err = LoopError::Stepper {
            step: self.state.steps + 1,
            source,
        };
        error!("Stopping control loop: {}", err);
        self.stop(Err(err.clone()));
        Err(err)
    }

    fn stop(&mut self, outcome: Result<LoopExit, LoopError>) {
        self.phase = LoopPhase::Stopped;
        self.stepper.shutdown();
        self.publisher.close();
        self.outcome = Some(outcome);
        info!(
            "Control loop stopped: {} sessions, {} steps, {} publishes ({} failed)",
            self.stats.sessions,
            self.stats.steps_executed,
            self.stats.publishes,
            self.stats.publish_failures
        );
        self.refresh_monitor();
    }

    fn refresh_monitor(&self) {
        if let Some(monitor) = &self.monitor {
            monitor.update(self.status());
        }
    }

    pub fn status(&self) -> LoopStatus {
        let session_wall = self
            .clock
            .now()
            .saturating_sub(self.state.session_wall_start);
        LoopStatus {
            phase: self.phase,
            sim_time_s: self.state.sim_time.as_secs_f64(),
            session_steps: self.state.steps,
            overall_rate: RateGovernor::overall_rate(self.state.sim_time, session_wall),
            rate: self.governor.estimate(),
            stats: self.stats.clone(),
        }
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn rate_estimate(&self) -> RateEstimate {
        self.governor.estimate()
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn commands(&self) -> &Arc<CommandBuffer> {
        &self.commands
    }
}
