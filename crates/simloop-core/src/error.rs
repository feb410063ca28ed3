use thiserror::Error;

/// Invalid loop or group configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("timestep must be positive")]
    NonPositiveTimestep,

    #[error("rate multiplier must be at least 1e-6, got {0}")]
    InvalidRateMultiplier(f64),

    #[error("rate time constant must be non-negative, got {0}")]
    InvalidRateTimeConstant(f64),

    #[error("report interval must be positive")]
    NonPositiveReportInterval,

    #[error("actuator group {group} has no joints")]
    EmptyGroup { group: String },

    #[error("actuator group {group} has {expected} joints but {got} effort limits")]
    EffortLimitCount {
        group: String,
        expected: usize,
        got: usize,
    },

    #[error("actuator group {group} has invalid effort limit {limit}")]
    InvalidEffortLimit { group: String, limit: f64 },

    #[error("actuator group {0} registered twice")]
    DuplicateGroup(String),
}

/// Unrecoverable failure of the physics/robot backend.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepError {
    #[error("simulation diverged in group {group}")]
    Diverged { group: String },

    #[error("backend disconnected: {0}")]
    Disconnected(String),

    #[error("backend fault: {0}")]
    Backend(String),
}

/// Telemetry could not be delivered. Never stops the loop.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode status: {0}")]
    Encode(String),

    #[error("status transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("status sink closed")]
    Closed,
}

/// Terminal outcome of a control loop.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoopError {
    #[error("invalid loop configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("stepper fault at step {step}: {source}")]
    Stepper {
        step: u64,
        #[source]
        source: StepError,
    },
}
