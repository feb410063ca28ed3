pub mod actuator;
pub mod command;
pub mod command_buffer;
mod command_proptest;
pub mod control_loop;
pub mod error;
pub mod publisher;
pub mod rate;
pub mod signal;
#[cfg(feature = "simulation")]
pub mod sim_robot;
pub mod stepper;
pub mod timebase;

pub use actuator::{ActuatorGroup, GroupState, Observation};
pub use command::{Command, CommandSnapshot, CommandViolation};
pub use command_buffer::{CommandBuffer, CommandFrame};
pub use control_loop::{
    ControlLoop, LoopConfig, LoopExit, LoopMonitor, LoopPhase, LoopStats, LoopStatus,
    SimulationState, MIN_RATE_MULTIPLIER,
};
pub use error::{ConfigError, LoopError, PublishError, StepError};
pub use publisher::{NullPublisher, PublisherSet, StatusFrame, StatusPublisher};
pub use rate::{RateEstimate, RateGovernor};
pub use signal::{ControlSignal, ControlSource, NoSignals, SignalLatch};
#[cfg(feature = "simulation")]
pub use sim_robot::{ServoParams, SimulatedRobot};
pub use stepper::SimulationStepper;
pub use timebase::{Clock, ManualClock, TimeBase};
