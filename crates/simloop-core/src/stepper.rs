use crate::actuator::Observation;
use crate::command_buffer::CommandFrame;
use crate::error::StepError;
use std::time::Duration;

/// Physics or robot backend advanced by the control loop.
///
/// Calls may take arbitrarily long; the loop charges their wall-clock cost
/// to the rate governor. Errors are fatal and never retried.
pub trait SimulationStepper: Send {
    /// Put the world in its initial condition and report the starting state.
    fn reset(&mut self) -> Result<Observation, StepError>;

    /// Apply the latest commands and advance the world by `dt`.
    fn step(&mut self, commands: &CommandFrame, dt: Duration) -> Result<Observation, StepError>;

    /// Release backend resources. Called once when the loop stops.
    fn shutdown(&mut self) {}
}

impl<S: SimulationStepper + ?Sized> SimulationStepper for Box<S> {
    fn reset(&mut self) -> Result<Observation, StepError> {
        (**self).reset()
    }

    fn step(&mut self, commands: &CommandFrame, dt: Duration) -> Result<Observation, StepError> {
        (**self).step(commands, dt)
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }
}
