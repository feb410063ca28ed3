use crate::actuator::{ActuatorGroup, GroupState, Observation};
use crate::command_buffer::CommandFrame;
use crate::error::StepError;
use crate::stepper::SimulationStepper;
use std::time::Duration;

/// Servo gains shared by every simulated joint.
#[derive(Debug, Clone, Copy)]
pub struct ServoParams {
    pub kp: f64,
    pub kd: f64,
    pub inertia: f64,
}

impl Default for ServoParams {
    fn default() -> Self {
        // Critically damped at 20 rad/s for unit inertia.
        Self {
            kp: 400.0,
            kd: 40.0,
            inertia: 1.0,
        }
    }
}

/// Joint-space robot model: every joint is a torque-saturated PD position
/// servo driving a point inertia.
#[derive(Debug, Clone)]
pub struct SimulatedRobot {
    groups: Vec<ActuatorGroup>,
    params: ServoParams,
    states: Observation,
    steps: u64,
}

impl SimulatedRobot {
    pub fn new(groups: impl IntoIterator<Item = ActuatorGroup>) -> Self {
        Self::with_params(groups, ServoParams::default())
    }

    pub fn with_params(
        groups: impl IntoIterator<Item = ActuatorGroup>,
        params: ServoParams,
    ) -> Self {
        let groups: Vec<ActuatorGroup> = groups.into_iter().collect();
        let states = initial_states(&groups);
        Self {
            groups,
            params,
            states,
            steps: 0,
        }
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn is_healthy(&self) -> bool {
        self.states.values().all(GroupState::is_finite)
    }

    fn step_group(
        &mut self,
        group_idx: usize,
        commands: &CommandFrame,
        dt_s: f64,
    ) -> Result<(), StepError> {
        let group = &self.groups[group_idx];
        let params = self.params;
        let Some(state) = self.states.get_mut(group.name()) else {
            return Err(StepError::Backend(format!(
                "no state for group {}",
                group.name()
            )));
        };
        let command = commands.get(group.name());

        for joint in 0..group.dof() {
            let max_effort = group.max_efforts()[joint];
            let (target, limit) = match command {
                Some(cmd) => {
                    let limit = cmd
                        .efforts()
                        .map_or(max_effort, |e| e[joint].min(max_effort));
                    (cmd.positions()[joint], limit)
                }
                // Uncommanded joints hold zero.
                None => (0.0, max_effort),
            };

            let q = state.positions[joint];
            let qd = state.velocities[joint];
            let torque = (params.kp * (target - q) - params.kd * qd).clamp(-limit, limit);
            let qdd = torque / params.inertia;

            // Semi-implicit Euler.
            let qd_next = qd + qdd * dt_s;
            state.velocities[joint] = qd_next;
            state.positions[joint] = q + qd_next * dt_s;
            state.efforts[joint] = torque;
        }

        if !state.is_finite() {
            return Err(StepError::Diverged {
                group: group.name().to_string(),
            });
        }
        Ok(())
    }
}

impl SimulationStepper for SimulatedRobot {
    fn reset(&mut self) -> Result<Observation, StepError> {
        self.states = initial_states(&self.groups);
        self.steps = 0;
        Ok(self.states.clone())
    }

    fn step(&mut self, commands: &CommandFrame, dt: Duration) -> Result<Observation, StepError> {
        let dt_s = dt.as_secs_f64();
        for idx in 0..self.groups.len() {
            self.step_group(idx, commands, dt_s)?;
        }
        self.steps += 1;
        Ok(self.states.clone())
    }
}

fn initial_states(groups: &[ActuatorGroup]) -> Observation {
    groups
        .iter()
        .map(|g| (g.name().to_string(), GroupState::zeros(g.dof())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::{iiwa_arm, wsg50_gripper};
    use crate::command::Command;
    use crate::CommandBuffer;

    fn run(robot: &mut SimulatedRobot, frame: &CommandFrame, steps: usize) -> Observation {
        let mut last = Observation::new();
        for _ in 0..steps {
            last = robot.step(frame, Duration::from_millis(1)).unwrap();
        }
        last
    }

    #[test]
    fn tracks_position_target() {
        let buffer = CommandBuffer::new(vec![iiwa_arm()]).unwrap();
        buffer.set("iiwa", Command::new(vec![0.5; 7])).unwrap();
        let mut robot = SimulatedRobot::new(vec![iiwa_arm()]);
        let obs = run(&mut robot, &buffer.get_all(), 2000);
        for q in &obs["iiwa"].positions {
            assert!((q - 0.5).abs() < 1e-3, "joint at {q}");
        }
        assert_eq!(robot.steps(), 2000);
    }

    #[test]
    fn commanded_effort_limits_torque() {
        let buffer = CommandBuffer::new(vec![wsg50_gripper()]).unwrap();
        buffer
            .set(
                "wsg50",
                Command::new(vec![-0.05, 0.05]).with_efforts(vec![2.0, 2.0]),
            )
            .unwrap();
        let mut robot = SimulatedRobot::new(vec![wsg50_gripper()]);
        let obs = robot
            .step(&buffer.get_all(), Duration::from_millis(1))
            .unwrap();
        assert_eq!(obs["wsg50"].efforts, vec![-2.0, 2.0]);
    }

    #[test]
    fn reset_returns_to_rest() {
        let buffer = CommandBuffer::new(vec![iiwa_arm()]).unwrap();
        buffer.set("iiwa", Command::new(vec![1.0; 7])).unwrap();
        let mut robot = SimulatedRobot::new(vec![iiwa_arm()]);
        run(&mut robot, &buffer.get_all(), 10);
        let obs = robot.reset().unwrap();
        assert_eq!(obs["iiwa"], GroupState::zeros(7));
        assert_eq!(robot.steps(), 0);
    }

    #[test]
    fn unstable_timestep_diverges() {
        let stiff = ActuatorGroup::new("stiff", ["j1"], vec![f64::MAX]).unwrap();
        let buffer = CommandBuffer::new(vec![stiff.clone()]).unwrap();
        buffer.set("stiff", Command::new(vec![1.0])).unwrap();
        let params = ServoParams {
            kp: 1.0e6,
            kd: 0.0,
            inertia: 1.0e-6,
        };
        let mut robot = SimulatedRobot::with_params(vec![stiff], params);
        let frame = buffer.get_all();
        let mut result = Ok(Observation::new());
        for _ in 0..1000 {
            result = robot.step(&frame, Duration::from_secs(1));
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(StepError::Diverged { .. })));
        assert!(!robot.is_healthy());
    }
}
