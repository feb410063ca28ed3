use crate::actuator::ActuatorGroup;
use crate::timebase::unix_now_us;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy)]
pub struct Unvalidated;

#[derive(Debug, Clone, Copy)]
pub struct Validated;

/// Target state for one actuator group.
///
/// Commands arrive from transports as `Command<Unvalidated>` and are only
/// stored once checked against their group's joint count and effort limits.
#[derive(Debug, Clone)]
pub struct Command<State = Unvalidated> {
    positions: Arc<[f64]>,
    efforts: Option<Arc<[f64]>>,
    received_unix_us: u64,
    _state: PhantomData<State>,
}

/// A validated, immutable command as held by the [`CommandBuffer`](crate::CommandBuffer).
pub type CommandSnapshot = Command<Validated>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandViolation {
    #[error("unknown actuator group {group}")]
    UnknownGroup { group: String },

    #[error("expected {expected} joint positions, got {got}")]
    JointCount { expected: usize, got: usize },

    #[error("non-finite position {value} for joint {joint}")]
    NonFinitePosition { joint: usize, value: f64 },

    #[error("expected {expected} joint efforts, got {got}")]
    EffortCount { expected: usize, got: usize },

    #[error("non-finite effort {value} for joint {joint}")]
    NonFiniteEffort { joint: usize, value: f64 },

    #[error("negative effort {value} for joint {joint}")]
    NegativeEffort { joint: usize, value: f64 },

    #[error("effort {requested} for joint {joint} exceeds limit {limit}")]
    EffortAboveLimit {
        joint: usize,
        requested: f64,
        limit: f64,
    },
}

impl Command<Unvalidated> {
    /// A position-only command, stamped with the current wall-clock time.
    pub fn new(positions: Vec<f64>) -> Self {
        Self {
            positions: positions.into(),
            efforts: None,
            received_unix_us: unix_now_us(),
            _state: PhantomData,
        }
    }

    pub fn with_efforts(mut self, efforts: Vec<f64>) -> Self {
        self.efforts = Some(efforts.into());
        self
    }

    pub fn received_at(mut self, unix_us: u64) -> Self {
        self.received_unix_us = unix_us;
        self
    }

    pub fn validate(self, group: &ActuatorGroup) -> Result<CommandSnapshot, CommandViolation> {
        if self.positions.len() != group.dof() {
            return Err(CommandViolation::JointCount {
                expected: group.dof(),
                got: self.positions.len(),
            });
        }
        if let Some((joint, value)) = first_non_finite(&self.positions) {
            return Err(CommandViolation::NonFinitePosition { joint, value });
        }

        if let Some(efforts) = &self.efforts {
            if efforts.len() != group.dof() {
                return Err(CommandViolation::EffortCount {
                    expected: group.dof(),
                    got: efforts.len(),
                });
            }
            if let Some((joint, value)) = first_non_finite(efforts) {
                return Err(CommandViolation::NonFiniteEffort { joint, value });
            }
            for (joint, (&requested, &limit)) in
                efforts.iter().zip(group.max_efforts()).enumerate()
            {
                if requested < 0.0 {
                    return Err(CommandViolation::NegativeEffort {
                        joint,
                        value: requested,
                    });
                }
                if requested > limit {
                    return Err(CommandViolation::EffortAboveLimit {
                        joint,
                        requested,
                        limit,
                    });
                }
            }
        }

        Ok(Command {
            positions: self.positions,
            efforts: self.efforts,
            received_unix_us: self.received_unix_us,
            _state: PhantomData,
        })
    }
}

impl Command<Validated> {
    /// The hold-at-zero command of a group that has never been commanded.
    pub fn zeros(dof: usize) -> Self {
        Self {
            positions: vec![0.0; dof].into(),
            efforts: None,
            received_unix_us: 0,
            _state: PhantomData,
        }
    }
}

impl<State> Command<State> {
    pub fn positions(&self) -> &[f64] {
        &self.positions
    }

    pub fn efforts(&self) -> Option<&[f64]> {
        self.efforts.as_deref()
    }

    /// Unix microseconds at which the command was received; zero for defaults.
    pub fn received_unix_us(&self) -> u64 {
        self.received_unix_us
    }
}

impl PartialEq for Command<Validated> {
    fn eq(&self, other: &Self) -> bool {
        self.positions == other.positions
            && self.efforts == other.efforts
            && self.received_unix_us == other.received_unix_us
    }
}

fn first_non_finite(values: &[f64]) -> Option<(usize, f64)> {
    values
        .iter()
        .copied()
        .enumerate()
        .find(|(_, v)| !v.is_finite())
}
