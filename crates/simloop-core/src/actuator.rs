use crate::error::ConfigError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A named, ordered set of joints commanded and reported together.
///
/// Cheap to clone; the joint list is shared.
#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorGroup {
    name: Arc<str>,
    joints: Arc<[String]>,
    max_efforts: Arc<[f64]>,
}

impl ActuatorGroup {
    pub fn new<N, J>(name: N, joints: J, max_efforts: Vec<f64>) -> Result<Self, ConfigError>
    where
        N: Into<String>,
        J: IntoIterator,
        J::Item: Into<String>,
    {
        let name = name.into();
        let joints: Vec<String> = joints.into_iter().map(Into::into).collect();
        if joints.is_empty() {
            return Err(ConfigError::EmptyGroup { group: name });
        }
        if max_efforts.len() != joints.len() {
            return Err(ConfigError::EffortLimitCount {
                group: name,
                expected: joints.len(),
                got: max_efforts.len(),
            });
        }
        if let Some(limit) = max_efforts.iter().find(|e| !e.is_finite() || **e < 0.0) {
            return Err(ConfigError::InvalidEffortLimit {
                group: name,
                limit: *limit,
            });
        }
        Ok(Self {
            name: name.into(),
            joints: joints.into(),
            max_efforts: max_efforts.into(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn joints(&self) -> &[String] {
        &self.joints
    }

    pub fn max_efforts(&self) -> &[f64] {
        &self.max_efforts
    }

    pub fn dof(&self) -> usize {
        self.joints.len()
    }
}

/// Measured state of one actuator group.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupState {
    pub positions: Vec<f64>,
    pub velocities: Vec<f64>,
    pub efforts: Vec<f64>,
}

impl GroupState {
    pub fn zeros(dof: usize) -> Self {
        Self {
            positions: vec![0.0; dof],
            velocities: vec![0.0; dof],
            efforts: vec![0.0; dof],
        }
    }

    pub fn is_finite(&self) -> bool {
        self.positions
            .iter()
            .chain(&self.velocities)
            .chain(&self.efforts)
            .all(|v| v.is_finite())
    }
}

/// Measured state for every group, keyed by group name.
pub type Observation = BTreeMap<String, GroupState>;

/// Joint names of the 7-DOF KUKA iiwa arm.
pub const IIWA_JOINTS: [&str; 7] = [
    "iiwa_joint_1",
    "iiwa_joint_2",
    "iiwa_joint_3",
    "iiwa_joint_4",
    "iiwa_joint_5",
    "iiwa_joint_6",
    "iiwa_joint_7",
];

pub const IIWA_MAX_JOINT_EFFORT: f64 = 10_000.0;

/// Finger joints of the Schunk WSG 50 parallel gripper.
pub const WSG50_JOINTS: [&str; 2] = [
    "wsg_50_base_joint_gripper_left",
    "wsg_50_base_joint_gripper_right",
];

/// Nominal WSG 50 grip force in newtons.
pub const WSG50_MAX_FORCE: f64 = 80.0;

pub const IIWA_GROUP: &str = "iiwa";
pub const WSG50_GROUP: &str = "wsg50";

/// The arm group used by the default station.
pub fn iiwa_arm() -> ActuatorGroup {
    ActuatorGroup {
        name: IIWA_GROUP.into(),
        joints: IIWA_JOINTS.iter().map(|j| j.to_string()).collect(),
        max_efforts: vec![IIWA_MAX_JOINT_EFFORT; IIWA_JOINTS.len()].into(),
    }
}

/// The gripper group used by the default station.
pub fn wsg50_gripper() -> ActuatorGroup {
    ActuatorGroup {
        name: WSG50_GROUP.into(),
        joints: WSG50_JOINTS.iter().map(|j| j.to_string()).collect(),
        max_efforts: vec![WSG50_MAX_FORCE; WSG50_JOINTS.len()].into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_group() {
        let res = ActuatorGroup::new("empty", Vec::<String>::new(), vec![]);
        assert!(matches!(res, Err(ConfigError::EmptyGroup { .. })));
    }

    #[test]
    fn rejects_mismatched_effort_limits() {
        let res = ActuatorGroup::new("arm", ["a", "b"], vec![1.0]);
        assert!(matches!(
            res,
            Err(ConfigError::EffortLimitCount {
                expected: 2,
                got: 1,
                ..
            })
        ));
    }

    #[test]
    fn rejects_negative_effort_limit() {
        let res = ActuatorGroup::new("arm", ["a"], vec![-1.0]);
        assert!(matches!(res, Err(ConfigError::InvalidEffortLimit { .. })));
    }

    #[test]
    fn presets_are_consistent() {
        let arm = iiwa_arm();
        assert_eq!(arm.dof(), 7);
        assert_eq!(arm.max_efforts().len(), 7);
        let gripper = wsg50_gripper();
        assert_eq!(gripper.name(), WSG50_GROUP);
        assert_eq!(gripper.joints()[1], "wsg_50_base_joint_gripper_right");
    }
}
