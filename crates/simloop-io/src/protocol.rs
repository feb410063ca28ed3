use serde::{Deserialize, Serialize};
use simloop_core::actuator::WSG50_GROUP;
use simloop_core::{Command, CommandSnapshot, GroupState};

/// Finger travel per millimetre of commanded opening; each finger moves
/// half the opening.
pub const GRIPPER_MM_TO_FINGER_M: f64 = 0.0005;

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const fn v1() -> Self {
        Self { major: 1, minor: 0 }
    }

    /// Messages without a version are treated as v1.
    pub fn is_supported(&self) -> bool {
        matches!(self.major, 0 | 1)
    }
}

#[derive(Debug, Deserialize)]
pub struct HelloMsg {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub protocol_version: ProtocolVersion,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub client_id: Option<String>,
}

/// Joint-space position command, optionally with per-joint effort limits.
#[derive(Debug, Deserialize)]
pub struct JointCommandMsg {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub protocol_version: ProtocolVersion,
    #[serde(default)]
    pub sequence: u64,
    pub group: String,
    pub positions: Vec<f64>,
    #[serde(default)]
    pub efforts: Option<Vec<f64>>,
}

impl JointCommandMsg {
    pub fn to_command(&self) -> Command {
        let command = Command::new(self.positions.clone());
        match &self.efforts {
            Some(efforts) => command.with_efforts(efforts.clone()),
            None => command,
        }
    }
}

/// Parallel-gripper command in the WSG driver's units.
#[derive(Debug, Deserialize)]
pub struct GripperCommandMsg {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub protocol_version: ProtocolVersion,
    #[serde(default)]
    pub sequence: u64,
    #[serde(default = "default_gripper_group")]
    pub group: String,
    /// Opening between the fingers.
    pub position_mm: f64,
    /// Grip force applied by each finger.
    pub force: f64,
}

fn default_gripper_group() -> String {
    WSG50_GROUP.to_string()
}

impl GripperCommandMsg {
    pub fn to_command(&self) -> Command {
        let half_opening = self.position_mm * GRIPPER_MM_TO_FINGER_M;
        Command::new(vec![-half_opening, half_opening])
            .with_efforts(vec![self.force, self.force])
    }
}

#[derive(Debug)]
pub enum IncomingMessage {
    Hello(HelloMsg),
    JointCommand(JointCommandMsg),
    GripperCommand(GripperCommandMsg),
}

impl IncomingMessage {
    pub fn parse(line: &str) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(line).ok()?;
        let msg_type = value.get("type")?.as_str()?;
        match msg_type {
            "hello" => serde_json::from_value(value)
                .ok()
                .map(IncomingMessage::Hello),
            "joint_command" => serde_json::from_value(value)
                .ok()
                .map(IncomingMessage::JointCommand),
            "gripper_command" => serde_json::from_value(value)
                .ok()
                .map(IncomingMessage::GripperCommand),
            _ => None,
        }
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        match self {
            Self::Hello(m) => m.protocol_version,
            Self::JointCommand(m) => m.protocol_version,
            Self::GripperCommand(m) => m.protocol_version,
        }
    }
}

/// Which status message a group is reported with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFormat {
    Joint,
    Gripper,
}

#[derive(Debug, Serialize)]
pub struct JointStatusMsg<'a> {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub protocol_version: ProtocolVersion,
    pub sequence: u64,
    pub group: &'a str,
    pub sim_time_s: f64,
    pub unix_us: u64,
    pub position_measured: &'a [f64],
    pub velocity_estimated: &'a [f64],
    pub torque_measured: &'a [f64],
    pub position_commanded: &'a [f64],
}

#[derive(Debug, Serialize)]
pub struct GripperStatusMsg<'a> {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub protocol_version: ProtocolVersion,
    pub sequence: u64,
    pub group: &'a str,
    pub sim_time_s: f64,
    pub unix_us: u64,
    /// Distance between the fingers.
    pub position_mm: f64,
    pub force: f64,
    /// Rate of change of the finger distance.
    pub speed_mm_per_s: f64,
}

impl<'a> JointStatusMsg<'a> {
    pub fn new(
        group: &'a str,
        state: &'a GroupState,
        commanded: Option<&'a CommandSnapshot>,
    ) -> Self {
        Self {
            msg_type: "joint_status",
            protocol_version: ProtocolVersion::v1(),
            sequence: 0,
            group,
            sim_time_s: 0.0,
            unix_us: 0,
            position_measured: &state.positions,
            velocity_estimated: &state.velocities,
            torque_measured: &state.efforts,
            position_commanded: commanded.map(|c| c.positions()).unwrap_or_default(),
        }
    }
}

impl<'a> GripperStatusMsg<'a> {
    /// `None` unless the group has exactly two fingers.
    pub fn from_state(group: &'a str, state: &GroupState) -> Option<Self> {
        let &[left_q, right_q] = state.positions.as_slice() else {
            return None;
        };
        let &[left_v, right_v] = state.velocities.as_slice() else {
            return None;
        };
        let &[left_e, right_e] = state.efforts.as_slice() else {
            return None;
        };
        Some(Self {
            msg_type: "gripper_status",
            protocol_version: ProtocolVersion::v1(),
            sequence: 0,
            group,
            sim_time_s: 0.0,
            unix_us: 0,
            position_mm: (right_q - left_q) * 1000.0,
            force: (right_e - left_e) / 2.0,
            speed_mm_per_s: (right_v - left_v) * 1000.0,
        })
    }
}
