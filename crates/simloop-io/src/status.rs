use crate::protocol::{GripperStatusMsg, JointStatusMsg, StatusFormat};
use simloop_core::{PublishError, StatusFrame, StatusPublisher};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// One encoded status line and the per-group sequence it was posted under.
#[derive(Debug, Clone)]
pub struct StatusLine {
    pub sequence: u64,
    pub line: Arc<str>,
}

/// Latest encoded status per group, handed from the control loop to the
/// bridge threads. Only the newest line is kept; slow readers skip lines
/// rather than holding up the loop.
#[derive(Debug, Default)]
pub struct StatusBoard {
    slots: Mutex<BTreeMap<String, StatusLine>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by the control loop's publisher.
    pub fn post(&self, group: &str, line: String) -> u64 {
        let mut slots = self.lock();
        let sequence = slots.get(group).map_or(1, |s| s.sequence + 1);
        slots.insert(
            group.to_string(),
            StatusLine {
                sequence,
                line: line.into(),
            },
        );
        sequence
    }

    /// Called by bridge threads.
    pub fn latest(&self, group: &str) -> Option<StatusLine> {
        self.lock().get(group).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, StatusLine>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Encodes each configured group's state as a JSON status line and posts
/// it to a [`StatusBoard`].
pub struct BridgePublisher {
    board: Arc<StatusBoard>,
    formats: BTreeMap<String, StatusFormat>,
    sequence: u64,
}

impl BridgePublisher {
    pub fn new(board: Arc<StatusBoard>) -> Self {
        Self {
            board,
            formats: BTreeMap::new(),
            sequence: 0,
        }
    }

    pub fn report(mut self, group: impl Into<String>, format: StatusFormat) -> Self {
        self.formats.insert(group.into(), format);
        self
    }

    fn encode(
        &self,
        group: &str,
        format: StatusFormat,
        status: &StatusFrame<'_>,
    ) -> Result<Option<String>, PublishError> {
        let Some(state) = status.observed.get(group) else {
            return Ok(None);
        };
        let sim_time_s = status.sim_time.as_secs_f64();
        let encoded = match format {
            StatusFormat::Joint => {
                let mut msg = JointStatusMsg::new(group, state, status.commanded.get(group));
                msg.sequence = self.sequence;
                msg.sim_time_s = sim_time_s;
                msg.unix_us = status.unix_us;
                serde_json::to_string(&msg)
            }
            StatusFormat::Gripper => {
                let mut msg = GripperStatusMsg::from_state(group, state).ok_or_else(|| {
                    PublishError::Encode(format!(
                        "group {group} has {} joints, gripper status needs 2",
                        state.positions.len()
                    ))
                })?;
                msg.sequence = self.sequence;
                msg.sim_time_s = sim_time_s;
                msg.unix_us = status.unix_us;
                serde_json::to_string(&msg)
            }
        };
        encoded
            .map(Some)
            .map_err(|e| PublishError::Encode(e.to_string()))
    }
}

impl StatusPublisher for BridgePublisher {
    fn publish(&mut self, status: &StatusFrame<'_>) -> Result<(), PublishError> {
        self.sequence = self.sequence.wrapping_add(1);
        let mut first_err = None;
        for (group, format) in &self.formats {
            match self.encode(group, *format, status) {
                Ok(Some(line)) => {
                    self.board.post(group, line);
                }
                Ok(None) => {}
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
