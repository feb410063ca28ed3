use crate::actuator::ActuatorGroup;
use crate::command::{Command, CommandSnapshot, CommandViolation};
use crate::error::ConfigError;
use log::warn;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Point-in-time copy of the latest command for every group.
pub type CommandFrame = BTreeMap<String, CommandSnapshot>;

/// Latest-value command store shared between command handlers and the loop.
///
/// A single mutex guards the whole map. Writers hold it only to swap one
/// snapshot in; the reader holds it only to clone the map. Snapshots share
/// their vectors, so the clone is a handful of reference-count bumps.
pub struct CommandBuffer {
    groups: BTreeMap<String, ActuatorGroup>,
    latest: Mutex<CommandFrame>,
}

impl CommandBuffer {
    pub fn new(groups: impl IntoIterator<Item = ActuatorGroup>) -> Result<Self, ConfigError> {
        let mut registry = BTreeMap::new();
        let mut latest = BTreeMap::new();
        for group in groups {
            let name = group.name().to_string();
            if registry.contains_key(&name) {
                return Err(ConfigError::DuplicateGroup(name));
            }
            latest.insert(name.clone(), CommandSnapshot::zeros(group.dof()));
            registry.insert(name, group);
        }
        Ok(Self {
            groups: registry,
            latest: Mutex::new(latest),
        })
    }

    /// Called by command handlers. Invalid commands leave the group untouched.
    pub fn set(&self, group: &str, command: Command) -> Result<(), CommandViolation> {
        let Some(registered) = self.groups.get(group) else {
            warn!("Ignoring command for unknown actuator group {group}");
            return Err(CommandViolation::UnknownGroup {
                group: group.to_string(),
            });
        };

        let snapshot = command.validate(registered).inspect_err(|violation| {
            warn!("Ignoring command for {group}: {violation}");
        })?;

        // Validation happens outside the lock.
        if let Some(slot) = self.lock().get_mut(group) {
            *slot = snapshot;
        }
        Ok(())
    }

    /// Called by the control loop once per iteration.
    pub fn get_all(&self) -> CommandFrame {
        self.lock().clone()
    }

    pub fn get(&self, group: &str) -> Option<CommandSnapshot> {
        self.lock().get(group).cloned()
    }

    /// Reset every group to its hold-at-zero default.
    pub fn clear(&self) {
        let mut latest = self.lock();
        for (name, group) in &self.groups {
            latest.insert(name.clone(), CommandSnapshot::zeros(group.dof()));
        }
    }

    // A panicking writer can only poison the lock after a whole snapshot was
    // swapped in or before it was touched, so the map is always consistent.
    fn lock(&self) -> MutexGuard<'_, CommandFrame> {
        self.latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::{iiwa_arm, wsg50_gripper};
    use std::sync::Arc;
    use std::thread;

    fn buffer() -> CommandBuffer {
        CommandBuffer::new(vec![iiwa_arm(), wsg50_gripper()]).unwrap()
    }

    #[test]
    fn defaults_to_zero_targets() {
        let frame = buffer().get_all();
        assert_eq!(frame.len(), 2);
        assert_eq!(frame["iiwa"].positions(), &[0.0; 7]);
        assert_eq!(frame["wsg50"].positions(), &[0.0; 2]);
        assert!(frame["wsg50"].efforts().is_none());
    }

    #[test]
    fn back_to_back_sets_keep_the_latest() {
        let buffer = buffer();
        buffer.set("iiwa", Command::new(vec![0.0; 7])).unwrap();
        buffer.set("iiwa", Command::new(vec![1.0; 7])).unwrap();
        assert_eq!(buffer.get_all()["iiwa"].positions(), &[1.0; 7]);
    }

    #[test]
    fn groups_do_not_interfere() {
        let buffer = buffer();
        buffer
            .set(
                "wsg50",
                Command::new(vec![-0.02, 0.02]).with_efforts(vec![40.0, 40.0]),
            )
            .unwrap();
        let before = buffer.get("wsg50").unwrap();
        buffer.set("iiwa", Command::new(vec![0.3; 7])).unwrap();
        assert_eq!(buffer.get("wsg50").unwrap(), before);
    }

    #[test]
    fn unknown_group_is_ignored() {
        let buffer = buffer();
        let before = buffer.get_all();
        let res = buffer.set("ur5", Command::new(vec![1.0; 6]));
        assert!(matches!(res, Err(CommandViolation::UnknownGroup { .. })));
        assert_eq!(buffer.get_all(), before);
    }

    #[test]
    fn invalid_command_keeps_previous_snapshot() {
        let buffer = buffer();
        buffer.set("iiwa", Command::new(vec![0.25; 7])).unwrap();
        let mut bad = vec![0.5; 7];
        bad[0] = f64::NAN;
        assert!(buffer.set("iiwa", Command::new(bad)).is_err());
        assert_eq!(buffer.get_all()["iiwa"].positions(), &[0.25; 7]);
    }

    #[test]
    fn duplicate_groups_rejected() {
        let res = CommandBuffer::new(vec![iiwa_arm(), iiwa_arm()]);
        assert!(matches!(res, Err(ConfigError::DuplicateGroup(_))));
    }

    #[test]
    fn clear_restores_defaults() {
        let buffer = buffer();
        buffer.set("iiwa", Command::new(vec![1.0; 7])).unwrap();
        buffer.clear();
        assert_eq!(buffer.get_all()["iiwa"].positions(), &[0.0; 7]);
    }

    #[test]
    fn concurrent_writers_never_tear_snapshots() {
        let buffer = Arc::new(buffer());
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for i in 0..500 {
                        let value = (w * 1000 + i) as f64;
                        buffer.set("iiwa", Command::new(vec![value; 7])).unwrap();
                    }
                })
            })
            .collect();

        for _ in 0..500 {
            let frame = buffer.get_all();
            let positions = frame["iiwa"].positions();
            assert!(positions.iter().all(|p| *p == positions[0]));
        }
        for writer in writers {
            writer.join().unwrap();
        }

        let last = buffer.get_all()["iiwa"].positions()[0] as usize;
        assert_eq!(last % 1000, 499);
    }
}
