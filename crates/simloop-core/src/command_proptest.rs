#[cfg(test)]
mod proptest_command {
    use crate::actuator::{iiwa_arm, wsg50_gripper, WSG50_MAX_FORCE};
    use crate::command::*;
    use crate::CommandBuffer;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(2000))]

        // Property: finite positions within the joint count are always accepted
        #[test]
        fn finite_positions_accepted(
            positions in prop::collection::vec(-10.0f64..10.0, 7),
        ) {
            let result = Command::new(positions.clone()).validate(&iiwa_arm());
            prop_assert!(result.is_ok(), "rejected {:?}: {:?}", positions, result);
            let snapshot = result.unwrap();
            prop_assert_eq!(snapshot.positions(), positions.as_slice());
        }

        // Property: any wrong joint count is rejected
        #[test]
        fn wrong_length_rejected(len in 0usize..16) {
            prop_assume!(len != 7);
            let result = Command::new(vec![0.0; len]).validate(&iiwa_arm());
            let is_count = matches!(result, Err(CommandViolation::JointCount { .. }));
            prop_assert!(is_count, "expected JointCount, got {:?}", result);
        }

        // Property: gripper efforts above the force limit are always rejected
        #[test]
        fn excessive_grip_force_rejected(force in (WSG50_MAX_FORCE + 0.001)..1.0e6) {
            let result = Command::new(vec![-0.01, 0.01])
                .with_efforts(vec![force, force])
                .validate(&wsg50_gripper());
            let is_limit = matches!(result, Err(CommandViolation::EffortAboveLimit { .. }));
            prop_assert!(is_limit, "expected EffortAboveLimit, got {:?}", result);
        }

        // Property: the last write wins regardless of how many came before
        #[test]
        fn buffer_keeps_last_write(
            writes in prop::collection::vec(prop::collection::vec(-3.0f64..3.0, 7), 1..20),
        ) {
            let buffer = CommandBuffer::new(vec![iiwa_arm(), wsg50_gripper()]).unwrap();
            for positions in &writes {
                buffer.set("iiwa", Command::new(positions.clone())).unwrap();
            }
            let frame = buffer.get_all();
            prop_assert_eq!(frame["iiwa"].positions(), writes.last().unwrap().as_slice());
            prop_assert_eq!(frame["wsg50"].positions(), &[0.0, 0.0][..]);
        }
    }
}
