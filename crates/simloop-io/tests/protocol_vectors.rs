use simloop_io::protocol::{IncomingMessage, ProtocolVersion};

#[test]
fn parses_hello_message() {
    let raw = r#"{
        "type":"hello",
        "protocol_version":{"major":1,"minor":0},
        "capabilities":["joint_command","gripper_command"],
        "client_id":"test-client"
    }"#;

    let msg = IncomingMessage::parse(raw).expect("hello should parse");
    match msg {
        IncomingMessage::Hello(hello) => {
            assert!(hello.protocol_version.is_supported());
            assert_eq!(hello.client_id.as_deref(), Some("test-client"));
            assert_eq!(hello.capabilities.len(), 2);
        }
        _ => panic!("expected hello message"),
    }
}

#[test]
fn parses_joint_command_with_efforts() {
    let raw = r#"{
        "type":"joint_command",
        "protocol_version":{"major":1,"minor":0},
        "sequence":12,
        "group":"iiwa",
        "positions":[0.1,0.2,0.3,0.4,0.5,0.6,0.7],
        "efforts":[50,50,50,50,50,50,50]
    }"#;

    let msg = IncomingMessage::parse(raw).expect("joint command should parse");
    match msg {
        IncomingMessage::JointCommand(cmd) => {
            assert_eq!(cmd.sequence, 12);
            assert_eq!(cmd.group, "iiwa");
            assert_eq!(cmd.protocol_version, ProtocolVersion::v1());
            assert_eq!(cmd.positions.len(), 7);
            assert_eq!(cmd.efforts.as_deref().map(<[f64]>::len), Some(7));
        }
        _ => panic!("expected joint command"),
    }
}

#[test]
fn joint_command_defaults() {
    let raw = r#"{"type":"joint_command","group":"iiwa","positions":[0,0,0,0,0,0,0]}"#;
    let msg = IncomingMessage::parse(raw).expect("minimal joint command should parse");
    assert_eq!(msg.protocol_version(), ProtocolVersion::default());
    match msg {
        IncomingMessage::JointCommand(cmd) => {
            assert_eq!(cmd.sequence, 0);
            assert!(cmd.efforts.is_none());
        }
        _ => panic!("expected joint command"),
    }
}

#[test]
fn parses_gripper_command_with_default_group() {
    let raw = r#"{"type":"gripper_command","sequence":3,"position_mm":60.0,"force":25.0}"#;

    let msg = IncomingMessage::parse(raw).expect("gripper command should parse");
    match msg {
        IncomingMessage::GripperCommand(cmd) => {
            assert_eq!(cmd.group, "wsg50");
            assert_eq!(cmd.position_mm, 60.0);
            assert_eq!(cmd.force, 25.0);
        }
        _ => panic!("expected gripper command"),
    }
}

#[test]
fn rejects_command_missing_positions() {
    let raw = r#"{"type":"joint_command","group":"iiwa","sequence":1}"#;
    assert!(IncomingMessage::parse(raw).is_none());
}

#[test]
fn future_major_version_is_unsupported() {
    let raw = r#"{"type":"hello","protocol_version":{"major":2,"minor":0}}"#;
    let msg = IncomingMessage::parse(raw).expect("hello should parse");
    assert!(!msg.protocol_version().is_supported());
}
