pub mod bridge;
pub mod metrics;
pub mod protocol;
pub mod status;

pub use bridge::{BridgeConfig, BridgeError, CommandBridge, Disposition};
pub use metrics::{init_metrics, serve_metrics, LoopStatusSync, MetricsPublisher};
pub use protocol::{
    GripperCommandMsg, GripperStatusMsg, IncomingMessage, JointCommandMsg, JointStatusMsg,
    ProtocolVersion, StatusFormat,
};
pub use status::{BridgePublisher, StatusBoard, StatusLine};
