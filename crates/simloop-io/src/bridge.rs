use crate::metrics::{
    BRIDGE_CONNECTED, COMMANDS_ACCEPTED, COMMANDS_OUT_OF_ORDER, COMMANDS_REJECTED,
    MALFORMED_MESSAGES,
};
use crate::protocol::{HelloMsg, IncomingMessage};
use crate::status::StatusBoard;
use simloop_core::actuator::{IIWA_GROUP, WSG50_GROUP};
use simloop_core::{Command, CommandBuffer};
use std::collections::BTreeMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// A client whose pending line grows past this without a newline is dropped.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Channel name used in logs and metric labels.
    pub name: String,
    pub bind_addr: String,
    /// Groups this channel may command and reports status for.
    pub groups: Vec<String>,
    pub require_handshake: bool,
    pub poll_interval: Duration,
}

impl BridgeConfig {
    pub fn arm() -> Self {
        Self {
            name: "arm".to_string(),
            bind_addr: "127.0.0.1:7000".to_string(),
            groups: vec![IIWA_GROUP.to_string()],
            require_handshake: false,
            poll_interval: Duration::from_millis(5),
        }
    }

    pub fn gripper() -> Self {
        Self {
            name: "gripper".to_string(),
            bind_addr: "127.0.0.1:7001".to_string(),
            groups: vec![WSG50_GROUP.to_string()],
            require_handshake: false,
            poll_interval: Duration::from_millis(5),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::arm()
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("bridge socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// What became of one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Handshake,
    Accepted,
    Rejected,
    OutOfOrder,
}

#[derive(Debug, Default)]
struct InboundState {
    last_sequence: BTreeMap<String, u64>,
    handshake_seen: bool,
    client_id: Option<String>,
}

impl InboundState {
    fn reset(&mut self) {
        self.last_sequence.clear();
        self.handshake_seen = false;
        self.client_id = None;
    }

    /// Sequence 0 marks an unsequenced command and is always in order.
    fn in_order(&self, group: &str, sequence: u64) -> bool {
        if sequence == 0 {
            return true;
        }
        match self.last_sequence.get(group) {
            Some(&last) if sequence <= last => {
                warn!(
                    group,
                    sequence,
                    last_sequence = last,
                    "Out-of-order command sequence"
                );
                false
            }
            _ => true,
        }
    }

    /// Only called once the command made it into the buffer, so a rejected
    /// command never burns its sequence number.
    fn record_sequence(&mut self, group: &str, sequence: u64) {
        if sequence != 0 {
            self.last_sequence.insert(group.to_string(), sequence);
        }
    }

    fn note_handshake(&mut self, hello: &HelloMsg) {
        self.handshake_seen = true;
        self.client_id = hello.client_id.clone();
    }
}

/// One command channel: a TCP listener serving a single JSON-lines client
/// at a time. Commands go into the [`CommandBuffer`]; the latest status of
/// the channel's groups is streamed back as it changes.
pub struct CommandBridge {
    config: BridgeConfig,
    listener: TcpListener,
}

impl CommandBridge {
    pub fn bind(config: BridgeConfig) -> Result<Self, BridgeError> {
        let listener =
            TcpListener::bind(&config.bind_addr).map_err(|source| BridgeError::Bind {
                addr: config.bind_addr.clone(),
                source,
            })?;
        listener.set_nonblocking(true)?;
        Ok(Self { config, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, BridgeError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Serve clients until `stop` is set.
    pub fn run(
        self,
        buffer: Arc<CommandBuffer>,
        board: Arc<StatusBoard>,
        stop: Arc<AtomicBool>,
    ) {
        let config = &self.config;
        let channel = config.name.as_str();
        let connected = BRIDGE_CONNECTED.with_label_values(&[channel]);
        connected.set(0.0);

        let addr = self
            .listener
            .local_addr()
            .map_or_else(|_| config.bind_addr.clone(), |a| a.to_string());
        info!(channel, addr = %addr, groups = ?config.groups, "Bridge listening");

        let mut client: Option<TcpStream> = None;
        let mut recv_buf: Vec<u8> = Vec::with_capacity(4096);
        let mut send_buf: Vec<u8> = Vec::new();
        let mut send_offset: usize = 0;
        let mut forwarded: BTreeMap<String, u64> = BTreeMap::new();
        let mut inbound_state = InboundState::default();

        while !stop.load(Ordering::Relaxed) {
            if client.is_none() {
                match self.listener.accept() {
                    Ok((stream, addr)) => match stream.set_nonblocking(true) {
                        Ok(()) => {
                            info!(channel, client_addr = %addr, "Bridge client connected");
                            let _ = stream.set_nodelay(true);
                            client = Some(stream);
                            connected.set(1.0);
                        }
                        Err(err) => {
                            warn!(channel, error = %err, "Failed to configure client socket");
                        }
                    },
                    Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                    Err(err) => {
                        warn!(channel, error = %err, "Bridge accept error");
                    }
                }
            }

            let mut drop_client = false;
            if let Some(stream) = client.as_mut() {
                let mut temp = [0u8; 1024];
                match stream.read(&mut temp) {
                    Ok(0) => {
                        info!(channel, "Bridge client disconnected");
                        drop_client = true;
                    }
                    Ok(n) => {
                        recv_buf.extend_from_slice(&temp[..n]);
                        while let Some(pos) = recv_buf.iter().position(|b| *b == b'\n') {
                            let line = recv_buf.drain(..=pos).collect::<Vec<u8>>();
                            handle_line(&line, config, &buffer, &mut inbound_state);
                        }
                        if recv_buf.len() > MAX_LINE_BYTES {
                            warn!(
                                channel,
                                pending_bytes = recv_buf.len(),
                                "Dropping client with oversized line"
                            );
                            MALFORMED_MESSAGES.with_label_values(&[channel]).inc();
                            drop_client = true;
                        }
                    }
                    Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                    Err(err) => {
                        warn!(channel, error = %err, "Bridge read error");
                        drop_client = true;
                    }
                }

                if !drop_client && send_buf.is_empty() {
                    for group in &config.groups {
                        let Some(status) = board.latest(group) else {
                            continue;
                        };
                        if forwarded.get(group) == Some(&status.sequence) {
                            continue;
                        }
                        forwarded.insert(group.clone(), status.sequence);
                        send_buf.extend_from_slice(status.line.as_bytes());
                        send_buf.push(b'\n');
                    }
                    send_offset = 0;
                }

                if !drop_client && !send_buf.is_empty() {
                    match stream.write(&send_buf[send_offset..]) {
                        Ok(0) => {
                            info!(channel, "Bridge client disconnected");
                            drop_client = true;
                        }
                        Ok(n) => {
                            send_offset += n;
                            if send_offset >= send_buf.len() {
                                send_buf.clear();
                                send_offset = 0;
                            }
                        }
                        Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                        Err(err) => {
                            warn!(channel, error = %err, "Bridge write error");
                            drop_client = true;
                        }
                    }
                }
            }

            if drop_client {
                client = None;
                connected.set(0.0);
                recv_buf.clear();
                send_buf.clear();
                send_offset = 0;
                forwarded.clear();
                inbound_state.reset();
            }

            std::thread::sleep(config.poll_interval);
        }

        connected.set(0.0);
        info!(channel, "Bridge stopped");
    }
}

fn handle_line(
    line: &[u8],
    config: &BridgeConfig,
    buffer: &CommandBuffer,
    inbound_state: &mut InboundState,
) -> Option<Disposition> {
    let Ok(text) = std::str::from_utf8(line) else {
        MALFORMED_MESSAGES
            .with_label_values(&[config.name.as_str()])
            .inc();
        return None;
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    match IncomingMessage::parse(trimmed) {
        Some(msg) => Some(handle_incoming(msg, config, buffer, inbound_state)),
        None => {
            debug!(channel = %config.name, line = trimmed, "Ignoring unrecognised message");
            MALFORMED_MESSAGES
                .with_label_values(&[config.name.as_str()])
                .inc();
            None
        }
    }
}

#[instrument(skip_all, fields(channel = %config.name))]
fn handle_incoming(
    msg: IncomingMessage,
    config: &BridgeConfig,
    buffer: &CommandBuffer,
    inbound_state: &mut InboundState,
) -> Disposition {
    let version = msg.protocol_version();
    if !version.is_supported() {
        warn!(
            major = version.major,
            minor = version.minor,
            "Unsupported protocol version"
        );
        return Disposition::Rejected;
    }

    let (group, sequence, command): (String, u64, Command) = match msg {
        IncomingMessage::Hello(hello) => {
            inbound_state.note_handshake(&hello);
            info!(
                client_id = ?hello.client_id,
                capabilities = ?hello.capabilities,
                "Bridge handshake received"
            );
            return Disposition::Handshake;
        }
        IncomingMessage::JointCommand(cmd) => {
            let command = cmd.to_command();
            (cmd.group, cmd.sequence, command)
        }
        IncomingMessage::GripperCommand(cmd) => {
            let command = cmd.to_command();
            (cmd.group, cmd.sequence, command)
        }
    };

    if config.require_handshake && !inbound_state.handshake_seen {
        warn!(group = %group, "Command received before handshake");
        COMMANDS_REJECTED.with_label_values(&[group.as_str()]).inc();
        return Disposition::Rejected;
    }

    if !config.groups.iter().any(|g| *g == group) {
        warn!(
            group = %group,
            allowed = ?config.groups,
            "Command for a group this channel does not serve"
        );
        COMMANDS_REJECTED.with_label_values(&[group.as_str()]).inc();
        return Disposition::Rejected;
    }

    if !inbound_state.in_order(&group, sequence) {
        COMMANDS_OUT_OF_ORDER.with_label_values(&[group.as_str()]).inc();
        return Disposition::OutOfOrder;
    }

    match buffer.set(&group, command) {
        Ok(()) => {
            inbound_state.record_sequence(&group, sequence);
            debug!(
                group = %group,
                sequence,
                client_id = ?inbound_state.client_id,
                "Command accepted"
            );
            COMMANDS_ACCEPTED.with_label_values(&[group.as_str()]).inc();
            Disposition::Accepted
        }
        Err(_) => {
            COMMANDS_REJECTED.with_label_values(&[group.as_str()]).inc();
            Disposition::Rejected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simloop_core::actuator::{iiwa_arm, wsg50_gripper};
    use std::io::{BufRead, BufReader};
    use std::time::Instant;

    fn buffer() -> CommandBuffer {
        CommandBuffer::new(vec![iiwa_arm(), wsg50_gripper()]).unwrap()
    }

    fn feed(
        line: &str,
        config: &BridgeConfig,
        buffer: &CommandBuffer,
        state: &mut InboundState,
    ) -> Option<Disposition> {
        handle_line(line.as_bytes(), config, buffer, state)
    }

    #[test]
    fn sequence_is_tracked_per_group() {
        let mut state = InboundState::default();
        assert!(state.in_order("iiwa", 5));
        state.record_sequence("iiwa", 5);
        assert!(!state.in_order("iiwa", 5));
        assert!(!state.in_order("iiwa", 3));
        assert!(state.in_order("wsg50", 1));
        assert!(state.in_order("iiwa", 0));
        state.record_sequence("iiwa", 0);
        assert!(state.in_order("iiwa", 6));
    }

    #[test]
    fn rejected_command_keeps_its_sequence_available() {
        let config = BridgeConfig::arm();
        let buffer = buffer();
        let mut state = InboundState::default();

        let invalid = r#"{"type":"joint_command","group":"iiwa","sequence":3,"positions":[0.1]}"#;
        let resend = r#"{"type":"joint_command","group":"iiwa","sequence":3,"positions":[0.1,0,0,0,0,0,0]}"#;
        assert_eq!(feed(invalid, &config, &buffer, &mut state), Some(Disposition::Rejected));
        assert_eq!(feed(resend, &config, &buffer, &mut state), Some(Disposition::Accepted));
        assert_eq!(feed(resend, &config, &buffer, &mut state), Some(Disposition::OutOfOrder));
        assert_eq!(buffer.get("iiwa").unwrap().positions()[0], 0.1);
    }

    #[test]
    fn stale_command_does_not_overwrite_newer() {
        let config = BridgeConfig::arm();
        let buffer = buffer();
        let mut state = InboundState::default();

        let newer = r#"{"type":"joint_command","group":"iiwa","sequence":2,"positions":[1,1,1,1,1,1,1]}"#;
        let older = r#"{"type":"joint_command","group":"iiwa","sequence":1,"positions":[2,2,2,2,2,2,2]}"#;
        assert_eq!(feed(newer, &config, &buffer, &mut state), Some(Disposition::Accepted));
        assert_eq!(feed(older, &config, &buffer, &mut state), Some(Disposition::OutOfOrder));
        assert_eq!(buffer.get("iiwa").unwrap().positions(), &[1.0; 7]);
    }

    #[test]
    fn channel_only_serves_its_groups() {
        let config = BridgeConfig::arm();
        let buffer = buffer();
        let mut state = InboundState::default();
        let gripper = r#"{"type":"gripper_command","sequence":1,"position_mm":40,"force":10}"#;
        assert_eq!(feed(gripper, &config, &buffer, &mut state), Some(Disposition::Rejected));
        assert_eq!(buffer.get("wsg50").unwrap().positions(), &[0.0, 0.0]);

        let config = BridgeConfig::gripper();
        assert_eq!(feed(gripper, &config, &buffer, &mut state), Some(Disposition::Accepted));
        let fingers = buffer.get("wsg50").unwrap();
        assert!((fingers.positions()[1] - 0.02).abs() < 1e-12);
    }

    #[test]
    fn handshake_gate() {
        let config = BridgeConfig {
            require_handshake: true,
            ..BridgeConfig::arm()
        };
        let buffer = buffer();
        let mut state = InboundState::default();
        let cmd = r#"{"type":"joint_command","group":"iiwa","positions":[0.1,0,0,0,0,0,0]}"#;
        assert_eq!(feed(cmd, &config, &buffer, &mut state), Some(Disposition::Rejected));
        let hello = r#"{"type":"hello","protocol_version":{"major":1,"minor":0},"client_id":"planner"}"#;
        assert_eq!(feed(hello, &config, &buffer, &mut state), Some(Disposition::Handshake));
        assert_eq!(feed(cmd, &config, &buffer, &mut state), Some(Disposition::Accepted));
    }

    #[test]
    fn invalid_and_malformed_lines() {
        let config = BridgeConfig::arm();
        let buffer = buffer();
        let mut state = InboundState::default();
        let short = r#"{"type":"joint_command","group":"iiwa","sequence":1,"positions":[0.1]}"#;
        assert_eq!(feed(short, &config, &buffer, &mut state), Some(Disposition::Rejected));
        let future = r#"{"type":"joint_command","protocol_version":{"major":2,"minor":0},"group":"iiwa","positions":[0,0,0,0,0,0,0]}"#;
        assert_eq!(feed(future, &config, &buffer, &mut state), Some(Disposition::Rejected));
        assert_eq!(feed("{not json", &config, &buffer, &mut state), None);
        assert_eq!(feed("   \n", &config, &buffer, &mut state), None);
    }

    #[test]
    fn tcp_round_trip() {
        let config = BridgeConfig {
            name: "arm-test".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            ..BridgeConfig::arm()
        };
        let bridge = CommandBridge::bind(config).unwrap();
        let addr = bridge.local_addr().unwrap();
        let buffer = Arc::new(buffer());
        let board = Arc::new(StatusBoard::new());
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let (buffer, board, stop) =
                (Arc::clone(&buffer), Arc::clone(&board), Arc::clone(&stop));
            std::thread::spawn(move || bridge.run(buffer, board, stop))
        };

        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let command = r#"{"type":"joint_command","group":"iiwa","sequence":1,"positions":[0.5,0,0,0,0,0,0]}"#;
        writeln!(stream, "{command}").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while buffer.get("iiwa").unwrap().positions()[0] != 0.5 {
            assert!(Instant::now() < deadline, "command never reached the buffer");
            std::thread::sleep(Duration::from_millis(5));
        }

        board.post("iiwa", r#"{"type":"joint_status","group":"iiwa"}"#.to_string());
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert!(line.contains("joint_status"));

        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();
    }

    #[test]
    fn oversized_line_drops_client() {
        let config = BridgeConfig {
            name: "arm-oversized".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            ..BridgeConfig::arm()
        };
        let bridge = CommandBridge::bind(config).unwrap();
        let addr = bridge.local_addr().unwrap();
        let buffer = Arc::new(buffer());
        let board = Arc::new(StatusBoard::new());
        let stop = Arc::new(AtomicBool::new(false));
        let malformed = MALFORMED_MESSAGES.with_label_values(&["arm-oversized"]);
        let before = malformed.get();

        let handle = {
            let (buffer, board, stop) =
                (Arc::clone(&buffer), Arc::clone(&board), Arc::clone(&stop));
            std::thread::spawn(move || bridge.run(buffer, board, stop))
        };

        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        // Writes may fail once the bridge hangs up; the hang-up is what we wait for.
        let _ = stream.write_all(&vec![b'x'; MAX_LINE_BYTES + 4096]);

        let mut sink = [0u8; 64];
        let closed = matches!(stream.read(&mut sink), Ok(0) | Err(_));
        assert!(closed, "bridge kept the client");
        assert_eq!(malformed.get(), before + 1);

        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();
    }
}
