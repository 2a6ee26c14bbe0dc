use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::serial::PortSettings;

/// Notifications emitted by the serial manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SerialEvent {
    /// The set of available ports changed
    PortsChanged { ports: Vec<String> },
    /// A chunk of bytes arrived. Chunk boundaries are whatever the device
    /// layer delivered, not message aligned.
    DataReceived { data: Vec<u8>, port: String },
    /// A buffer was written in full
    DataSent { data: Vec<u8>, port: String },
    Error { message: String, port: String },
    ConnectionChanged { connected: bool, port: String },
}

/// Connection state machine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Point-in-time view of the manager
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Port the manager intends to be connected to. Empty once the user closes.
    pub target_port: String,
    pub settings: Option<PortSettings>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub connected_since: Option<DateTime<Utc>>,
    pub scanning: bool,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected)
    }
}
