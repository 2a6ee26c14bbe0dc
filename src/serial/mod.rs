pub mod fault;
pub mod interface;
pub mod payload;
pub mod settings;

pub use fault::{Operation, PortErrorKind};
pub use interface::{PortHandle, SerialBackend, SystemSerial};
pub use settings::{FlowControl, Parity, PortSettings, PortSettingsOverride};

use serde::{Deserialize, Serialize};

/// Descriptive metadata for one enumerated serial port
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub port_name: String,
    pub description: Option<String>,
    pub manufacturer: Option<String>,
    pub serial_number: Option<String>,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub system_location: Option<String>,
}

impl PortInfo {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }
}

/// Errors surfaced by the serial layer. The `Display` text of each variant is
/// the message emitted on the manager's error channel.
#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Empty port name")]
    EmptyPortName,

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Could not open {port}: {reason}")]
    OpenFailed { port: String, reason: PortErrorKind },

    #[error("Port not open")]
    NotOpen,

    #[error("Error writing data: {0}")]
    WriteFailed(PortErrorKind),

    #[error("Data partially sent ({written}/{requested})")]
    PartialWrite { written: usize, requested: usize },

    #[error("Invalid hex (odd length)")]
    OddHexLength,

    #[error("Invalid hex (non-hex characters)")]
    InvalidHex,

    #[error("Unsupported text encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("Manager is shut down")]
    ShutDown,

    #[error("Serial service stopped")]
    ServiceStopped,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;
