//! Classification of low-level device errors into a stable taxonomy.

use std::io;

use super::SerialError;

/// What the manager was doing when a device error surfaced. Used to pick a
/// category when the error itself is not specific enough.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Open,
    Read,
    Write,
}

/// Stable error categories reported by the device layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PortErrorKind {
    #[error("No error")]
    NoError,

    #[error("Device not found")]
    DeviceNotFound,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Error opening port")]
    OpenFailed,

    #[error("Write error")]
    WriteError,

    #[error("Read error")]
    ReadError,

    #[error("Port disconnected")]
    ResourceError,

    #[error("Unsupported operation")]
    UnsupportedOperation,

    #[error("Timeout")]
    Timeout,

    #[error("Port not open")]
    NotOpen,

    #[error("Unknown error ({0})")]
    Unknown(i32),
}

impl PortErrorKind {
    /// Map a serial layer error to its category
    pub fn classify(err: &SerialError, op: Operation) -> Self {
        match err {
            SerialError::IoError(e) => Self::from_io(e.kind(), e.raw_os_error(), op),
            SerialError::SerialportError(e) => match e.kind() {
                serialport::ErrorKind::NoDevice => PortErrorKind::DeviceNotFound,
                serialport::ErrorKind::InvalidInput if op == Operation::Open => {
                    PortErrorKind::OpenFailed
                }
                serialport::ErrorKind::InvalidInput => PortErrorKind::UnsupportedOperation,
                serialport::ErrorKind::Io(kind) => Self::from_io(kind, None, op),
                serialport::ErrorKind::Unknown => PortErrorKind::Unknown(-1),
            },
            SerialError::WriteFailed(kind)
            | SerialError::OpenFailed { reason: kind, .. } => *kind,
            SerialError::NotOpen => PortErrorKind::NotOpen,
            _ => Self::fallback(op),
        }
    }

    fn from_io(kind: io::ErrorKind, raw: Option<i32>, op: Operation) -> Self {
        if raw.is_some_and(is_device_gone_code) {
            return PortErrorKind::ResourceError;
        }
        match kind {
            io::ErrorKind::NotFound => PortErrorKind::DeviceNotFound,
            io::ErrorKind::PermissionDenied => PortErrorKind::PermissionDenied,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => PortErrorKind::Timeout,
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected => PortErrorKind::ResourceError,
            io::ErrorKind::Unsupported => PortErrorKind::UnsupportedOperation,
            _ => match raw {
                Some(code) => PortErrorKind::Unknown(code),
                None => Self::fallback(op),
            },
        }
    }

    fn fallback(op: Operation) -> Self {
        match op {
            Operation::Open => PortErrorKind::OpenFailed,
            Operation::Read => PortErrorKind::ReadError,
            Operation::Write => PortErrorKind::WriteError,
        }
    }

    /// Errors meaning the device went away. These close the connection while
    /// keeping the reconnection target.
    pub fn is_device_loss(&self) -> bool {
        matches!(self, PortErrorKind::ResourceError | PortErrorKind::DeviceNotFound)
    }
}

// EIO, ENXIO, ENODEV
#[cfg(unix)]
fn is_device_gone_code(code: i32) -> bool {
    matches!(code, 5 | 6 | 19)
}

// ERROR_BAD_COMMAND, ERROR_GEN_FAILURE, ERROR_DEVICE_NOT_CONNECTED
#[cfg(windows)]
fn is_device_gone_code(code: i32) -> bool {
    matches!(code, 22 | 31 | 1167)
}

#[cfg(not(any(unix, windows)))]
fn is_device_gone_code(_code: i32) -> bool {
    false
}
