use crate::types::DeviceId;

/// Failure to turn a datagram into a [`crate::codec::Packet`].
///
/// Decode errors are always recovered locally: the receive loop drops the
/// datagram and keeps going.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Fewer bytes are available than the header or payload requires.
    #[error("truncated packet: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// The message type is not one this library understands.
    #[error("unknown message type {0}")]
    UnknownType(u16),

    /// The header carries a protocol number other than 1024.
    #[error("unsupported protocol number {0}")]
    Protocol(u16),
}

/// Errors returned to the caller of a command.
///
/// Failures to reach individual devices are not errors; they are recorded
/// per device in the [`crate::DispatchReport`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The targeted device is not in the registry.
    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),

    /// A command parameter does not fit the wire format.
    #[error("invalid {name}: {value} is outside 0..=65535")]
    InvalidParameter { name: &'static str, value: u32 },

    /// Acknowledgements were requested but discovery is not receiving.
    #[error("acknowledgements require discovery to be running")]
    NotListening,
}

/// All error types that can occur when talking to LIFX devices.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A network socket operation failed.
    #[error("socket {action} error: {err:?}")]
    Socket { action: String, err: std::io::Error },

    /// The discovery engine was already stopped and cannot be restarted.
    #[error("discovery engine is stopped")]
    EngineStopped,

    /// Failed to parse a [`DeviceId`] from a string.
    #[error("invalid device id: {0}")]
    InvalidDeviceId(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl Error {
    /// Create a new socket error
    pub fn socket(action: &str, err: std::io::Error) -> Self {
        Error::Socket {
            action: action.to_string(),
            err,
        }
    }
}

/// Hacky implementation of PartialEq for testing
#[cfg(test)]
impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}
