//! Error types.
//!
//! Transport failures are broadcast to every call multiplexed on the failed
//! connection and to every caller awaiting a shared connect, so every error
//! here is `Clone`.

use std::fmt;
use std::io;
use std::time::Duration;

use crate::Address;

/// Clonable snapshot of an [`io::Error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoError {
    pub kind: io::ErrorKind,
    pub message: String,
}

impl From<io::Error> for IoError {
    fn from(e: io::Error) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.message, self.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    Serialize(String),
    FrameTooLarge { len: usize, max: usize },
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serialize(msg) => write!(f, "serialize failed: {msg}"),
            Self::FrameTooLarge { len, max } => {
                write!(f, "frame too large: {len} bytes (max {max})")
            }
        }
    }
}

impl std::error::Error for EncodeError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    Deserialize(String),
    InvalidData(String),
    FrameTooLarge { len: usize, max: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deserialize(msg) => write!(f, "deserialize failed: {msg}"),
            Self::InvalidData(msg) => write!(f, "invalid data: {msg}"),
            Self::FrameTooLarge { len, max } => {
                write!(f, "frame too large: {len} bytes (max {max})")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Transport-level errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Closed,
    Io(IoError),
    Encode(EncodeError),
    Decode(DecodeError),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "transport closed"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Encode(e) => write!(f, "encode error: {e}"),
            Self::Decode(e) => write!(f, "decode error: {e}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Encode(e) => Some(e),
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::Io(e.into())
    }
}

/// Errors surfaced to callers of the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// No address for the qualifier at subscription time.
    Resolve { qualifier: String, message: String },
    /// The connect attempt to `address` failed or timed out.
    Connect {
        address: Address,
        source: TransportError,
    },
    /// The connection carrying this call failed.
    Transport(TransportError),
    /// The connection was closed locally while the call was in flight.
    Closed,
    /// The remote side failed this call. Displays `message` verbatim.
    Remote { code: i32, message: String },
    /// No terminal frame within the caller's deadline.
    Timeout(Duration),
    /// A single-result call completed without a payload.
    EmptyResponse,
    /// The session refused a new call because its demux table is full.
    ResourceExhausted { pending: usize, max: usize },
}

impl CallError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CallError::Timeout(_))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, CallError::Remote { .. })
    }

    /// Resolve, connect and mid-call transport failures.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            CallError::Resolve { .. }
                | CallError::Connect { .. }
                | CallError::Transport(_)
                | CallError::Closed
        )
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolve { qualifier, message } => {
                write!(f, "cannot resolve {qualifier}: {message}")
            }
            Self::Connect { address, source } => {
                write!(f, "failed to connect to {address}: {source}")
            }
            Self::Transport(e) => write!(f, "{e}"),
            Self::Closed => write!(f, "connection closed"),
            Self::Remote { message, .. } => f.write_str(message),
            Self::Timeout(d) => write!(f, "no response within {}ms", d.as_millis()),
            Self::EmptyResponse => write!(f, "stream completed without a response"),
            Self::ResourceExhausted { pending, max } => {
                write!(f, "too many pending calls ({pending}/{max})")
            }
        }
    }
}

impl std::error::Error for CallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connect { source, .. } => Some(source),
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for CallError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Closed => CallError::Closed,
            other => CallError::Transport(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ZeroTimeout(&'static str),
    ZeroMaxPending,
    InvalidAddress(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroTimeout(name) => write!(f, "{name} must be greater than zero"),
            Self::ZeroMaxPending => write!(f, "max_pending must be at least 1"),
            Self::InvalidAddress(s) => write!(f, "invalid address {s:?}, expected host:port"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_displays_verbatim() {
        let err = CallError::Remote {
            code: 500,
            message: "GreetingRequest{name='joe'}".into(),
        };
        assert_eq!(err.to_string(), "GreetingRequest{name='joe'}");
        assert!(err.is_remote());
        assert!(!err.is_connection());
    }

    #[test]
    fn closed_transport_maps_to_closed_call() {
        assert_eq!(CallError::from(TransportError::Closed), CallError::Closed);
        assert!(CallError::Closed.is_connection());
    }
}
