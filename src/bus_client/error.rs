// SPDX-License-Identifier: MPL-2.0

//! Error types for client operations.
//!
//! The taxonomy distinguishes synchronous misuse errors (closed client, bad
//! arguments) from connection-level faults that the engine absorbs into its
//! reconnect loop.

use std::error::Error;
use std::fmt;
use std::io;

use crate::bus_wire::FrameError;

/// Error type for all public client operations.
#[derive(Debug)]
pub enum ClientError {
    /// The client has been closed; every subsequent operation fails fast.
    Closed,

    /// Invalid client configuration (e.g. an empty host list).
    Configuration { field: String, reason: String },

    /// A subject that is empty or contains whitespace would corrupt the
    /// frame grammar and is rejected before encoding.
    InvalidSubject { subject: String },

    /// An argument outside its valid range.
    InvalidArgument { message: String },

    /// `reply` was called on a message that carries no reply subject.
    NotARequest,

    /// Network I/O fault. Absorbed by the reconnect loop when it occurs on
    /// an established connection; surfaced directly from dial failures.
    Network { kind: io::ErrorKind, message: String },

    /// The broker sent a frame the client could not decode, or an `-ERR`.
    Protocol { message: String },
}

impl ClientError {
    /// Returns true if the fault is transient and a reconnect can clear it.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Protocol { .. })
    }

    pub(crate) fn from_io_error(error: io::Error, context: &str) -> Self {
        Self::Network {
            kind: error.kind(),
            message: format!("{}: {}", context, error),
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "client is closed"),
            Self::Configuration { field, reason } => {
                write!(f, "invalid configuration for '{}': {}", field, reason)
            }
            Self::InvalidSubject { subject } => {
                write!(f, "invalid subject: {:?}", subject)
            }
            Self::InvalidArgument { message } => write!(f, "invalid argument: {}", message),
            Self::NotARequest => write!(f, "message has no reply subject"),
            Self::Network { kind, message } => {
                write!(f, "network error ({:?}): {}", kind, message)
            }
            Self::Protocol { message } => write!(f, "protocol error: {}", message),
        }
    }
}

impl Error for ClientError {}

impl From<io::Error> for ClientError {
    fn from(error: io::Error) -> Self {
        Self::Network {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl From<FrameError> for ClientError {
    fn from(error: FrameError) -> Self {
        Self::Protocol {
            message: error.to_string(),
        }
    }
}

/// Type alias for Result with ClientError.
pub type ClientResult<T> = Result<T, ClientError>;
