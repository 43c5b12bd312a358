//! # Error Definitions
//!
//! Every way a routed call can fail, as seen by the caller.

use std::time::Duration;

use serde_json::Value;

use crate::handler::Scope;

#[derive(Debug, Clone)]
pub enum Error {
    /// Unknown service, connection, endpoint or method.
    NotFound(String),
    /// No response arrived within the caller's window.
    Timeout { method: String, after: Duration },
    /// The remote handler ran and reported failure. The payload is forwarded as-is.
    Handler(Value),
    /// A stored value had the wrong type or could not be interpreted.
    MalformedValue(String),
    /// The store could not be reached.
    TransportUnavailable(String),
    /// An envelope could not be encoded or decoded.
    Codec(String),
    /// The target is already served by this router.
    DuplicateEndpoint(String),
    /// The method is already registered under this scope.
    DuplicateHandler { scope: Scope, method: String },
    /// The router shut down before the call settled.
    ChannelClosed,
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(what) => write!(f, "Not found: {}", what),
            Self::Timeout { method, after } => {
                write!(f, "Call to '{}' timed out after {}ms", method, after.as_millis())
            }
            Self::Handler(payload) => write!(f, "Handler error: {}", payload),
            Self::MalformedValue(msg) => write!(f, "Malformed value: {}", msg),
            Self::TransportUnavailable(msg) => write!(f, "Transport unavailable: {}", msg),
            Self::Codec(msg) => write!(f, "Envelope codec error: {}", msg),
            Self::DuplicateEndpoint(target) => write!(f, "Endpoint '{}' is already served", target),
            Self::DuplicateHandler { scope, method } => {
                write!(f, "Method '{}' is already registered in scope {}", method, scope)
            }
            Self::ChannelClosed => write!(f, "Router closed before the call settled"),
        }
    }
}

impl std::error::Error for Error {}

impl From<kvbus::Error> for Error {
    fn from(e: kvbus::Error) -> Self {
        match e {
            kvbus::Error::NotAnInteger | kvbus::Error::WrongType => Self::MalformedValue(e.to_string()),
            kvbus::Error::Unavailable(_) | kvbus::Error::Closed => Self::TransportUnavailable(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
