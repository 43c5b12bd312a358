//! Store command failures.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The stored value, or the result of the operation, is not a valid `i64`.
    NotAnInteger,
    /// The command expects a different record type than the key holds.
    WrongType,
    /// The store cannot be reached.
    Unavailable(String),
    /// This connection was closed.
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnInteger => write!(f, "ERR value is not an integer or out of range"),
            Self::WrongType => write!(f, "WRONGTYPE Operation against a key holding the wrong kind of value"),
            Self::Unavailable(msg) => write!(f, "Store unavailable: {}", msg),
            Self::Closed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
