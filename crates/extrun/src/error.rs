//! # Error Definitions
//!
//! What extension code and the manager see. Routed-call failures keep their
//! `extrpc` classification so callers can still match on `NotFound` or
//! `Timeout`.

use crate::datastore;

#[derive(Debug)]
pub enum Error {
    Rpc(extrpc::Error),
    Data(datastore::Error),
    /// The extension is not loaded for that connection.
    NotLoaded { extension: String, connection: String },
    /// An extension's own `initialize` or `start` failed.
    Extension { extension: String, message: String },
}

impl Error {
    /// The routed-call failure, if this is one.
    pub fn rpc(&self) -> Option<&extrpc::Error> {
        match self {
            Self::Rpc(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.rpc().is_some_and(extrpc::Error::is_not_found)
    }

    pub fn is_timeout(&self) -> bool {
        self.rpc().is_some_and(extrpc::Error::is_timeout)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rpc(e) => write!(f, "{}", e),
            Self::Data(e) => write!(f, "{}", e),
            Self::NotLoaded { extension, connection } => {
                write!(f, "Extension '{}' is not loaded for '{}'", extension, connection)
            }
            Self::Extension { extension, message } => {
                write!(f, "Extension '{}' failed: {}", extension, message)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Rpc(e) => Some(e),
            Self::Data(e) => Some(e),
            _ => None,
        }
    }
}

impl From<extrpc::Error> for Error {
    fn from(e: extrpc::Error) -> Self {
        Self::Rpc(e)
    }
}

impl From<kvbus::Error> for Error {
    fn from(e: kvbus::Error) -> Self {
        Self::Rpc(e.into())
    }
}

impl From<datastore::Error> for Error {
    fn from(e: datastore::Error) -> Self {
        Self::Data(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
