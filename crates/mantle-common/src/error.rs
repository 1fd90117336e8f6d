//! Error types for mantle

use bson::{doc, Document};
use thiserror::Error;

/// Result type alias for mantle operations
pub type Result<T> = std::result::Result<T, MantleError>;

/// The two error kinds a caller can observe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Raised before any command was submitted
    Validation,
    /// Raised after at least one round trip to the server
    Operation,
}

/// Unified error type for all mantle operations
#[derive(Error, Debug, Clone)]
pub enum MantleError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// The server answered, but the answer means the operation failed
    #[error("Operation error: {0}")]
    Operation(String),

    #[error("MongoDB error: {0}")]
    MongoDB(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MantleError {
    /// Classifies this error as a validation or an operation failure
    pub fn kind(&self) -> ErrorKind {
        match self {
            MantleError::Validation(_) => ErrorKind::Validation,
            _ => ErrorKind::Operation,
        }
    }

    /// Returns true if no command was submitted before this error was raised
    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    /// The bare message, without the variant prefix
    pub fn message(&self) -> &str {
        match self {
            MantleError::Validation(msg)
            | MantleError::Operation(msg)
            | MantleError::MongoDB(msg)
            | MantleError::Serialization(msg)
            | MantleError::Deserialization(msg)
            | MantleError::Connection(msg)
            | MantleError::Internal(msg) => msg,
        }
    }

    /// Renders the failure envelope `{ok: false, err: true, errmsg}`
    ///
    /// Every failing operation can be reported in this one shape, whichever
    /// step produced the error.
    pub fn to_envelope(&self) -> Document {
        doc! {
            "ok": false,
            "err": true,
            "errmsg": self.message(),
        }
    }
}

impl From<bson::ser::Error> for MantleError {
    fn from(err: bson::ser::Error) -> Self {
        MantleError::Serialization(format!("BSON serialization error: {}", err))
    }
}

impl From<bson::de::Error> for MantleError {
    fn from(err: bson::de::Error) -> Self {
        MantleError::Deserialization(format!("BSON deserialization error: {}", err))
    }
}

// MongoDB-specific error conversions (when mongodb-errors feature is enabled)
#[cfg(feature = "mongodb-errors")]
impl From<mongodb::error::Error> for MantleError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind as DriverKind;
        match err.kind.as_ref() {
            DriverKind::Io(_) | DriverKind::ServerSelection { .. } | DriverKind::DnsResolve { .. } => {
                MantleError::Connection(err.to_string())
            }
            _ => MantleError::MongoDB(err.to_string()),
        }
    }
}
