//! Error types for worlddb
//!
//! Every structural invariant violation (schema drift, identity mismatch,
//! allocator overlap) is reported through this enum and propagated
//! immediately. Nothing in the store retries or repairs automatically.
//! We use `thiserror` for `Display` and `Error` implementations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for worlddb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the object store
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the underlying files
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Identification header disagrees with the declared record layout
    #[error("Schema mismatch in {path}: {detail}")]
    SchemaMismatch {
        /// File whose header did not match
        path: PathBuf,
        /// What differed
        detail: String,
    },

    /// Record index past a configured maximum
    #[error("Index {index} out of bounds (max {max})")]
    Bounds {
        /// Requested index
        index: u64,
        /// Configured limit
        max: u64,
    },

    /// On-disk structures disagree with each other
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Generation hash of a UID does not match the OID table
    #[error("Stale reference {uid}: stored generation hash is {stored:#010x}")]
    StaleReference {
        /// The UID that was presented
        uid: String,
        /// The generation hash currently stored for that OID
        stored: i32,
    },

    /// OID out of range or freed
    #[error("Not found: {0}")]
    NotFound(String),

    /// No mapping exists for a value shape, or a container cannot hold it
    #[error("Unsupported value for '{field}': {reason}")]
    UnsupportedValue {
        /// Field (or container) being encoded
        field: String,
        /// Why the value was rejected
        reason: String,
    },

    /// UID string could not be decoded
    #[error("Invalid UID: {0}")]
    InvalidUid(String),

    /// Stored class has not been registered in this process
    #[error("Unknown class: {0}")]
    UnknownClass(String),

    /// Invalid operation or state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Configuration could not be read or is out of range
    #[error("Configuration error: {0}")]
    Config(String),

    /// Another handle holds the directory lock
    #[error("Database at {0} is already in use")]
    Locked(PathBuf),
}

impl Error {
    /// Build a `Corruption` error from any displayable message
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Build an `UnsupportedValue` error
    pub fn unsupported(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::UnsupportedValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Build an `InvalidOperation` error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Error::InvalidOperation(msg.into())
    }

    /// Whether this error signals a broken on-disk invariant.
    ///
    /// Fatal errors mean the directory can no longer be trusted; the caller
    /// should stop using the database handle.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::SchemaMismatch { .. } | Error::Corruption(_) | Error::Bounds { .. }
        )
    }

    /// Whether this error is a lookup miss (stale or absent reference)
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::StaleReference { .. })
    }
}
