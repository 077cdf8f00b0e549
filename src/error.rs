//! Error types for the hashlog map and its collaborators.

use std::fmt;
use std::io;
use thiserror::Error;

/// The result type used throughout hashlog.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for hashlog operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error from the log or index storage.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Persisted data failed validation (bad checksum, bad magic, truncated record).
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// A caller broke an operation precondition.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The backing log/index combination cannot perform this operation.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// The map, log or index has already been closed.
    #[error("Already closed: {0}")]
    Closed(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An internal invariant was violated.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Several independent steps failed; every failure is kept.
    #[error("{}: {}", .context, DisplayAll(.errors))]
    Multiple {
        /// What was being attempted.
        context: String,
        /// The individual failures, in the order they happened.
        errors: Vec<Error>,
    },
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new unsupported operation error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Creates a new closed error.
    pub fn closed(msg: impl Into<String>) -> Self {
        Error::Closed(msg.into())
    }

    /// Creates a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Returns true for the I/O error kind.
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    /// Returns true for the unsupported-operation signal.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::Unsupported(_))
    }

    /// Runs both steps, even when the first fails, and folds the failures.
    ///
    /// A single failure is returned as is; two are reported together as
    /// [`Error::Multiple`].
    pub fn run_both(
        context: impl Into<String>,
        first: impl FnOnce() -> Result<()>,
        second: impl FnOnce() -> Result<()>,
    ) -> Result<()> {
        match (first(), second()) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Err(a), Err(b)) => Err(Error::Multiple {
                context: context.into(),
                errors: vec![a, b],
            }),
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

struct DisplayAll<'a>(&'a [Error]);

impl fmt::Display for DisplayAll<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}
