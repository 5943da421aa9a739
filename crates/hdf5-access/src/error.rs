//! Error types for the access layer.

use std::path::PathBuf;

use hdf5_access_format::FormatError;
use thiserror::Error;

/// The closed set of failure kinds every operation reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A group, dataset or attribute does not exist.
    NotFound,
    /// A create used a name that is already taken.
    AlreadyExists,
    /// Inconsistent sizes, a bad name or value, or a write to a read-only file.
    InvalidArgument,
    /// A stored value cannot be read as the requested type.
    TypeMismatch,
    /// Storage failure: unreadable, corrupt or unwritable file.
    Io,
}

/// Main error type for file, group, dataset and attribute operations.
#[derive(Error, Debug)]
pub enum Error {
    /// No group or dataset by that name under the parent
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// No attribute by that name on the object
    #[error("attribute '{name}' not found on {object}")]
    AttributeNotFound { object: String, name: String },

    /// Group, dataset or attribute name already taken
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Name is empty, contains '/', or is '.'
    #[error("invalid name '{0}'")]
    InvalidName(String),

    /// Logical/allocated sizes, chunk shape or compression level rejected
    #[error("invalid dimensions for {object}: {reason}")]
    InvalidDimensions { object: String, reason: String },

    /// Hyperslab outside the logical extent, or a buffer of the wrong length
    #[error("invalid selection on {object}: {reason}")]
    InvalidSelection { object: String, reason: String },

    /// Attribute value that cannot be stored, such as text with a NUL byte
    #[error("invalid value for {object}: {reason}")]
    InvalidValue { object: String, reason: String },

    /// Mutation attempted on a file opened read-only
    #[error("{} is opened read-only", .0.display())]
    ReadOnly(PathBuf),

    /// Stored element kind or shape differs from the requested one
    #[error("type mismatch on {object}: expected {expected}, found {actual}")]
    TypeMismatch {
        object: String,
        expected: String,
        actual: String,
    },

    /// The path does not hold an HDF5 file
    #[error("{} is not an HDF5 file: {source}", path.display())]
    NotHdf5 {
        path: PathBuf,
        #[source]
        source: FormatError,
    },

    /// Binary format decode or encode failure
    #[error("HDF5 format error: {0}")]
    Format(#[from] FormatError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Map this error onto its failure kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ObjectNotFound(_) | Error::AttributeNotFound { .. } => ErrorKind::NotFound,
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::InvalidName(_)
            | Error::InvalidDimensions { .. }
            | Error::InvalidSelection { .. }
            | Error::InvalidValue { .. }
            | Error::ReadOnly(_) => ErrorKind::InvalidArgument,
            Error::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Error::NotHdf5 { .. } | Error::Format(_) | Error::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn dimensions(object: &str, reason: impl Into<String>) -> Self {
        Error::InvalidDimensions {
            object: object.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn selection(object: &str, reason: impl Into<String>) -> Self {
        Error::InvalidSelection {
            object: object.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn type_mismatch(
        object: &str,
        expected: impl std::fmt::Display,
        actual: impl std::fmt::Display,
    ) -> Self {
        Error::TypeMismatch {
            object: object.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Result type for access-layer operations.
pub type Result<T> = std::result::Result<T, Error>;
