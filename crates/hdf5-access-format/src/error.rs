//! Error types for HDF5 format decoding and encoding.

use core::fmt;

/// Errors raised while decoding or encoding HDF5 binary structures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// The HDF5 magic signature was not found at any valid offset.
    SignatureNotFound,
    /// A structure carries a version this crate does not handle.
    UnsupportedVersion {
        /// Structure being decoded.
        structure: &'static str,
        /// Version found in the file.
        version: u8,
    },
    /// Unexpected end of data.
    UnexpectedEof {
        /// Number of bytes expected.
        expected: usize,
        /// Number of bytes actually available.
        available: usize,
    },
    /// Invalid offset size (must be 2, 4, or 8).
    InvalidOffsetSize(u8),
    /// Invalid length size (must be 2, 4, or 8).
    InvalidLengthSize(u8),
    /// A block signature such as `OHDR`, `TREE` or `GCOL` did not match.
    InvalidSignature {
        /// The signature that was expected.
        expected: &'static str,
    },
    /// Jenkins lookup3 checksum mismatch.
    ChecksumMismatch {
        /// The checksum stored in the file.
        expected: u32,
        /// The checksum we computed.
        computed: u32,
    },
    /// Unknown message type that is marked as must-understand.
    UnsupportedMessage(u16),
    /// Datatype class outside the 0..=10 range.
    InvalidDatatypeClass(u8),
    /// A structure decoded but its contents are inconsistent.
    Malformed(String),
    /// A valid HDF5 feature this crate does not implement.
    Unsupported(String),
    /// Filter decode or encode failure.
    Filter(String),
    /// Buffer length does not match the described shape.
    DataSizeMismatch {
        /// Bytes the shape requires.
        expected: usize,
        /// Bytes supplied.
        actual: usize,
    },
    /// A data buffer of this many bytes could not be allocated.
    AllocationFailed(u64),
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::SignatureNotFound => {
                write!(f, "HDF5 signature not found at any valid offset")
            }
            FormatError::UnsupportedVersion { structure, version } => {
                write!(f, "unsupported {structure} version: {version}")
            }
            FormatError::UnexpectedEof {
                expected,
                available,
            } => {
                write!(f, "unexpected EOF: need {expected} bytes, have {available}")
            }
            FormatError::InvalidOffsetSize(s) => {
                write!(f, "invalid offset size: {s} (must be 2, 4, or 8)")
            }
            FormatError::InvalidLengthSize(s) => {
                write!(f, "invalid length size: {s} (must be 2, 4, or 8)")
            }
            FormatError::InvalidSignature { expected } => {
                write!(f, "invalid block signature, expected {expected}")
            }
            FormatError::ChecksumMismatch { expected, computed } => {
                write!(
                    f,
                    "checksum mismatch: expected {expected:#010x}, computed {computed:#010x}"
                )
            }
            FormatError::UnsupportedMessage(id) => {
                write!(
                    f,
                    "unsupported message type {id:#06x} marked as must-understand"
                )
            }
            FormatError::InvalidDatatypeClass(c) => write!(f, "invalid datatype class: {c}"),
            FormatError::Malformed(msg) => write!(f, "malformed structure: {msg}"),
            FormatError::Unsupported(what) => write!(f, "unsupported feature: {what}"),
            FormatError::Filter(msg) => write!(f, "filter error: {msg}"),
            FormatError::DataSizeMismatch { expected, actual } => {
                write!(f, "data size mismatch: expected {expected} bytes, got {actual}")
            }
            FormatError::AllocationFailed(n) => write!(f, "cannot allocate {n} bytes of data"),
        }
    }
}

impl std::error::Error for FormatError {}
