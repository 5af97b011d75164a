//! Error types for the striped file I/O engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a single stripe backend.
///
/// The engine treats every kind uniformly as "stripe unavailable for this
/// group"; the kind is kept for logging and statistics.
#[derive(Error, Debug)]
pub enum StripeError {
    /// Backend could not be reached (connection refused, timeout, ...)
    #[error("stripe unreachable: {0}")]
    Unreachable(String),

    /// Backend refused the operation
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Backend returned fewer bytes than requested
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    /// Backend detected corrupted content
    #[error("checksum mismatch at offset {offset}")]
    ChecksumMismatch { offset: u64 },

    /// Local I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur in the striped file engine
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON encode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registry or text encoding error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // Layout Errors
    // =========================================================================
    /// Data/parity/stripe counts or block size are inconsistent
    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    /// A single stripe operation failed outside of a group operation
    #[error("Stripe {index} failed: {source}")]
    Stripe {
        index: usize,
        #[source]
        source: StripeError,
    },

    // =========================================================================
    // Erasure Coding Errors
    // =========================================================================
    /// Parity computation failed
    #[error("EC encoding failed: {0}")]
    EcEncodingFailed(String),

    /// Fewer than D stripes of a group are readable
    #[error("Group {group} unrecoverable: {available} stripes readable, {required} required")]
    InsufficientStripes {
        group: u64,
        available: usize,
        required: usize,
    },

    /// No D-subset of the readable stripes gives an invertible decode matrix
    #[error("Group {group} unrecoverable: no invertible decode set among stripes {valid:?}")]
    NoDecodeSet { group: u64, valid: Vec<usize> },

    /// More than P stripe writes of a group failed
    #[error("Group {group} write failed on stripes {failed:?}")]
    GroupWriteFailed { group: u64, failed: Vec<usize> },

    // =========================================================================
    // File Errors
    // =========================================================================
    /// Streaming file received a write below its high-water mark
    #[error("Out-of-order write at offset {offset} on streaming file (next offset must be >= {expected})")]
    OutOfOrderWrite { offset: u64, expected: u64 },

    /// Write extends past an enforced target size
    #[error("Write to [{offset}, {end}) exceeds target size {target}")]
    BeyondTargetSize { offset: u64, end: u64, target: u64 },

    /// Operation on a closed file handle
    #[error("File is closed")]
    FileClosed,
}

impl Error {
    /// Whether the error means a group lost more stripes than parity covers
    pub fn is_unrecoverable(&self) -> bool {
        matches!(
            self,
            Error::InsufficientStripes { .. }
                | Error::NoDecodeSet { .. }
                | Error::GroupWriteFailed { .. }
        )
    }
}
