//! Error handling.

use thiserror::Error;

/// Enum with all errors in this crate.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Invalid geometry, mode string, or alignment configuration, detected
    /// synchronously at construction or open time.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// I/O error: open/close failure, short write, seek failure, or
    /// submission-ring initialization failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// An asserted planner or chunk-generation invariant did not hold.
    /// In debug builds these panic via `debug_assert!` before this variant
    /// can be constructed; in release builds they surface here.
    #[error("plan violation: {0}")]
    PlanViolation(String),

    /// An asynchronous write completion reported failure. The associated
    /// buffer is not returned to the pool.
    #[error("completion failure at offset {offset}: {detail}")]
    CompletionFailure {
        /// File offset of the failed write.
        offset: u64,
        /// Backend-provided detail string.
        detail: String,
    },

    /// Error raised by the TIFF library collaborator during finalization.
    #[error(transparent)]
    Tiff(#[from] tiff::TiffError),
}

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, Error>;
