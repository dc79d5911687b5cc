//! I/O error types.

use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid file format.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// No backend handles this file extension.
    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(String),

    /// A loaded pedestal store does not fit the configured pipeline.
    #[error("pedestal store mismatch: {0}")]
    PedestalMismatch(String),

    /// Pipeline operation called in the wrong state.
    #[error("invalid pipeline state: {0}")]
    InvalidState(String),

    /// Configuration file error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] zspix_core::Error),

    /// HDF5 library error.
    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),
}
