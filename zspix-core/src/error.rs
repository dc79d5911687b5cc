//! Error types for zspix-core.

use thiserror::Error;

/// Result type alias for zspix operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for zspix operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Rebin factor must be a positive integer.
    #[error("invalid rebin factor: {0} (must be >= 1)")]
    InvalidRebinFactor(usize),

    /// Two grids that must agree in resolution do not.
    #[error("shape mismatch: expected {expected_width}x{expected_height}, got {width}x{height}")]
    ShapeMismatch {
        expected_width: usize,
        expected_height: usize,
        width: usize,
        height: usize,
    },

    /// Pedestal finalization without a single calibration frame.
    #[error("no calibration frames were accumulated")]
    NoCalibrationFrames,

    /// Image buffer inconsistent with its declared dimensions.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl Error {
    pub(crate) fn shape_mismatch(expected: (usize, usize), actual: (usize, usize)) -> Self {
        Self::ShapeMismatch {
            expected_width: expected.0,
            expected_height: expected.1,
            width: actual.0,
            height: actual.1,
        }
    }
}
