//! Block rebinning of sensor images.
//!
//! Rebinning by `k` sums each `k×k` block into one output pixel. The output
//! grid is `floor(W/k) × floor(H/k)`: trailing rows and columns that do not
//! fill a whole block are dropped. [`RebinPlan`] reports how many so callers
//! can warn about it.

use crate::{Error, Image, Result};
use ndarray::{Array2, Zip};
use std::fmt;
use std::num::NonZeroUsize;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Positive integer rebin factor, applied identically along x and y.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "usize", into = "usize")
)]
pub struct RebinFactor(NonZeroUsize);

impl RebinFactor {
    /// Identity rebinning.
    pub const ONE: Self = Self(NonZeroUsize::MIN);

    /// Creates a rebin factor.
    ///
    /// # Errors
    /// Returns [`Error::InvalidRebinFactor`] if `k == 0`.
    pub fn new(k: usize) -> Result<Self> {
        NonZeroUsize::new(k)
            .map(Self)
            .ok_or(Error::InvalidRebinFactor(k))
    }

    /// Returns the factor as a plain integer.
    #[inline]
    #[must_use]
    pub fn get(self) -> usize {
        self.0.get()
    }

    /// Normalization applied to rebinned values: `1 / k²`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn contribution_scale(self) -> f64 {
        let k = self.get() as f64;
        1.0 / (k * k)
    }

    /// Output dimensions for an input of `(width, height)`.
    #[inline]
    #[must_use]
    pub fn output_dims(self, dims: (usize, usize)) -> (usize, usize) {
        let k = self.get();
        (dims.0 / k, dims.1 / k)
    }

    /// Describes what rebinning an input of `(width, height)` produces.
    #[must_use]
    pub fn plan(self, dims: (usize, usize)) -> RebinPlan {
        let k = self.get();
        RebinPlan {
            factor: self,
            input: dims,
            output: self.output_dims(dims),
            dropped_columns: dims.0 % k,
            dropped_rows: dims.1 % k,
        }
    }
}

impl Default for RebinFactor {
    fn default() -> Self {
        Self(NonZeroUsize::new(10).unwrap_or(NonZeroUsize::MIN))
    }
}

impl TryFrom<usize> for RebinFactor {
    type Error = Error;

    fn try_from(k: usize) -> Result<Self> {
        Self::new(k)
    }
}

impl From<RebinFactor> for usize {
    fn from(factor: RebinFactor) -> Self {
        factor.get()
    }
}

impl fmt::Display for RebinFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Geometry of a rebin operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebinPlan {
    pub factor: RebinFactor,
    /// Input `(width, height)`.
    pub input: (usize, usize),
    /// Output `(width, height)`.
    pub output: (usize, usize),
    /// Input columns beyond the last whole block.
    pub dropped_columns: usize,
    /// Input rows beyond the last whole block.
    pub dropped_rows: usize,
}

impl RebinPlan {
    /// True when the factor divides both input dimensions.
    #[must_use]
    pub fn is_lossless(&self) -> bool {
        self.dropped_columns == 0 && self.dropped_rows == 0
    }

    /// Number of input pixels that do not contribute to the output.
    #[must_use]
    pub fn dropped_pixels(&self) -> usize {
        let (w, h) = self.input;
        w * h - (self.output.0 * self.output.1 * self.factor.get() * self.factor.get())
    }
}

/// Sums `k×k` blocks of `image` into a `floor(W/k) × floor(H/k)` image.
#[must_use]
pub fn rebin(image: &Image, factor: RebinFactor) -> Image {
    let k = factor.get();
    if k == 1 {
        return image.clone();
    }

    let (width, height) = factor.output_dims(image.dims());
    let mut out = Array2::<f64>::zeros((height, width));
    Zip::from(&mut out)
        .and(image.array().exact_chunks((k, k)))
        .for_each(|cell, block| *cell = block.sum());
    Image::from_array(out)
}

/// Rebins and applies the `1/k²` normalization in one step.
#[must_use]
pub fn rebin_normalized(image: &Image, factor: RebinFactor) -> Image {
    let mut out = rebin(image, factor);
    if factor.get() != 1 {
        out.scale(factor.contribution_scale());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_zero_factor_rejected() {
        assert!(matches!(
            RebinFactor::new(0),
            Err(Error::InvalidRebinFactor(0))
        ));
        assert_eq!(RebinFactor::default().get(), 10);
    }

    #[test]
    fn test_rebin_identity() {
        let image = Image::from_fn(7, 5, |x, y| (x * 3 + y) as f64);
        assert_eq!(rebin(&image, RebinFactor::ONE), image);
    }

    #[test]
    fn test_rebin_sums_blocks() {
        let image = Image::from_fn(4, 4, |x, y| (y * 4 + x) as f64);
        let out = rebin(&image, RebinFactor::new(2).unwrap());
        assert_eq!(out.dims(), (2, 2));
        // Top-left block: 0 + 1 + 4 + 5
        assert_relative_eq!(out.get(0, 0).unwrap(), 10.0);
        // Top-right block: 2 + 3 + 6 + 7
        assert_relative_eq!(out.get(1, 0).unwrap(), 18.0);
        // Bottom-left block: 8 + 9 + 12 + 13
        assert_relative_eq!(out.get(0, 1).unwrap(), 42.0);
        assert_relative_eq!(out.get(1, 1).unwrap(), 50.0);
    }

    #[test]
    fn test_rebin_truncates_residual() {
        let image = Image::filled(2048, 2048, 1.0);
        let factor = RebinFactor::new(10).unwrap();
        let out = rebin(&image, factor);
        assert_eq!(out.dims(), (204, 204));
        // Every output pixel is a full 10x10 block; residual pixels never leak in.
        assert!(out.array().iter().all(|&v| (v - 100.0).abs() < 1e-9));

        let plan = factor.plan(image.dims());
        assert!(!plan.is_lossless());
        assert_eq!(plan.dropped_columns, 8);
        assert_eq!(plan.dropped_rows, 8);
        assert_eq!(plan.dropped_pixels(), 2048 * 2048 - 2040 * 2040);
    }

    #[test]
    fn test_rebin_rectangular_and_tiny() {
        let factor = RebinFactor::new(3).unwrap();
        let out = rebin(&Image::filled(10, 7, 2.0), factor);
        assert_eq!(out.dims(), (3, 2));

        let empty = rebin(&Image::filled(2, 2, 2.0), factor);
        assert_eq!(empty.dims(), (0, 0));
    }

    #[test]
    fn test_rebin_normalized_preserves_mean_level() {
        let image = Image::filled(20, 20, 100.0);
        let out = rebin_normalized(&image, RebinFactor::new(10).unwrap());
        assert_eq!(out.dims(), (2, 2));
        for &v in out.array() {
            assert_relative_eq!(v, 100.0, epsilon = 1e-9);
        }
    }
}
