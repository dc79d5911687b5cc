//! Dense sensor images and frame identity.
//!
//! Images are stored row-major in an [`Array2`] indexed `[[y, x]]`, so the
//! array shape is `(height, width)`. Public accessors take `(x, y)`.

use crate::{Error, Result};
use ndarray::{Array2, ArrayView2};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Fixed sensor resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorGeometry {
    /// Number of columns.
    pub width: usize,
    /// Number of rows.
    pub height: usize,
}

impl Default for SensorGeometry {
    fn default() -> Self {
        Self::square(2048)
    }
}

impl SensorGeometry {
    /// Creates a square `side × side` geometry.
    #[must_use]
    pub fn square(side: usize) -> Self {
        Self {
            width: side,
            height: side,
        }
    }

    /// Returns `(width, height)`.
    #[must_use]
    pub fn dims(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Returns the number of pixels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    /// Returns true if the geometry has no pixels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A dense 2D grid of intensities.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    data: Array2<f64>,
}

impl Image {
    /// Creates a zero-filled image.
    #[must_use]
    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            data: Array2::zeros((height, width)),
        }
    }

    /// Creates an image filled with a constant value.
    #[must_use]
    pub fn filled(width: usize, height: usize, value: f64) -> Self {
        Self {
            data: Array2::from_elem((height, width), value),
        }
    }

    /// Wraps an existing `(height, width)` array.
    #[must_use]
    pub fn from_array(data: Array2<f64>) -> Self {
        Self { data }
    }

    /// Builds an image from row-major samples.
    ///
    /// # Errors
    /// Returns [`Error::InvalidImage`] if `samples.len() != width * height`.
    pub fn from_vec(width: usize, height: usize, samples: Vec<f64>) -> Result<Self> {
        let len = samples.len();
        Array2::from_shape_vec((height, width), samples)
            .map(Self::from_array)
            .map_err(|e| {
                Error::InvalidImage(format!(
                    "{len} samples do not fill a {width}x{height} grid: {e}"
                ))
            })
    }

    /// Builds an image by evaluating `f(x, y)` at every pixel.
    pub fn from_fn<F>(width: usize, height: usize, mut f: F) -> Self
    where
        F: FnMut(usize, usize) -> f64,
    {
        Self {
            data: Array2::from_shape_fn((height, width), |(y, x)| f(x, y)),
        }
    }

    /// Number of columns.
    #[must_use]
    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    /// Number of rows.
    #[must_use]
    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    /// Returns `(width, height)`.
    #[must_use]
    pub fn dims(&self) -> (usize, usize) {
        (self.width(), self.height())
    }

    /// Returns true if this image matches the given geometry.
    #[must_use]
    pub fn matches(&self, geometry: SensorGeometry) -> bool {
        self.dims() == geometry.dims()
    }

    /// Value at `(x, y)`, or `None` when out of bounds.
    #[inline]
    #[must_use]
    pub fn get(&self, x: usize, y: usize) -> Option<f64> {
        self.data.get((y, x)).copied()
    }

    /// Sets the value at `(x, y)`. Out-of-bounds writes are ignored.
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: f64) {
        if let Some(cell) = self.data.get_mut((y, x)) {
            *cell = value;
        }
    }

    /// Multiplies every pixel by `factor` in place.
    pub fn scale(&mut self, factor: f64) {
        self.data.mapv_inplace(|v| v * factor);
    }

    /// Sum over all pixels.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.data.sum()
    }

    /// Borrowed view of the underlying array.
    #[must_use]
    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    /// Reference to the underlying array.
    #[must_use]
    pub fn array(&self) -> &Array2<f64> {
        &self.data
    }

    /// Consumes the image and returns the underlying array.
    #[must_use]
    pub fn into_array(self) -> Array2<f64> {
        self.data
    }

    pub(crate) fn ensure_dims(&self, expected: (usize, usize)) -> Result<()> {
        if self.dims() == expected {
            Ok(())
        } else {
            Err(Error::shape_mismatch(expected, self.dims()))
        }
    }
}

/// A raw image together with its archive identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Record name in the source archive.
    pub name: String,
    /// Position of the record in archive enumeration order.
    pub index: usize,
    /// Pixel data.
    pub image: Image,
}

impl Frame {
    /// Creates a new frame.
    pub fn new(name: impl Into<String>, index: usize, image: Image) -> Self {
        Self {
            name: name.into(),
            index,
            image,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_indexing_is_x_y() {
        let image = Image::from_fn(3, 2, |x, y| (10 * y + x) as f64);
        assert_eq!(image.dims(), (3, 2));
        assert_eq!(image.get(2, 1), Some(12.0));
        assert_eq!(image.get(0, 1), Some(10.0));
        assert_eq!(image.get(3, 0), None);
    }

    #[test]
    fn test_from_vec_rejects_wrong_length() {
        let err = Image::from_vec(4, 4, vec![0.0; 15]).unwrap_err();
        assert!(matches!(err, Error::InvalidImage(_)));

        let image = Image::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(image.get(1, 0), Some(2.0));
        assert_eq!(image.get(0, 1), Some(3.0));
    }

    #[test]
    fn test_scale() {
        let mut image = Image::filled(2, 2, 50.0);
        image.scale(0.01);
        assert!((image.sum() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_geometry_default() {
        let geometry = SensorGeometry::default();
        assert_eq!(geometry.dims(), (2048, 2048));
        assert!(Image::zeros(2048, 2048).matches(geometry));
        assert!(!Image::zeros(2048, 2047).matches(geometry));
    }
}
