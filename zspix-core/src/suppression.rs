//! Zero suppression against a pedestal map.

use crate::pedestal::PedestalMap;
use crate::quality::ChannelClassifier;
use crate::{Image, Result};
use ndarray::{Array2, Zip};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Zero-suppression settings.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SuppressionConfig {
    /// Signal must exceed this many pedestal standard deviations (strictly).
    pub noise_multiplier: f64,
    /// Evaluate rows on the rayon pool. Output is identical either way.
    pub parallel: bool,
}

impl Default for SuppressionConfig {
    fn default() -> Self {
        Self {
            noise_multiplier: 5.0,
            parallel: false,
        }
    }
}

impl SuppressionConfig {
    #[must_use]
    pub fn with_noise_multiplier(mut self, multiplier: f64) -> Self {
        self.noise_multiplier = multiplier;
        self
    }

    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// A frame with everything consistent with pedestal noise set to zero.
#[derive(Debug, Clone, PartialEq)]
pub struct SuppressedImage {
    image: Image,
}

impl SuppressedImage {
    /// Wraps an image whose values are already pedestal-subtracted signal.
    #[must_use]
    pub fn from_image(image: Image) -> Self {
        Self { image }
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.image.width()
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.image.height()
    }

    /// Returns `(width, height)`.
    #[must_use]
    pub fn dims(&self) -> (usize, usize) {
        self.image.dims()
    }

    /// Surviving signal at `(x, y)`; 0 for suppressed or out-of-bounds pixels.
    #[inline]
    #[must_use]
    pub fn signal(&self, x: usize, y: usize) -> f64 {
        self.image.get(x, y).unwrap_or(0.0)
    }

    /// Number of pixels with non-zero signal.
    #[must_use]
    pub fn active_pixels(&self) -> usize {
        self.image.array().iter().filter(|&&v| v != 0.0).count()
    }

    /// Sum of surviving signal.
    #[must_use]
    pub fn integral(&self) -> f64 {
        self.image.sum()
    }

    /// Iterates `(x, y, signal)` over non-zero pixels in row-major order.
    pub fn iter_active(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.image
            .array()
            .indexed_iter()
            .filter(|&(_, &v)| v != 0.0)
            .map(|((y, x), &v)| (x, y, v))
    }

    #[must_use]
    pub fn image(&self) -> &Image {
        &self.image
    }

    #[must_use]
    pub fn into_image(self) -> Image {
        self.image
    }
}

/// Applies the pedestal subtraction and noise threshold to whole frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroSuppressor {
    config: SuppressionConfig,
    classifier: ChannelClassifier,
}

impl ZeroSuppressor {
    #[must_use]
    pub fn new(config: SuppressionConfig, classifier: ChannelClassifier) -> Self {
        Self { config, classifier }
    }

    #[must_use]
    pub fn config(&self) -> &SuppressionConfig {
        &self.config
    }

    #[must_use]
    pub fn classifier(&self) -> &ChannelClassifier {
        &self.classifier
    }

    /// Suppresses one rebinned, normalized frame.
    ///
    /// Bad channels give 0. Good channels give `max(raw - mean, 0)` when that
    /// exceeds `noise_multiplier * stddev`, and 0 otherwise.
    ///
    /// # Errors
    /// Returns [`crate::Error::ShapeMismatch`] if the frame and map differ
    /// in resolution.
    pub fn suppress(&self, frame: &Image, map: &PedestalMap) -> Result<SuppressedImage> {
        frame.ensure_dims(map.dims())?;

        let classifier = self.classifier;
        let multiplier = self.config.noise_multiplier;
        let rule = move |out: &mut f64, &raw: &f64, &mean: &f64, &stddev: &f64| {
            *out = suppress_pixel(raw, mean, stddev, &classifier, multiplier);
        };

        let mut out = Array2::<f64>::zeros(map.mean_array().dim());
        let zip = Zip::from(&mut out)
            .and(frame.array())
            .and(map.mean_array())
            .and(map.stddev_array());
        if self.config.parallel {
            zip.par_for_each(rule);
        } else {
            zip.for_each(rule);
        }

        Ok(SuppressedImage {
            image: Image::from_array(out),
        })
    }
}

#[inline]
fn suppress_pixel(
    raw: f64,
    mean: f64,
    stddev: f64,
    classifier: &ChannelClassifier,
    multiplier: f64,
) -> f64 {
    if !classifier.accepts(mean, stddev) {
        return 0.0;
    }
    let signal = (raw - mean).max(0.0);
    if signal > multiplier * stddev {
        signal
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rebin::RebinFactor;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn uniform_map(width: usize, height: usize, mean: f64, stddev: f64) -> PedestalMap {
        PedestalMap::from_parts(
            RebinFactor::ONE,
            100,
            Array2::from_elem((height, width), mean),
            Array2::from_elem((height, width), stddev),
        )
        .unwrap()
    }

    #[test]
    fn test_signal_above_five_sigma_kept() {
        let map = uniform_map(3, 3, 100.0, 2.0);
        let mut frame = Image::filled(3, 3, 100.0);
        frame.set(1, 1, 111.0);

        let zs = ZeroSuppressor::default().suppress(&frame, &map).unwrap();
        assert_relative_eq!(zs.signal(1, 1), 11.0);
        assert_eq!(zs.active_pixels(), 1);
        assert_eq!(zs.iter_active().collect::<Vec<_>>(), vec![(1, 1, 11.0)]);
    }

    #[test]
    fn test_threshold_is_strict() {
        let map = uniform_map(2, 1, 100.0, 2.0);
        let frame = Image::from_vec(2, 1, vec![110.0, 110.5]).unwrap();
        let zs = ZeroSuppressor::default().suppress(&frame, &map).unwrap();
        // Exactly 5 sigma resolves to zero.
        assert_eq!(zs.signal(0, 0), 0.0);
        assert_relative_eq!(zs.signal(1, 0), 10.5);
    }

    #[test]
    fn test_negative_excess_clamped() {
        let map = uniform_map(1, 1, 100.0, 1.0);
        let frame = Image::filled(1, 1, 20.0);
        let zs = ZeroSuppressor::default().suppress(&frame, &map).unwrap();
        assert_eq!(zs.signal(0, 0), 0.0);
    }

    #[test]
    fn test_bad_channels_always_zero() {
        // stddev below 0.2: every channel is bad.
        let map = uniform_map(4, 4, 100.0, 0.0);
        let frame = Image::from_fn(4, 4, |x, y| 1000.0 * (x + y + 1) as f64);
        let zs = ZeroSuppressor::default().suppress(&frame, &map).unwrap();
        assert_eq!(zs.active_pixels(), 0);
        assert_eq!(zs.integral(), 0.0);

        // Hot channel: mean above 110.
        let map = uniform_map(1, 1, 111.0, 1.0);
        let zs = ZeroSuppressor::default()
            .suppress(&Image::filled(1, 1, 500.0), &map)
            .unwrap();
        assert_eq!(zs.signal(0, 0), 0.0);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let map = PedestalMap::from_parts(
            RebinFactor::ONE,
            50,
            Array2::from_shape_fn((32, 48), |(y, x)| 95.0 + ((x * 7 + y * 3) % 11) as f64),
            Array2::from_shape_fn((32, 48), |(y, x)| 0.1 + ((x + y) % 6) as f64),
        )
        .unwrap();
        let frame = Image::from_fn(48, 32, |x, y| 90.0 + ((x * 13 + y * 17) % 40) as f64);

        let sequential = ZeroSuppressor::default().suppress(&frame, &map).unwrap();
        let parallel = ZeroSuppressor::new(
            SuppressionConfig::default().with_parallel(true),
            ChannelClassifier::default(),
        )
        .suppress(&frame, &map)
        .unwrap();
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_shape_mismatch() {
        let map = uniform_map(2, 2, 100.0, 1.0);
        let err = ZeroSuppressor::default()
            .suppress(&Image::zeros(3, 2), &map)
            .unwrap_err();
        assert!(matches!(err, crate::Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_custom_multiplier() {
        let map = uniform_map(1, 1, 100.0, 2.0);
        let suppressor = ZeroSuppressor::new(
            SuppressionConfig::default().with_noise_multiplier(3.0),
            ChannelClassifier::default(),
        );
        let zs = suppressor.suppress(&Image::filled(1, 1, 107.0), &map).unwrap();
        assert_relative_eq!(zs.signal(0, 0), 7.0);
    }
}
