//! Pipeline configuration.

use crate::histogram::HistogramConfig;
use crate::image::SensorGeometry;
use crate::quality::ChannelQualityConfig;
use crate::rebin::RebinFactor;
use crate::suppression::SuppressionConfig;
use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Everything the pedestal and data passes need, with the reference
/// sensor's constants as defaults.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PipelineConfig {
    /// Raw frame resolution. Records of any other shape are skipped.
    pub geometry: SensorGeometry,
    /// Square rebin factor applied to every frame.
    pub rebin: RebinFactor,
    pub quality: ChannelQualityConfig,
    pub suppression: SuppressionConfig,
    pub histograms: HistogramConfig,
    /// Stop the data pass once the record index reaches this value.
    pub max_entries: Option<usize>,
    /// Stop the calibration pass once the record index reaches this value.
    pub max_calibration_frames: Option<usize>,
    /// Refinement budget handed to the cluster extractor.
    pub cluster_iterations: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            geometry: SensorGeometry::default(),
            rebin: RebinFactor::default(),
            quality: ChannelQualityConfig::default(),
            suppression: SuppressionConfig::default(),
            histograms: HistogramConfig::default(),
            max_entries: None,
            max_calibration_frames: None,
            cluster_iterations: 100,
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_geometry(mut self, geometry: SensorGeometry) -> Self {
        self.geometry = geometry;
        self
    }

    #[must_use]
    pub fn with_rebin(mut self, rebin: RebinFactor) -> Self {
        self.rebin = rebin;
        self
    }

    #[must_use]
    pub fn with_quality(mut self, quality: ChannelQualityConfig) -> Self {
        self.quality = quality;
        self
    }

    #[must_use]
    pub fn with_suppression(mut self, suppression: SuppressionConfig) -> Self {
        self.suppression = suppression;
        self
    }

    #[must_use]
    pub fn with_histograms(mut self, histograms: HistogramConfig) -> Self {
        self.histograms = histograms;
        self
    }

    /// `None` processes the whole archive.
    #[must_use]
    pub fn with_max_entries(mut self, max: Option<usize>) -> Self {
        self.max_entries = max;
        self
    }

    #[must_use]
    pub fn with_max_calibration_frames(mut self, max: Option<usize>) -> Self {
        self.max_calibration_frames = max;
        self
    }

    #[must_use]
    pub fn with_cluster_iterations(mut self, iterations: usize) -> Self {
        self.cluster_iterations = iterations;
        self
    }

    /// Resolution of the rebinned grid.
    #[must_use]
    pub fn rebinned_dims(&self) -> (usize, usize) {
        self.rebin.output_dims(self.geometry.dims())
    }

    /// Checks values that deserialization alone cannot rule out.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.geometry.is_empty() {
            return Err(Error::ConfigError(format!(
                "sensor geometry {}x{} is empty",
                self.geometry.width, self.geometry.height
            )));
        }
        let (width, height) = self.rebinned_dims();
        if width == 0 || height == 0 {
            return Err(Error::ConfigError(format!(
                "rebin factor {} leaves no pixels of a {}x{} sensor",
                self.rebin, self.geometry.width, self.geometry.height
            )));
        }
        let multiplier = self.suppression.noise_multiplier;
        if !multiplier.is_finite() || multiplier < 0.0 {
            return Err(Error::ConfigError(format!(
                "noise multiplier must be finite and non-negative, got {multiplier}"
            )));
        }
        let q = &self.quality;
        if q.min_stddev > q.max_stddev {
            return Err(Error::ConfigError(format!(
                "stddev range [{}, {}] is empty",
                q.min_stddev, q.max_stddev
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.geometry, SensorGeometry::square(2048));
        assert_eq!(config.rebin.get(), 10);
        assert_eq!(config.rebinned_dims(), (204, 204));
        assert_eq!(config.cluster_iterations, 100);
        assert!(config.max_entries.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_oversized_rebin() {
        let config = PipelineConfig::new()
            .with_geometry(SensorGeometry::square(8))
            .with_rebin(RebinFactor::new(9).unwrap());
        assert!(matches!(config.validate(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_validate_rejects_bad_multiplier() {
        let config = PipelineConfig::new()
            .with_suppression(SuppressionConfig::default().with_noise_multiplier(f64::NAN));
        assert!(config.validate().is_err());

        let config = PipelineConfig::new()
            .with_quality(ChannelQualityConfig::default().with_stddev_range(3.0, 1.0));
        assert!(config.validate().is_err());
    }
}
