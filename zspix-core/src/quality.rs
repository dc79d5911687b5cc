//! Channel quality classification from pedestal statistics.

use crate::pedestal::PedestalMap;
use ndarray::Array2;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Thresholds deciding whether a channel is usable.
///
/// A channel is good iff `mean <= max_mean` and
/// `min_stddev <= stddev <= max_stddev`. The defaults are the calibration
/// constants of the reference 2048×2048 sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ChannelQualityConfig {
    /// Highest acceptable pedestal mean (hot channels above).
    pub max_mean: f64,
    /// Lowest acceptable pedestal spread (dead or stuck channels below).
    pub min_stddev: f64,
    /// Highest acceptable pedestal spread (noisy channels above).
    pub max_stddev: f64,
}

impl Default for ChannelQualityConfig {
    fn default() -> Self {
        Self {
            max_mean: 110.0,
            min_stddev: 0.2,
            max_stddev: 5.0,
        }
    }
}

impl ChannelQualityConfig {
    #[must_use]
    pub fn with_max_mean(mut self, value: f64) -> Self {
        self.max_mean = value;
        self
    }

    #[must_use]
    pub fn with_stddev_range(mut self, min: f64, max: f64) -> Self {
        self.min_stddev = min;
        self.max_stddev = max;
        self
    }
}

/// Stateless good/bad decision per channel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelClassifier {
    config: ChannelQualityConfig,
}

impl ChannelClassifier {
    #[must_use]
    pub fn new(config: ChannelQualityConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &ChannelQualityConfig {
        &self.config
    }

    /// The scalar rule. NaN statistics are never good.
    #[inline]
    #[must_use]
    pub fn accepts(&self, mean: f64, stddev: f64) -> bool {
        mean <= self.config.max_mean
            && stddev >= self.config.min_stddev
            && stddev <= self.config.max_stddev
    }

    /// Whether channel `(x, y)` of `map` is usable. Out-of-bounds is bad.
    #[inline]
    #[must_use]
    pub fn is_good(&self, map: &PedestalMap, x: usize, y: usize) -> bool {
        match (map.mean(x, y), map.stddev(x, y)) {
            (Some(mean), Some(stddev)) => self.accepts(mean, stddev),
            _ => false,
        }
    }

    /// Good-channel mask, indexed `[[y, x]]` like the map.
    #[must_use]
    pub fn mask(&self, map: &PedestalMap) -> Array2<bool> {
        let mut mask = Array2::from_elem(map.mean_array().dim(), false);
        ndarray::Zip::from(&mut mask)
            .and(map.mean_array())
            .and(map.stddev_array())
            .for_each(|good, &mean, &stddev| *good = self.accepts(mean, stddev));
        mask
    }

    /// Number of good channels in `map`.
    #[must_use]
    pub fn count_good(&self, map: &PedestalMap) -> usize {
        map.mean_array()
            .iter()
            .zip(map.stddev_array().iter())
            .filter(|&(&mean, &stddev)| self.accepts(mean, stddev))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rebin::RebinFactor;
    use ndarray::array;

    #[test]
    fn test_thresholds_inclusive() {
        let classifier = ChannelClassifier::default();
        assert!(classifier.accepts(110.0, 0.2));
        assert!(classifier.accepts(100.0, 5.0));
        assert!(!classifier.accepts(110.000_001, 1.0));
        assert!(!classifier.accepts(100.0, 0.199_999));
        assert!(!classifier.accepts(100.0, 5.000_001));
        assert!(!classifier.accepts(f64::NAN, 1.0));
        assert!(!classifier.accepts(100.0, f64::NAN));
    }

    #[test]
    fn test_mask_and_count() {
        let map = PedestalMap::from_parts(
            RebinFactor::ONE,
            10,
            array![[100.0, 120.0], [100.0, 100.0]],
            array![[1.0, 1.0], [0.0, 6.0]],
        )
        .unwrap();
        let classifier = ChannelClassifier::default();

        assert!(classifier.is_good(&map, 0, 0));
        assert!(!classifier.is_good(&map, 1, 0));
        assert!(!classifier.is_good(&map, 0, 1));
        assert!(!classifier.is_good(&map, 1, 1));
        assert!(!classifier.is_good(&map, 5, 5));

        let mask = classifier.mask(&map);
        assert_eq!(mask, array![[true, false], [false, false]]);
        assert_eq!(classifier.count_good(&map), 1);
    }

    #[test]
    fn test_custom_thresholds() {
        let classifier =
            ChannelClassifier::new(ChannelQualityConfig::default().with_stddev_range(0.0, 10.0));
        assert!(classifier.accepts(100.0, 0.0));
        assert!(classifier.accepts(100.0, 8.0));
    }
}
