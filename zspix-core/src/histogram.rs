//! Fixed-range 1D histograms for pedestal inspection.
//!
//! The pedestal store carries two of these (per-pixel means and per-pixel
//! standard deviations). They are for human inspection only; nothing in the
//! pipeline reads them back except to log their means.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Binning of a fixed-range histogram.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HistogramAxis {
    pub bins: usize,
    /// Inclusive lower edge.
    pub lo: f64,
    /// Exclusive upper edge.
    pub hi: f64,
}

impl HistogramAxis {
    #[must_use]
    pub fn new(bins: usize, lo: f64, hi: f64) -> Self {
        Self { bins, lo, hi }
    }

    /// Bin width.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn width(&self) -> f64 {
        if self.bins == 0 {
            0.0
        } else {
            (self.hi - self.lo) / self.bins as f64
        }
    }

    /// Bin index for `value`, or `None` if it falls outside `[lo, hi)`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn bin_of(&self, value: f64) -> Option<usize> {
        if self.bins == 0 || !(value >= self.lo && value < self.hi) {
            return None;
        }
        let bin = ((value - self.lo) / self.width()) as usize;
        Some(bin.min(self.bins - 1))
    }

    /// Center of bin `index`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn center(&self, index: usize) -> f64 {
        self.lo + (index as f64 + 0.5) * self.width()
    }
}

/// Layout of the two inspection histograms written with a pedestal map.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct HistogramConfig {
    /// Distribution of per-pixel pedestal means.
    pub mean_axis: HistogramAxis,
    /// Distribution of per-pixel pedestal standard deviations.
    pub stddev_axis: HistogramAxis,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            mean_axis: HistogramAxis::new(500, 97.0, 103.0),
            stddev_axis: HistogramAxis::new(500, 0.0, 5.0),
        }
    }
}

/// A 1D histogram with underflow/overflow counters.
///
/// `mean()` is computed from the filled values that landed in range, not
/// from bin centers.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram1D {
    axis: HistogramAxis,
    counts: Vec<u64>,
    underflow: u64,
    overflow: u64,
    sum: f64,
    entries: u64,
}

impl Histogram1D {
    /// Creates an empty histogram.
    #[must_use]
    pub fn new(axis: HistogramAxis) -> Self {
        Self {
            axis,
            counts: vec![0; axis.bins],
            underflow: 0,
            overflow: 0,
            sum: 0.0,
            entries: 0,
        }
    }

    /// Rebuilds a histogram from stored parts.
    #[must_use]
    pub fn from_parts(
        axis: HistogramAxis,
        counts: Vec<u64>,
        underflow: u64,
        overflow: u64,
        sum: f64,
    ) -> Self {
        let entries = counts.iter().sum();
        Self {
            axis,
            counts,
            underflow,
            overflow,
            sum,
            entries,
        }
    }

    /// Adds one value.
    pub fn fill(&mut self, value: f64) {
        match self.axis.bin_of(value) {
            Some(bin) => {
                self.counts[bin] += 1;
                self.sum += value;
                self.entries += 1;
            }
            None if value < self.axis.lo => self.underflow += 1,
            // NaN lands here too.
            None => self.overflow += 1,
        }
    }

    #[must_use]
    pub fn axis(&self) -> HistogramAxis {
        self.axis
    }

    #[must_use]
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    #[must_use]
    pub fn underflow(&self) -> u64 {
        self.underflow
    }

    #[must_use]
    pub fn overflow(&self) -> u64 {
        self.overflow
    }

    /// Sum of in-range filled values.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Number of in-range entries.
    #[must_use]
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Mean of in-range entries, or 0 for an empty histogram.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self) -> f64 {
        if self.entries == 0 {
            0.0
        } else {
            self.sum / self.entries as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fill_and_flows() {
        let mut hist = Histogram1D::new(HistogramAxis::new(10, 0.0, 10.0));
        hist.fill(0.0);
        hist.fill(9.999);
        hist.fill(10.0);
        hist.fill(-0.5);
        hist.fill(f64::NAN);

        assert_eq!(hist.counts()[0], 1);
        assert_eq!(hist.counts()[9], 1);
        assert_eq!(hist.entries(), 2);
        assert_eq!(hist.underflow(), 1);
        assert_eq!(hist.overflow(), 2);
    }

    #[test]
    fn test_mean_uses_values_in_range() {
        let mut hist = Histogram1D::new(HistogramConfig::default().mean_axis);
        for v in [99.0, 100.0, 101.0, 150.0] {
            hist.fill(v);
        }
        assert_relative_eq!(hist.mean(), 100.0);
        assert_eq!(hist.overflow(), 1);
    }

    #[test]
    fn test_from_parts_recounts_entries() {
        let axis = HistogramAxis::new(3, 0.0, 3.0);
        let hist = Histogram1D::from_parts(axis, vec![1, 2, 3], 4, 5, 8.0);
        assert_eq!(hist.entries(), 6);
        assert_relative_eq!(hist.axis().center(1), 1.5);
    }
}
