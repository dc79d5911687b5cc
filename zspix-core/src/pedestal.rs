//! Per-pixel pedestal (baseline) estimation.
//!
//! Calibration frames are rebinned, normalized by `1/k²` and folded into a
//! [`PedestalAccumulator`] with Welford's online update, one frame at a
//! time. The accumulator is a plain value: cloning it snapshots the build
//! after any prefix of frames, and two accumulators over disjoint frame sets
//! can be merged. [`PedestalAccumulator::finalize`] turns it into an
//! immutable [`PedestalMap`].
//!
//! The standard deviation is the population spread of the samples
//! (divisor `N`), which is what the noise threshold in zero suppression
//! expects.

use crate::histogram::{Histogram1D, HistogramConfig};
use crate::image::SensorGeometry;
use crate::rebin::{rebin, RebinFactor};
use crate::record::TaggedRecord;
use crate::{Error, Image, Result};
use ndarray::{Array2, Zip};

/// Running per-pixel mean and sum of squared deviations.
#[derive(Debug, Clone, PartialEq)]
pub struct PedestalAccumulator {
    rebin: RebinFactor,
    frames: u64,
    mean: Array2<f64>,
    m2: Array2<f64>,
}

impl PedestalAccumulator {
    /// Creates an empty accumulator over a `width × height` rebinned grid.
    #[must_use]
    pub fn new(width: usize, height: usize, rebin: RebinFactor) -> Self {
        Self {
            rebin,
            frames: 0,
            mean: Array2::zeros((height, width)),
            m2: Array2::zeros((height, width)),
        }
    }

    /// Creates an empty accumulator for a sensor rebinned by `rebin`.
    #[must_use]
    pub fn for_geometry(geometry: SensorGeometry, rebin: RebinFactor) -> Self {
        let (width, height) = rebin.output_dims(geometry.dims());
        Self::new(width, height, rebin)
    }

    /// Rebinned grid dimensions `(width, height)`.
    #[must_use]
    pub fn dims(&self) -> (usize, usize) {
        (self.mean.ncols(), self.mean.nrows())
    }

    /// Number of frames accumulated so far.
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    #[must_use]
    pub fn rebin(&self) -> RebinFactor {
        self.rebin
    }

    /// Adds one rebinned frame, normalized by `1/k²`.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if the frame is not on this grid.
    pub fn push(&mut self, rebinned: &Image) -> Result<()> {
        self.push_scaled(rebinned, self.rebin.contribution_scale())
    }

    /// Adds one frame, multiplying every sample by `scale` first.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if the frame is not on this grid.
    #[allow(clippy::cast_precision_loss)]
    pub fn push_scaled(&mut self, frame: &Image, scale: f64) -> Result<()> {
        frame.ensure_dims(self.dims())?;

        self.frames += 1;
        let n = self.frames as f64;
        Zip::from(&mut self.mean)
            .and(&mut self.m2)
            .and(frame.array())
            .for_each(|mean, m2, &raw| {
                let x = raw * scale;
                let delta = x - *mean;
                *mean += delta / n;
                *m2 += delta * (x - *mean);
            });
        Ok(())
    }

    /// Value-threading form of [`Self::push`], for folds.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if the frame is not on this grid.
    pub fn accumulate(mut self, rebinned: &Image) -> Result<Self> {
        self.push(rebinned)?;
        Ok(self)
    }

    /// Combines two accumulators built from disjoint frame sets.
    ///
    /// # Errors
    /// Returns an error if the grids or rebin factors differ.
    #[allow(clippy::cast_precision_loss)]
    pub fn merge(mut self, other: &Self) -> Result<Self> {
        if self.dims() != other.dims() {
            return Err(Error::shape_mismatch(self.dims(), other.dims()));
        }
        if self.rebin != other.rebin {
            return Err(Error::ConfigError(format!(
                "cannot merge pedestals rebinned by {} and {}",
                self.rebin, other.rebin
            )));
        }
        if other.frames == 0 {
            return Ok(self);
        }
        if self.frames == 0 {
            return Ok(other.clone());
        }

        let na = self.frames as f64;
        let nb = other.frames as f64;
        let n = na + nb;
        Zip::from(&mut self.mean)
            .and(&mut self.m2)
            .and(&other.mean)
            .and(&other.m2)
            .for_each(|mean, m2, &mean_b, &m2_b| {
                let delta = mean_b - *mean;
                *mean += delta * nb / n;
                *m2 += m2_b + delta * delta * na * nb / n;
            });
        self.frames += other.frames;
        Ok(self)
    }

    /// Produces the pedestal map for the frames seen so far.
    ///
    /// The accumulator is left untouched, so more frames can still be added.
    ///
    /// # Errors
    /// Returns [`Error::NoCalibrationFrames`] if nothing was accumulated.
    #[allow(clippy::cast_precision_loss)]
    pub fn finalize(&self) -> Result<PedestalMap> {
        if self.frames == 0 {
            return Err(Error::NoCalibrationFrames);
        }
        let n = self.frames as f64;
        let stddev = self.m2.mapv(|m2| (m2 / n).max(0.0).sqrt());
        Ok(PedestalMap {
            rebin: self.rebin,
            entries: self.frames,
            mean: self.mean.clone(),
            stddev,
        })
    }
}

/// Per-pixel pedestal mean and standard deviation at rebinned resolution.
///
/// Immutable once built or loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct PedestalMap {
    rebin: RebinFactor,
    entries: u64,
    mean: Array2<f64>,
    stddev: Array2<f64>,
}

impl PedestalMap {
    /// Rebuilds a map from stored arrays (both `(height, width)`).
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if the arrays disagree in shape.
    pub fn from_parts(
        rebin: RebinFactor,
        entries: u64,
        mean: Array2<f64>,
        stddev: Array2<f64>,
    ) -> Result<Self> {
        if mean.dim() != stddev.dim() {
            let (mh, mw) = mean.dim();
            let (sh, sw) = stddev.dim();
            return Err(Error::shape_mismatch((mw, mh), (sw, sh)));
        }
        Ok(Self {
            rebin,
            entries,
            mean,
            stddev,
        })
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.mean.ncols()
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.mean.nrows()
    }

    /// Returns `(width, height)`.
    #[must_use]
    pub fn dims(&self) -> (usize, usize) {
        (self.width(), self.height())
    }

    /// Rebin factor the map was built with.
    #[must_use]
    pub fn rebin(&self) -> RebinFactor {
        self.rebin
    }

    /// Number of calibration frames behind every cell.
    #[must_use]
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Pedestal mean at `(x, y)`.
    #[inline]
    #[must_use]
    pub fn mean(&self, x: usize, y: usize) -> Option<f64> {
        self.mean.get((y, x)).copied()
    }

    /// Pedestal standard deviation at `(x, y)`.
    #[inline]
    #[must_use]
    pub fn stddev(&self, x: usize, y: usize) -> Option<f64> {
        self.stddev.get((y, x)).copied()
    }

    #[must_use]
    pub fn mean_array(&self) -> &Array2<f64> {
        &self.mean
    }

    #[must_use]
    pub fn stddev_array(&self) -> &Array2<f64> {
        &self.stddev
    }

    /// Fills the inspection histograms of per-pixel means and deviations.
    #[must_use]
    pub fn histograms(&self, config: &HistogramConfig) -> PedestalHistograms {
        let mut mean = Histogram1D::new(config.mean_axis);
        let mut stddev = Histogram1D::new(config.stddev_axis);
        for (&m, &s) in self.mean.iter().zip(self.stddev.iter()) {
            mean.fill(m);
            stddev.fill(s);
        }
        PedestalHistograms { mean, stddev }
    }
}

/// Inspection histograms persisted next to a pedestal map.
#[derive(Debug, Clone, PartialEq)]
pub struct PedestalHistograms {
    /// Distribution of per-pixel means.
    pub mean: Histogram1D,
    /// Distribution of per-pixel standard deviations.
    pub stddev: Histogram1D,
}

/// Builds a [`PedestalMap`] from a stream of tagged archive records.
#[derive(Debug, Clone)]
pub struct PedestalEstimator {
    geometry: SensorGeometry,
    rebin: RebinFactor,
    max_frames: Option<usize>,
}

impl PedestalEstimator {
    /// Creates an estimator for raw frames of `geometry`, rebinned by `rebin`.
    #[must_use]
    pub fn new(geometry: SensorGeometry, rebin: RebinFactor) -> Self {
        Self {
            geometry,
            rebin,
            max_frames: None,
        }
    }

    /// Stops once the record index reaches `max`.
    ///
    /// The cap counts archive records, including ones that are skipped.
    #[must_use]
    pub fn with_max_frames(mut self, max: Option<usize>) -> Self {
        self.max_frames = max;
        self
    }

    /// Empty accumulator matching this estimator's grid.
    #[must_use]
    pub fn accumulator(&self) -> PedestalAccumulator {
        PedestalAccumulator::for_geometry(self.geometry, self.rebin)
    }

    /// Folds every calibration record into a fresh accumulator.
    ///
    /// Data and unknown records are skipped, as are images whose shape does
    /// not match the sensor geometry.
    ///
    /// # Errors
    /// Propagates the first error yielded by `records`.
    pub fn accumulate_records<I, E>(&self, records: I) -> std::result::Result<PedestalAccumulator, E>
    where
        I: IntoIterator<Item = std::result::Result<TaggedRecord, E>>,
        E: From<Error>,
    {
        records
            .into_iter()
            .take_while(|record| match (record, self.max_frames) {
                (Ok(record), Some(max)) if record.index >= max => {
                    log::info!("Reached calibration cap of {max} records");
                    false
                }
                _ => true,
            })
            .try_fold(
                self.accumulator(),
                |acc, record| -> std::result::Result<PedestalAccumulator, E> {
                    Ok(self.absorb(acc, record?)?)
                },
            )
    }

    /// Accumulates `records` and finalizes the map.
    ///
    /// # Errors
    /// Propagates record errors; fails with [`Error::NoCalibrationFrames`]
    /// if no calibration frame was found.
    pub fn estimate<I, E>(&self, records: I) -> std::result::Result<PedestalMap, E>
    where
        I: IntoIterator<Item = std::result::Result<TaggedRecord, E>>,
        E: From<Error>,
    {
        let acc = self.accumulate_records(records)?;
        Ok(acc.finalize()?)
    }

    fn absorb(&self, acc: PedestalAccumulator, record: TaggedRecord) -> Result<PedestalAccumulator> {
        let label = record.kind_label();
        let Some(frame) = record.into_calibration() else {
            log::debug!("Skipping {label} record");
            return Ok(acc);
        };
        if !frame.image.matches(self.geometry) {
            log::warn!(
                "Skipping calibration frame {}: {}x{} does not match sensor {}x{}",
                frame.name,
                frame.image.width(),
                frame.image.height(),
                self.geometry.width,
                self.geometry.height
            );
            return Ok(acc);
        }
        log::info!("Processing calibration frame: {}", frame.name);
        acc.accumulate(&rebin(&frame.image, self.rebin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ArchivePass, RecordPayload, RecordRole};
    use approx::assert_relative_eq;

    fn constant_frames(values: &[f64], side: usize) -> Vec<Image> {
        values
            .iter()
            .map(|&v| Image::filled(side, side, v))
            .collect()
    }

    fn batch_stats(values: &[f64]) -> (f64, f64) {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        (mean, var.sqrt())
    }

    #[test]
    fn test_welford_matches_batch() {
        let values = [98.5, 101.25, 99.75, 100.5, 102.0, 97.25, 100.0];
        let mut acc = PedestalAccumulator::new(3, 2, RebinFactor::ONE);
        for &v in &values {
            acc.push(&Image::filled(3, 2, v)).unwrap();
        }
        let map = acc.finalize().unwrap();
        let (mean, stddev) = batch_stats(&values);
        assert_eq!(map.entries(), values.len() as u64);
        assert_relative_eq!(map.mean(2, 1).unwrap(), mean, epsilon = 1e-12);
        assert_relative_eq!(map.stddev(0, 0).unwrap(), stddev, epsilon = 1e-12);
    }

    #[test]
    fn test_order_insensitive() {
        let values = [1.0e6 + 0.1, 1.0e6 - 0.3, 1.0e6 + 0.7, 1.0e6 + 0.2, 1.0e6 - 0.5];
        let mut forward = PedestalAccumulator::new(1, 1, RebinFactor::ONE);
        let mut reverse = PedestalAccumulator::new(1, 1, RebinFactor::ONE);
        for &v in &values {
            forward.push(&Image::filled(1, 1, v)).unwrap();
        }
        for &v in values.iter().rev() {
            reverse.push(&Image::filled(1, 1, v)).unwrap();
        }
        let a = forward.finalize().unwrap();
        let b = reverse.finalize().unwrap();
        let (mean, stddev) = batch_stats(&values);
        assert_relative_eq!(a.mean(0, 0).unwrap(), b.mean(0, 0).unwrap(), epsilon = 1e-9);
        assert_relative_eq!(a.stddev(0, 0).unwrap(), stddev, epsilon = 1e-6);
        assert_relative_eq!(b.stddev(0, 0).unwrap(), stddev, epsilon = 1e-6);
        assert_relative_eq!(a.mean(0, 0).unwrap(), mean, epsilon = 1e-9);
    }

    #[test]
    fn test_merge_equals_sequential() {
        let values = [3.0, 5.0, 7.0, 11.0, 13.0, 17.0];
        let mut all = PedestalAccumulator::new(2, 2, RebinFactor::ONE);
        let mut left = PedestalAccumulator::new(2, 2, RebinFactor::ONE);
        let mut right = PedestalAccumulator::new(2, 2, RebinFactor::ONE);
        for (i, &v) in values.iter().enumerate() {
            let frame = Image::filled(2, 2, v);
            all.push(&frame).unwrap();
            if i < 2 {
                left.push(&frame).unwrap();
            } else {
                right.push(&frame).unwrap();
            }
        }
        let merged = left.merge(&right).unwrap().finalize().unwrap();
        let sequential = all.finalize().unwrap();
        assert_eq!(merged.entries(), sequential.entries());
        assert_relative_eq!(
            merged.mean(1, 1).unwrap(),
            sequential.mean(1, 1).unwrap(),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            merged.stddev(1, 1).unwrap(),
            sequential.stddev(1, 1).unwrap(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_prefix_snapshot_is_restartable() {
        let mut acc = PedestalAccumulator::new(1, 1, RebinFactor::ONE);
        acc.push(&Image::filled(1, 1, 10.0)).unwrap();
        let snapshot = acc.clone();
        acc.push(&Image::filled(1, 1, 20.0)).unwrap();

        let resumed = snapshot.accumulate(&Image::filled(1, 1, 20.0)).unwrap();
        assert_eq!(resumed, acc);
        assert_relative_eq!(acc.finalize().unwrap().mean(0, 0).unwrap(), 15.0);
    }

    #[test]
    fn test_contribution_scale_applied() {
        let factor = RebinFactor::new(2).unwrap();
        let raw = Image::filled(4, 4, 100.0);
        let mut acc = PedestalAccumulator::new(2, 2, factor);
        acc.push(&rebin(&raw, factor)).unwrap();
        let map = acc.finalize().unwrap();
        assert_relative_eq!(map.mean(0, 0).unwrap(), 100.0, epsilon = 1e-12);
        assert_eq!(map.rebin(), factor);
    }

    #[test]
    fn test_empty_and_mismatched() {
        let acc = PedestalAccumulator::new(2, 2, RebinFactor::ONE);
        assert!(matches!(acc.finalize(), Err(Error::NoCalibrationFrames)));

        let mut acc = PedestalAccumulator::new(2, 2, RebinFactor::ONE);
        let err = acc.push(&Image::zeros(3, 2)).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
        assert_eq!(acc.frames(), 0);
    }

    #[test]
    fn test_constant_frames_have_zero_spread() {
        let mut acc = PedestalAccumulator::new(4, 4, RebinFactor::ONE);
        for frame in constant_frames(&[100.0; 8], 4) {
            acc.push(&frame).unwrap();
        }
        let map = acc.finalize().unwrap();
        assert!(map.stddev_array().iter().all(|&s| s == 0.0));
        assert!(map.mean_array().iter().all(|&m| (m - 100.0).abs() < 1e-12));
    }

    fn record(index: usize, payload: RecordPayload) -> Result<TaggedRecord> {
        Ok(TaggedRecord::classify(
            index,
            format!("pic_{index}"),
            RecordRole::Untagged,
            ArchivePass::Calibration,
            payload,
        ))
    }

    #[test]
    fn test_estimator_skips_and_caps() {
        let geometry = SensorGeometry::square(4);
        let factor = RebinFactor::new(2).unwrap();
        let records = vec![
            record(0, RecordPayload::Image(Image::filled(4, 4, 10.0))),
            record(1, RecordPayload::Other { rank: 1 }),
            record(2, RecordPayload::Image(Image::filled(5, 5, 999.0))),
            record(3, RecordPayload::Image(Image::filled(4, 4, 20.0))),
            record(4, RecordPayload::Image(Image::filled(4, 4, 500.0))),
        ];

        let map = PedestalEstimator::new(geometry, factor)
            .with_max_frames(Some(4))
            .estimate(records)
            .unwrap();

        assert_eq!(map.dims(), (2, 2));
        assert_eq!(map.entries(), 2);
        assert_relative_eq!(map.mean(1, 1).unwrap(), 15.0, epsilon = 1e-12);
        assert_relative_eq!(map.stddev(1, 1).unwrap(), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_estimator_without_frames_fails() {
        let records = vec![record(0, RecordPayload::Other { rank: 3 })];
        let err = PedestalEstimator::new(SensorGeometry::square(4), RebinFactor::ONE)
            .estimate(records)
            .unwrap_err();
        assert!(matches!(err, Error::NoCalibrationFrames));
    }

    #[test]
    fn test_histograms() {
        let mut acc = PedestalAccumulator::new(2, 1, RebinFactor::ONE);
        acc.push(&Image::from_vec(2, 1, vec![99.0, 200.0]).unwrap())
            .unwrap();
        acc.push(&Image::from_vec(2, 1, vec![101.0, 200.0]).unwrap())
            .unwrap();
        let hists = acc.finalize().unwrap().histograms(&HistogramConfig::default());
        assert_eq!(hists.mean.entries(), 1);
        assert_eq!(hists.mean.overflow(), 1);
        assert_relative_eq!(hists.mean.mean(), 100.0);
        assert_eq!(hists.stddev.entries(), 2);
        assert_relative_eq!(hists.stddev.mean(), 0.5);
    }
}
