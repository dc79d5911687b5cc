//! Persisted pedestal maps.
//!
//! A store holds one [`PedestalMap`] plus the two inspection histograms
//! (per-pixel mean and per-pixel standard deviation). Its file name is
//! derived from the archive it was computed from and the rebin factor, and
//! it uses the archive's own backend.

use crate::archive::{ArchiveFormat, ImageArchive};
use crate::native::{NativeArchive, NativeArchiveWriter, RawRecord};
use crate::{Error, Result};
use ndarray::Array2;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use zspix_core::{
    Histogram1D, HistogramAxis, HistogramConfig, PedestalMap, RebinFactor, RecordRole,
};

pub(crate) const MAP_MEAN: &str = "pedmap_mean";
pub(crate) const MAP_STDDEV: &str = "pedmap_stddev";
pub(crate) const MEAN_HISTOGRAM: &str = "pedmean";
pub(crate) const STDDEV_HISTOGRAM: &str = "pedrms";

/// Deterministic store location for `(archive, rebin)`.
///
/// `runs/scan.zsf` rebinned by 10 maps to `runs/scan_ped_rebin10.zsf`.
#[must_use]
pub fn pedestal_store_path(archive: &Path, rebin: RebinFactor) -> PathBuf {
    let stem = archive
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = archive
        .extension()
        .and_then(OsStr::to_str)
        .unwrap_or(crate::native::EXTENSION);
    archive.with_file_name(format!("{stem}_ped_rebin{rebin}.{ext}"))
}

/// Summary printed when a store is loaded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreSummary {
    pub entries: u64,
    pub rebin: RebinFactor,
    pub width: usize,
    pub height: usize,
    /// Mean of the in-range per-pixel means.
    pub mean_pedestal: f64,
    /// Mean of the in-range per-pixel standard deviations.
    pub mean_rms: f64,
}

/// A pedestal map together with its inspection histograms.
#[derive(Debug, Clone, PartialEq)]
pub struct PedestalStore {
    pub map: PedestalMap,
    pub mean_histogram: Histogram1D,
    pub stddev_histogram: Histogram1D,
}

impl PedestalStore {
    /// Fills the inspection histograms from `map`.
    #[must_use]
    pub fn from_map(map: PedestalMap, histograms: &HistogramConfig) -> Self {
        let h = map.histograms(histograms);
        Self {
            map,
            mean_histogram: h.mean,
            stddev_histogram: h.stddev,
        }
    }

    #[must_use]
    pub fn summary(&self) -> StoreSummary {
        StoreSummary {
            entries: self.map.entries(),
            rebin: self.map.rebin(),
            width: self.map.width(),
            height: self.map.height(),
            mean_pedestal: self.mean_histogram.mean(),
            mean_rms: self.stddev_histogram.mean(),
        }
    }

    /// Writes the store with the backend matching `path`'s extension.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        match ArchiveFormat::from_path(path)? {
            ArchiveFormat::Native => self.write_native(path),
            #[cfg(feature = "hdf5")]
            ArchiveFormat::Hdf5 => crate::hdf5::write_pedestal_store(path, self),
            #[cfg(not(feature = "hdf5"))]
            ArchiveFormat::Hdf5 => Err(Error::UnsupportedFormat(format!(
                "{} (built without HDF5 support)",
                path.display()
            ))),
        }
    }

    /// Reads a store written by [`Self::write`].
    ///
    /// # Errors
    /// Returns an error if the file is missing, unreadable or incomplete.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match ArchiveFormat::from_path(path)? {
            ArchiveFormat::Native => Self::read_native(path),
            #[cfg(feature = "hdf5")]
            ArchiveFormat::Hdf5 => crate::hdf5::read_pedestal_store(path),
            #[cfg(not(feature = "hdf5"))]
            ArchiveFormat::Hdf5 => Err(Error::UnsupportedFormat(format!(
                "{} (built without HDF5 support)",
                path.display()
            ))),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn write_native(&self, path: &Path) -> Result<()> {
        let map = &self.map;
        let map_attrs = [
            ("rebin", map.rebin().get() as f64),
            ("entries", map.entries() as f64),
        ];
        let dims = [map.height(), map.width()];

        let mut writer = NativeArchiveWriter::create(path)?;
        writer.write_record(
            MAP_MEAN,
            RecordRole::Untagged,
            &dims,
            &map_attrs,
            &map.mean_array().iter().copied().collect::<Vec<_>>(),
        )?;
        writer.write_record(
            MAP_STDDEV,
            RecordRole::Untagged,
            &dims,
            &map_attrs,
            &map.stddev_array().iter().copied().collect::<Vec<_>>(),
        )?;
        for (name, hist) in [
            (MEAN_HISTOGRAM, &self.mean_histogram),
            (STDDEV_HISTOGRAM, &self.stddev_histogram),
        ] {
            let axis = hist.axis();
            let counts: Vec<f64> = hist.counts().iter().map(|&c| c as f64).collect();
            writer.write_record(
                name,
                RecordRole::Untagged,
                &[axis.bins],
                &[
                    ("lo", axis.lo),
                    ("hi", axis.hi),
                    ("underflow", hist.underflow() as f64),
                    ("overflow", hist.overflow() as f64),
                    ("sum", hist.sum()),
                    ("entries", hist.entries() as f64),
                ],
                &counts,
            )?;
        }
        writer.finish()
    }

    fn read_native(path: &Path) -> Result<Self> {
        let archive = NativeArchive::open(path)?;
        let mean = required(&archive, MAP_MEAN)?;
        let stddev = required(&archive, MAP_STDDEV)?;

        let rebin = RebinFactor::new(count_attr(&mean, "rebin")?)?;
        let entries = count_attr(&mean, "entries")? as u64;
        let map = PedestalMap::from_parts(rebin, entries, grid(&mean)?, grid(&stddev)?)?;

        Ok(Self {
            map,
            mean_histogram: histogram(&required(&archive, MEAN_HISTOGRAM)?)?,
            stddev_histogram: histogram(&required(&archive, STDDEV_HISTOGRAM)?)?,
        })
    }
}

fn required<'a>(archive: &'a NativeArchive, name: &str) -> Result<RawRecord<'a>> {
    archive.find(name)?.ok_or_else(|| {
        Error::InvalidFormat(format!(
            "{}: pedestal store has no {name} record",
            archive.path().display()
        ))
    })
}

fn grid(record: &RawRecord<'_>) -> Result<Array2<f64>> {
    match record.dims.as_slice() {
        &[height, width] => Array2::from_shape_vec((height, width), record.samples())
            .map_err(|e| Error::InvalidFormat(format!("{}: {e}", record.name))),
        dims => Err(Error::InvalidFormat(format!(
            "{}: expected a 2D grid, found rank {}",
            record.name,
            dims.len()
        ))),
    }
}

fn attr(record: &RawRecord<'_>, key: &str) -> Result<f64> {
    record
        .attr(key)
        .ok_or_else(|| Error::InvalidFormat(format!("{}: missing attribute {key}", record.name)))
}

/// Converts a stored `f64` into a count, rejecting negative, fractional and
/// non-finite values.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn as_count(record: &RawRecord<'_>, what: &str, value: f64) -> Result<u64> {
    if value < 0.0 || value.fract() != 0.0 || !value.is_finite() {
        return Err(Error::InvalidFormat(format!(
            "{}: {what} = {value} is not a count",
            record.name
        )));
    }
    Ok(value as u64)
}

/// Reads a non-negative integral attribute.
#[allow(clippy::cast_possible_truncation)]
fn count_attr(record: &RawRecord<'_>, key: &str) -> Result<usize> {
    let value = attr(record, key)?;
    Ok(as_count(record, &format!("attribute {key}"), value)? as usize)
}

fn histogram(record: &RawRecord<'_>) -> Result<Histogram1D> {
    let counts = record
        .samples()
        .into_iter()
        .enumerate()
        .map(|(bin, c)| as_count(record, &format!("bin {bin}"), c))
        .collect::<Result<Vec<u64>>>()?;
    let axis = HistogramAxis::new(counts.len(), attr(record, "lo")?, attr(record, "hi")?);
    Ok(Histogram1D::from_parts(
        axis,
        counts,
        count_attr(record, "underflow")? as u64,
        count_attr(record, "overflow")? as u64,
        attr(record, "sum")?,
    ))
}

/// Loads the store at `path` and checks it against the pipeline's grid.
///
/// # Errors
/// Returns [`Error::PedestalMismatch`] if the stored rebin factor or
/// resolution differs from `rebin` / `dims`, or any read error.
pub fn load_matching(path: &Path, rebin: RebinFactor, dims: (usize, usize)) -> Result<PedestalStore> {
    let store = PedestalStore::read(path)?;
    let map = &store.map;
    if map.rebin() != rebin {
        return Err(Error::PedestalMismatch(format!(
            "{} was built with rebin {}, pipeline uses {rebin}",
            path.display(),
            map.rebin()
        )));
    }
    if map.dims() != dims {
        return Err(Error::PedestalMismatch(format!(
            "{} is {}x{}, pipeline grid is {}x{}",
            path.display(),
            map.width(),
            map.height(),
            dims.0,
            dims.1
        )));
    }
    Ok(store)
}
