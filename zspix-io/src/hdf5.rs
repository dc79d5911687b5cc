//! HDF5 archives and pedestal stores.
//!
//! Archives: every root-level member is a record, in member order. Datasets
//! may carry a string attribute `role` (`calibration` or `data`). Rank-2
//! datasets are images; other datasets and groups are unknown records.
//!
//! Stores: groups `pedmap` (datasets `mean`, `stddev`; attributes `rebin`,
//! `entries`), `pedmean` and `pedrms` (dataset `counts`; attributes `lo`,
//! `hi`, `underflow`, `overflow`, `sum`, `entries`).

use crate::archive::{ImageArchive, RecordInfo, RecordStream};
use crate::store::PedestalStore;
use crate::{Error, Result};
use hdf5::types::{H5Type, VarLenUnicode};
use hdf5::{Dataset, File, Group, Location};
use ndarray::ArrayView1;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use zspix_core::{
    ArchivePass, Histogram1D, HistogramAxis, Image, PedestalMap, RebinFactor, RecordPayload,
    RecordRole, TaggedRecord,
};

const ROLE_ATTR: &str = "role";
const MAP_GROUP: &str = "pedmap";
const MEAN_GROUP: &str = "pedmean";
const STDDEV_GROUP: &str = "pedrms";

/// An HDF5 file read as an image archive.
pub struct Hdf5Archive {
    file: File,
    path: PathBuf,
    members: Vec<String>,
}

impl Hdf5Archive {
    /// Opens an HDF5 archive.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        let members = file.member_names()?;
        Ok(Self {
            file,
            path: path.as_ref().to_path_buf(),
            members,
        })
    }

    fn read_record(&self, index: usize, name: &str, pass: ArchivePass) -> Result<TaggedRecord> {
        let Ok(dataset) = self.file.dataset(name) else {
            return Ok(TaggedRecord::classify(
                index,
                name.to_string(),
                RecordRole::Untagged,
                pass,
                RecordPayload::Other { rank: 0 },
            ));
        };
        let role = dataset_role(&dataset, name);
        let rank = dataset.ndim();
        let payload = if rank == 2 {
            match dataset.read_2d::<f64>() {
                Ok(data) => RecordPayload::Image(Image::from_array(data)),
                Err(e) => {
                    log::debug!("{name}: not a numeric image ({e})");
                    RecordPayload::Other { rank }
                }
            }
        } else {
            RecordPayload::Other { rank }
        };
        Ok(TaggedRecord::classify(
            index,
            name.to_string(),
            role,
            pass,
            payload,
        ))
    }
}

impl ImageArchive for Hdf5Archive {
    fn path(&self) -> &Path {
        &self.path
    }

    fn records(&self, pass: ArchivePass) -> RecordStream<'_> {
        Box::new(
            self.members
                .iter()
                .enumerate()
                .map(move |(index, name)| self.read_record(index, name, pass)),
        )
    }

    fn list(&self) -> Result<Vec<RecordInfo>> {
        self.members
            .iter()
            .enumerate()
            .map(|(index, name)| {
                let (role, dims) = match self.file.dataset(name) {
                    Ok(dataset) => (dataset_role(&dataset, name), dataset.shape()),
                    Err(_) => (RecordRole::Untagged, Vec::new()),
                };
                Ok(RecordInfo {
                    index,
                    name: name.clone(),
                    role,
                    dims,
                })
            })
            .collect()
    }
}

/// Role from the `role` attribute. Unreadable values count as untagged.
fn dataset_role(dataset: &Dataset, name: &str) -> RecordRole {
    match read_attr_opt_string(dataset, ROLE_ATTR) {
        Ok(role) => role.map(|role| RecordRole::parse(&role)).unwrap_or_default(),
        Err(e) => {
            log::debug!("{name}: unreadable {ROLE_ATTR} attribute ({e})");
            RecordRole::Untagged
        }
    }
}

/// Writes HDF5 archives in the layout [`Hdf5Archive`] reads.
pub struct Hdf5ArchiveWriter {
    file: File,
}

impl Hdf5ArchiveWriter {
    /// Creates (truncates) an HDF5 file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            file: File::create(path)?,
        })
    }

    /// Adds an image dataset.
    ///
    /// # Errors
    /// Returns an error if HDF5 I/O fails.
    pub fn write_image(&mut self, name: &str, role: RecordRole, image: &Image) -> Result<()> {
        let dataset = create_fixed_dataset::<f64, _>(&self.file, name, (image.height(), image.width()))?;
        dataset.write(image.array())?;
        set_role(&dataset, role)
    }

    /// Adds a one-dimensional dataset, e.g. run metadata.
    ///
    /// # Errors
    /// Returns an error if HDF5 I/O fails.
    pub fn write_vector(&mut self, name: &str, role: RecordRole, values: &[f64]) -> Result<()> {
        let dataset = create_fixed_dataset::<f64, _>(&self.file, name, (values.len(),))?;
        dataset.write(ArrayView1::from(values))?;
        set_role(&dataset, role)
    }

    /// Adds an empty group.
    ///
    /// # Errors
    /// Returns an error if HDF5 I/O fails.
    pub fn write_group(&mut self, name: &str) -> Result<()> {
        self.file.create_group(name)?;
        Ok(())
    }

    /// Flushes and closes the file.
    ///
    /// # Errors
    /// Returns an error if HDF5 I/O fails.
    pub fn finish(self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}

fn set_role(dataset: &Dataset, role: RecordRole) -> Result<()> {
    if role == RecordRole::Untagged {
        return Ok(());
    }
    set_attr_str(dataset, ROLE_ATTR, role.as_str())
}

/// Writes a pedestal store.
///
/// # Errors
/// Returns an error if HDF5 I/O fails.
pub fn write_pedestal_store(path: &Path, store: &PedestalStore) -> Result<()> {
    let file = File::create(path)?;
    let map = &store.map;

    let group = file.create_group(MAP_GROUP)?;
    let dims = (map.height(), map.width());
    create_fixed_dataset::<f64, _>(&group, "mean", dims)?.write(map.mean_array())?;
    create_fixed_dataset::<f64, _>(&group, "stddev", dims)?.write(map.stddev_array())?;
    set_attr(&group, "rebin", &(map.rebin().get() as u64))?;
    set_attr(&group, "entries", &map.entries())?;

    write_histogram(&file, MEAN_GROUP, &store.mean_histogram)?;
    write_histogram(&file, STDDEV_GROUP, &store.stddev_histogram)?;
    file.flush()?;
    Ok(())
}

/// Reads a pedestal store written by [`write_pedestal_store`].
///
/// # Errors
/// Returns an error if HDF5 I/O fails or a required member is missing.
pub fn read_pedestal_store(path: &Path) -> Result<PedestalStore> {
    let file = File::open(path)?;
    let group = file.group(MAP_GROUP)?;

    let rebin = read_attr_required::<u64>(&group, "rebin")?;
    let rebin = RebinFactor::new(usize::try_from(rebin).map_err(|_| {
        Error::InvalidFormat(format!("{MAP_GROUP}: rebin {rebin} out of range"))
    })?)?;
    let entries = read_attr_required::<u64>(&group, "entries")?;
    let mean = group.dataset("mean")?.read_2d::<f64>()?;
    let stddev = group.dataset("stddev")?.read_2d::<f64>()?;
    let map = PedestalMap::from_parts(rebin, entries, mean, stddev)?;

    Ok(PedestalStore {
        map,
        mean_histogram: read_histogram(&file, MEAN_GROUP)?,
        stddev_histogram: read_histogram(&file, STDDEV_GROUP)?,
    })
}

fn write_histogram(file: &File, name: &str, hist: &Histogram1D) -> Result<()> {
    let group = file.create_group(name)?;
    let axis = hist.axis();
    create_fixed_dataset::<u64, _>(&group, "counts", (axis.bins,))?
        .write(ArrayView1::from(hist.counts()))?;
    set_attr(&group, "lo", &axis.lo)?;
    set_attr(&group, "hi", &axis.hi)?;
    set_attr(&group, "underflow", &hist.underflow())?;
    set_attr(&group, "overflow", &hist.overflow())?;
    set_attr(&group, "sum", &hist.sum())?;
    set_attr(&group, "entries", &hist.entries())?;
    Ok(())
}

fn read_histogram(file: &File, name: &str) -> Result<Histogram1D> {
    let group = file.group(name)?;
    let counts = group.dataset("counts")?.read_raw::<u64>()?;
    let axis = HistogramAxis::new(
        counts.len(),
        read_attr_required(&group, "lo")?,
        read_attr_required(&group, "hi")?,
    );
    Ok(Histogram1D::from_parts(
        axis,
        counts,
        read_attr_required(&group, "underflow")?,
        read_attr_required(&group, "overflow")?,
        read_attr_required(&group, "sum")?,
    ))
}

fn create_fixed_dataset<T: H5Type, S>(group: &Group, name: &str, shape: S) -> Result<Dataset>
where
    S: Into<hdf5::Extents>,
{
    Ok(group.new_dataset::<T>().shape(shape).create(name)?)
}

fn set_attr<T: H5Type>(location: &Location, name: &str, value: &T) -> Result<()> {
    location.new_attr::<T>().create(name)?.write_scalar(value)?;
    Ok(())
}

fn set_attr_str(location: &Location, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    location
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn read_attr_required<T: H5Type + Clone>(location: &Location, name: &str) -> Result<T> {
    read_attr_opt(location, name)?.ok_or_else(|| {
        Error::InvalidFormat(format!("{}: missing attribute {name}", location.name()))
    })
}

fn read_attr_opt<T: H5Type + Clone>(location: &Location, name: &str) -> Result<Option<T>> {
    match location.attr(name) {
        Ok(attr) => Ok(Some(attr.read_scalar::<T>()?)),
        Err(_) => Ok(None),
    }
}

fn read_attr_opt_string(location: &Location, name: &str) -> Result<Option<String>> {
    match location.attr(name) {
        Ok(attr) => {
            let value: VarLenUnicode = attr.read_scalar()?;
            Ok(Some(value.to_string()))
        }
        Err(_) => Ok(None),
    }
}

fn to_var_len_unicode(value: &str) -> Result<VarLenUnicode> {
    VarLenUnicode::from_str(value)
        .map_err(|e| Error::InvalidFormat(format!("invalid utf-8 attribute: {e}")))
}
