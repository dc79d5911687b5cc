//! Image archives: named records enumerated in archive-native order.

use crate::{native, Error, Result};
use std::ffi::OsStr;
use std::path::Path;
use zspix_core::{ArchivePass, RecordRole, TaggedRecord};

/// Lazy stream of tagged records.
pub type RecordStream<'a> = Box<dyn Iterator<Item = Result<TaggedRecord>> + 'a>;

/// Listing entry for one archive record, without its samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordInfo {
    pub index: usize,
    pub name: String,
    pub role: RecordRole,
    /// Stored shape, slowest-varying first (`[height, width]` for images).
    pub dims: Vec<usize>,
}

impl RecordInfo {
    /// Whether the record decodes as a 2D image.
    #[must_use]
    pub fn is_image(&self) -> bool {
        self.dims.len() == 2
    }
}

/// A persisted collection of named records.
///
/// Records are decoded one at a time as the stream is advanced. The stream
/// borrows the archive, so the archive outlives every pass over it.
pub trait ImageArchive {
    /// Location the archive was opened from.
    fn path(&self) -> &Path;

    /// Enumerates every record, tagged for `pass`.
    fn records(&self, pass: ArchivePass) -> RecordStream<'_>;

    /// Lists records without decoding their samples.
    ///
    /// # Errors
    /// Returns an error if the archive structure cannot be read.
    fn list(&self) -> Result<Vec<RecordInfo>>;
}

/// Supported on-disk backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// `.zsf` frame stack.
    Native,
    /// `.h5` / `.hdf5` file.
    Hdf5,
}

impl ArchiveFormat {
    /// Picks the backend from the file extension.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedFormat`] for unknown extensions.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(OsStr::to_str)
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some(native::EXTENSION) => Ok(Self::Native),
            Some("h5" | "hdf5") => Ok(Self::Hdf5),
            _ => Err(Error::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Opens `path` with the backend matching its extension.
///
/// # Errors
/// Returns [`Error::UnsupportedFormat`] for unknown extensions (or HDF5
/// files when the `hdf5` feature is disabled), and any error from opening
/// the file itself.
pub fn open_archive<P: AsRef<Path>>(path: P) -> Result<Box<dyn ImageArchive>> {
    let path = path.as_ref();
    match ArchiveFormat::from_path(path)? {
        ArchiveFormat::Native => Ok(Box::new(native::NativeArchive::open(path)?)),
        #[cfg(feature = "hdf5")]
        ArchiveFormat::Hdf5 => Ok(Box::new(crate::hdf5::Hdf5Archive::open(path)?)),
        #[cfg(not(feature = "hdf5"))]
        ArchiveFormat::Hdf5 => Err(Error::UnsupportedFormat(format!(
            "{} (built without HDF5 support)",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ArchiveFormat::from_path(Path::new("run.zsf")).unwrap(),
            ArchiveFormat::Native
        );
        assert_eq!(
            ArchiveFormat::from_path(Path::new("/data/run.H5")).unwrap(),
            ArchiveFormat::Hdf5
        );
        assert!(matches!(
            ArchiveFormat::from_path(&PathBuf::from("run.root")),
            Err(Error::UnsupportedFormat(_))
        ));
        assert!(ArchiveFormat::from_path(Path::new("noext")).is_err());
    }

    #[test]
    fn test_open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_archive(dir.path().join("absent.zsf")).err().unwrap();
        assert!(matches!(err, Error::Io(_)));
    }
}
