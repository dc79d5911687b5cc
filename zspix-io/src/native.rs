//! Native `.zsf` frame-stack archives.
//!
//! Little-endian layout: the magic `ZSFA` and a `u32` version, then records
//! until end of file. Each record is
//!
//! ```text
//! u16 name_len, name (UTF-8)
//! u8  role            0 untagged, 1 calibration, 2 data
//! u8  rank
//! u32 dims[rank]      slowest-varying first
//! u16 attr_count
//!     u16 key_len, key (UTF-8), f64 value    (attr_count times)
//! f64 samples[prod(dims)]                    row-major
//! ```
//!
//! Reading maps the file and walks record headers lazily; samples are only
//! decoded when a record is yielded. Names and keys that are not valid UTF-8
//! are read lossily, so only a truncated record ends the walk.

use crate::archive::{ImageArchive, RecordInfo, RecordStream};
use crate::{Error, Result};
use memmap2::Mmap;
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use zspix_core::{ArchivePass, Image, RecordPayload, RecordRole, TaggedRecord};

/// File extension of native archives.
pub const EXTENSION: &str = "zsf";

const MAGIC: &[u8; 4] = b"ZSFA";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 8;

/// One record as laid out in the file. Samples stay in the mapping.
#[derive(Debug, Clone)]
pub struct RawRecord<'a> {
    pub name: Cow<'a, str>,
    pub role: RecordRole,
    pub dims: Vec<usize>,
    pub attrs: Vec<(Cow<'a, str>, f64)>,
    data: &'a [u8],
}

impl RawRecord<'_> {
    /// Looks up a numeric attribute.
    #[must_use]
    pub fn attr(&self, key: &str) -> Option<f64> {
        self.attrs
            .iter()
            .find_map(|(k, v)| (k == key).then_some(*v))
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len() / 8
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decodes the samples in stored order.
    #[must_use]
    pub fn samples(&self) -> Vec<f64> {
        self.data
            .chunks_exact(8)
            .map(|chunk| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(chunk);
                f64::from_le_bytes(buf)
            })
            .collect()
    }

    /// Decodes the record as an image if it has rank 2.
    ///
    /// # Errors
    /// Returns an error if the samples do not fill the declared shape.
    pub fn payload(&self) -> Result<RecordPayload> {
        match self.dims.as_slice() {
            &[height, width] => Ok(RecordPayload::Image(Image::from_vec(
                width,
                height,
                self.samples(),
            )?)),
            dims => Ok(RecordPayload::Other { rank: dims.len() }),
        }
    }

    fn info(&self, index: usize) -> RecordInfo {
        RecordInfo {
            index,
            name: self.name.to_string(),
            role: self.role,
            dims: self.dims.clone(),
        }
    }
}

/// Bounds-checked little-endian reader over the mapping.
struct ByteCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                Error::InvalidFormat(format!(
                    "truncated record: need {n} bytes at offset {}, file has {}",
                    self.pos,
                    self.bytes.len()
                ))
            })?;
        let bytes = self.bytes;
        let slice = &bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f64(&mut self) -> Result<f64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(f64::from_le_bytes(buf))
    }

    fn str(&mut self, len: usize) -> Result<Cow<'a, str>> {
        let text = String::from_utf8_lossy(self.take(len)?);
        if let Cow::Owned(text) = &text {
            log::debug!("Replaced invalid UTF-8 in {text:?}");
        }
        Ok(text)
    }

    fn record(&mut self) -> Result<RawRecord<'a>> {
        let name_len = usize::from(self.u16()?);
        let name = self.str(name_len)?;
        let role = RecordRole::from_code(self.u8()?);
        let rank = usize::from(self.u8()?);
        let dims = (0..rank)
            .map(|_| self.u32().map(|d| d as usize))
            .collect::<Result<Vec<_>>>()?;
        let attr_count = usize::from(self.u16()?);
        let mut attrs = Vec::with_capacity(attr_count);
        for _ in 0..attr_count {
            let key_len = usize::from(self.u16()?);
            let key = self.str(key_len)?;
            attrs.push((key, self.f64()?));
        }
        let byte_len = dims
            .iter()
            .try_fold(8usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| Error::InvalidFormat(format!("record {name}: shape overflows")))?;
        let data = self.take(byte_len)?;
        Ok(RawRecord {
            name,
            role,
            dims,
            attrs,
            data,
        })
    }
}

/// Iterator over the raw records of a mapped archive.
///
/// Stops after the first error.
pub struct RawRecords<'a> {
    cursor: ByteCursor<'a>,
    failed: bool,
}

impl<'a> Iterator for RawRecords<'a> {
    type Item = Result<RawRecord<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.cursor.pos >= self.cursor.bytes.len() {
            return None;
        }
        let record = self.cursor.record();
        self.failed = record.is_err();
        Some(record)
    }
}

/// A memory-mapped `.zsf` archive.
pub struct NativeArchive {
    mmap: Mmap,
    path: PathBuf,
}

impl NativeArchive {
    /// Opens and validates the header of a native archive.
    ///
    /// # Errors
    /// Returns an error if the file cannot be mapped or is not a version 1
    /// `.zsf` archive.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // This is the standard safety contract for memory mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < HEADER_LEN || &mmap[..4] != MAGIC {
            return Err(Error::InvalidFormat(format!(
                "{} is not a zsf archive",
                path.as_ref().display()
            )));
        }
        let version = u32::from_le_bytes([mmap[4], mmap[5], mmap[6], mmap[7]]);
        if version != VERSION {
            return Err(Error::InvalidFormat(format!(
                "unsupported zsf version {version}"
            )));
        }
        Ok(Self {
            mmap,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Walks the record headers without decoding samples.
    #[must_use]
    pub fn raw_records(&self) -> RawRecords<'_> {
        RawRecords {
            cursor: ByteCursor {
                bytes: &self.mmap[..],
                pos: HEADER_LEN,
            },
            failed: false,
        }
    }

    /// Finds the first record called `name`.
    ///
    /// # Errors
    /// Returns an error if the archive is malformed before `name` is found.
    pub fn find(&self, name: &str) -> Result<Option<RawRecord<'_>>> {
        for record in self.raw_records() {
            let record = record?;
            if record.name == name {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}

impl ImageArchive for NativeArchive {
    fn path(&self) -> &Path {
        &self.path
    }

    fn records(&self, pass: ArchivePass) -> RecordStream<'_> {
        Box::new(self.raw_records().enumerate().map(move |(index, raw)| -> Result<TaggedRecord> {
            let raw = raw?;
            let payload = raw.payload()?;
            Ok(TaggedRecord::classify(
                index,
                raw.name.to_string(),
                raw.role,
                pass,
                payload,
            ))
        }))
    }

    fn list(&self) -> Result<Vec<RecordInfo>> {
        self.raw_records()
            .enumerate()
            .map(|(index, raw)| raw.map(|raw| raw.info(index)))
            .collect()
    }
}

/// Buffered writer producing `.zsf` archives.
pub struct NativeArchiveWriter {
    writer: BufWriter<File>,
}

impl NativeArchiveWriter {
    /// Creates the file and writes the archive header.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        Ok(Self { writer })
    }

    /// Appends an image record.
    ///
    /// # Errors
    /// Returns an error on I/O failure.
    pub fn write_image(&mut self, name: &str, role: RecordRole, image: &Image) -> Result<()> {
        let samples: Vec<f64> = image.array().iter().copied().collect();
        self.write_record(name, role, &[image.height(), image.width()], &[], &samples)
    }

    /// Appends a record of any rank.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] if a field does not fit the format or
    /// `samples` does not fill `dims`, and an I/O error otherwise.
    pub fn write_record(
        &mut self,
        name: &str,
        role: RecordRole,
        dims: &[usize],
        attrs: &[(&str, f64)],
        samples: &[f64],
    ) -> Result<()> {
        let expected: usize = dims.iter().product();
        if expected != samples.len() {
            return Err(Error::InvalidFormat(format!(
                "record {name}: shape {dims:?} needs {expected} samples, got {}",
                samples.len()
            )));
        }
        let rank = u8::try_from(dims.len())
            .map_err(|_| Error::InvalidFormat(format!("record {name}: rank too large")))?;
        let attr_count = u16::try_from(attrs.len())
            .map_err(|_| Error::InvalidFormat(format!("record {name}: too many attributes")))?;

        self.write_str(name)?;
        self.writer.write_all(&[role.code(), rank])?;
        for &dim in dims {
            let dim = u32::try_from(dim)
                .map_err(|_| Error::InvalidFormat(format!("record {name}: dimension too large")))?;
            self.writer.write_all(&dim.to_le_bytes())?;
        }
        self.writer.write_all(&attr_count.to_le_bytes())?;
        for &(key, value) in attrs {
            self.write_str(key)?;
            self.writer.write_all(&value.to_le_bytes())?;
        }
        for sample in samples {
            self.writer.write_all(&sample.to_le_bytes())?;
        }
        Ok(())
    }

    /// Flushes buffered records to disk.
    ///
    /// # Errors
    /// Returns an error on I/O failure.
    pub fn finish(mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn write_str(&mut self, value: &str) -> Result<()> {
        let len = u16::try_from(value.len())
            .map_err(|_| Error::InvalidFormat(format!("string too long: {} bytes", value.len())))?;
        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(value.as_bytes())?;
        Ok(())
    }
}
