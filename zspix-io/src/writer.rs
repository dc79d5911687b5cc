//! Output writers for cluster measurements.

use crate::Result;
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use zspix_core::ClusterMeasurement;

const CSV_HEADER: &str =
    "frame,index,cluster,size,integral,centroid_x,centroid_y,min_x,min_y,max_x,max_y,contour_area";

/// Writes per-cluster measurements as CSV, one row per cluster.
///
/// The header is written once, before the first row.
pub struct DataFileWriter<W: Write = BufWriter<File>> {
    writer: W,
    header_written: bool,
    rows: usize,
}

impl DataFileWriter {
    /// Creates a new CSV file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> DataFileWriter<W> {
    /// Wraps any writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            header_written: false,
            rows: 0,
        }
    }

    /// Appends the measurements of one frame.
    ///
    /// # Errors
    /// Returns an error on I/O failure.
    pub fn write_frame(
        &mut self,
        frame: &str,
        index: usize,
        measurements: &[ClusterMeasurement],
    ) -> Result<()> {
        if !self.header_written {
            writeln!(self.writer, "{CSV_HEADER}")?;
            self.header_written = true;
        }
        let frame = csv_field(frame);
        for (cluster, m) in measurements.iter().enumerate() {
            let (min_x, min_y, max_x, max_y) = m.bbox;
            writeln!(
                self.writer,
                "{frame},{index},{cluster},{},{},{},{},{min_x},{min_y},{max_x},{max_y},{}",
                m.size, m.integral, m.centroid_x, m.centroid_y, m.contour_area
            )?;
        }
        self.rows += measurements.len();
        Ok(())
    }

    /// Number of cluster rows written so far.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Flushes the writer.
    ///
    /// # Errors
    /// Returns an error on I/O failure.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flushes and returns the inner writer.
    ///
    /// # Errors
    /// Returns an error on I/O failure.
    pub fn into_inner(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Quotes a field containing a separator, quote or line break (RFC 4180).
fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\r', '\n']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn measurement(size: usize, integral: f64) -> ClusterMeasurement {
        ClusterMeasurement {
            size,
            integral,
            centroid_x: 1.5,
            centroid_y: 2.5,
            bbox: (1, 2, 3, 4),
            contour_area: 6.0,
        }
    }

    #[test]
    fn test_write_measurements_csv() {
        let file = NamedTempFile::new().unwrap();
        let mut writer = DataFileWriter::create(file.path()).unwrap();

        writer
            .write_frame("pic_0", 0, &[measurement(3, 42.0), measurement(1, 7.5)])
            .unwrap();
        writer.write_frame("pic_1", 1, &[]).unwrap();
        writer.write_frame("pic_2", 2, &[measurement(2, 10.0)]).unwrap();
        assert_eq!(writer.rows(), 3);
        writer.flush().unwrap();

        let content = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines[1], "pic_0,0,0,3,42,1.5,2.5,1,2,3,4,6");
        assert_eq!(lines[2], "pic_0,0,1,1,7.5,1.5,2.5,1,2,3,4,6");
        assert!(lines[3].starts_with("pic_2,2,0,2,10,"));
    }

    #[test]
    fn test_frame_names_are_quoted() {
        let mut writer = DataFileWriter::new(Vec::new());
        writer.write_frame("evt,1", 4, &[measurement(1, 2.0)]).unwrap();
        writer
            .write_frame("say \"hi\"\nthere", 5, &[measurement(1, 2.0)])
            .unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();

        let body = text.strip_prefix(&format!("{CSV_HEADER}\n")).unwrap();
        assert_eq!(
            body,
            "\"evt,1\",4,0,1,2,1.5,2.5,1,2,3,4,6\n\
             \"say \"\"hi\"\"\nthere\",5,0,1,2,1.5,2.5,1,2,3,4,6\n"
        );
    }

    #[test]
    fn test_plain_names_unquoted() {
        assert_eq!(csv_field("pic_0"), "pic_0");
        assert_eq!(csv_field("a\rb"), "\"a\rb\"");
    }

    #[test]
    fn test_header_only_once_in_memory() {
        let mut writer = DataFileWriter::new(Vec::new());
        writer.write_frame("a", 0, &[measurement(1, 1.0)]).unwrap();
        writer.write_frame("b", 1, &[measurement(1, 1.0)]).unwrap();
        let bytes = writer.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.matches("frame,index").count(), 1);
    }
}
