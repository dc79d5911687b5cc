//! Typed archive records.
//!
//! Archives yield [`TaggedRecord`]s. A record is tagged once, when it is
//! read, from its stored [`RecordRole`] and the [`ArchivePass`] reading it;
//! consumers then filter on the tag instead of inspecting record contents.

use crate::{Frame, Image};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Which phase of processing is reading an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ArchivePass {
    /// Pedestal estimation.
    Calibration,
    /// Zero suppression and clustering.
    Data,
}

/// Role stored alongside a record in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RecordRole {
    /// No role stored: usable by whichever pass reads it.
    #[default]
    Untagged,
    Calibration,
    Data,
}

impl RecordRole {
    /// Stable one-byte encoding used by on-disk formats.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Untagged => 0,
            Self::Calibration => 1,
            Self::Data => 2,
        }
    }

    /// Inverse of [`Self::code`]. Unknown codes are treated as untagged.
    #[must_use]
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Calibration,
            2 => Self::Data,
            _ => Self::Untagged,
        }
    }

    /// Parses the string form stored by text-attribute formats.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "calibration" | "pedestal" => Self::Calibration,
            "data" => Self::Data,
            _ => Self::Untagged,
        }
    }

    /// String form for text-attribute formats.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Untagged => "untagged",
            Self::Calibration => "calibration",
            Self::Data => "data",
        }
    }
}

impl fmt::Display for RecordRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded record contents, before tagging.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordPayload {
    /// A 2D image.
    Image(Image),
    /// Anything else; only the rank is kept.
    Other { rank: usize },
}

/// What a record is, from the point of view of the pass reading it.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordKind {
    Calibration(Image),
    Data(Image),
    /// Not a 2D image. Skipped by every consumer.
    Unknown { rank: usize },
}

/// A named, indexed, tagged archive record.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedRecord {
    /// Position in archive enumeration order, counting every record.
    pub index: usize,
    pub name: String,
    pub kind: RecordKind,
}

impl TaggedRecord {
    /// Tags a decoded payload for the given pass.
    ///
    /// Untagged images take the role of the pass reading them, so a single
    /// archive can serve both calibration and data passes.
    #[must_use]
    pub fn classify(
        index: usize,
        name: String,
        role: RecordRole,
        pass: ArchivePass,
        payload: RecordPayload,
    ) -> Self {
        let kind = match payload {
            RecordPayload::Other { rank } => RecordKind::Unknown { rank },
            RecordPayload::Image(image) => match (role, pass) {
                (RecordRole::Calibration, _) | (RecordRole::Untagged, ArchivePass::Calibration) => {
                    RecordKind::Calibration(image)
                }
                (RecordRole::Data, _) | (RecordRole::Untagged, ArchivePass::Data) => {
                    RecordKind::Data(image)
                }
            },
        };
        Self { index, name, kind }
    }

    /// Returns the calibration frame, if this record is one.
    #[must_use]
    pub fn into_calibration(self) -> Option<Frame> {
        match self.kind {
            RecordKind::Calibration(image) => Some(Frame::new(self.name, self.index, image)),
            _ => None,
        }
    }

    /// Returns the data frame, if this record is one.
    #[must_use]
    pub fn into_data(self) -> Option<Frame> {
        match self.kind {
            RecordKind::Data(image) => Some(Frame::new(self.name, self.index, image)),
            _ => None,
        }
    }

    /// Short label for the tag, for logs and listings.
    #[must_use]
    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            RecordKind::Calibration(_) => "calibration",
            RecordKind::Data(_) => "data",
            RecordKind::Unknown { .. } => "unknown",
        }
    }
}
