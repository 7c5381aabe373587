//! Segment descriptor data.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::codec_util::{ID_LENGTH, id_to_string};
use crate::error::{PilumError, Result};
use crate::index::file_names;

/// Engine version that wrote a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub bugfix: u32,
}

impl Version {
    /// The version written by this build.
    pub const LATEST: Version = Version {
        major: 1,
        minor: 0,
        bugfix: 0,
    };

    /// Oldest major version that can still be read.
    pub const MIN_SUPPORTED_MAJOR: u32 = 1;

    pub const fn new(major: u32, minor: u32, bugfix: u32) -> Self {
        Version {
            major,
            minor,
            bugfix,
        }
    }

    /// Whether segments of this version can be read and written.
    pub fn is_supported(&self) -> bool {
        self.major >= Self::MIN_SUPPORTED_MAJOR && self.major <= Self::LATEST.major
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.bugfix)
    }
}

/// Generate a random 16-byte segment id.
pub fn random_id() -> [u8; ID_LENGTH] {
    *uuid::Uuid::new_v4().as_bytes()
}

/// Immutable description of a sealed segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    /// Segment name, `_` followed by a base-36 generation.
    pub name: String,

    /// Number of documents in the segment.
    pub max_doc: u32,

    /// Version of the engine that wrote the segment.
    pub version: Version,

    /// Whether the segment's files are packed into a compound file.
    pub is_compound_file: bool,

    /// Name of the codec that wrote the segment.
    pub codec_name: String,

    /// Free-form information about how the segment was produced.
    pub diagnostics: BTreeMap<String, String>,

    /// Unique id, repeated in the header of every per-segment file.
    pub id: [u8; ID_LENGTH],

    /// Every file that belongs to the segment.
    pub files: BTreeSet<String>,
}

impl SegmentInfo {
    pub fn new(
        name: impl Into<String>,
        max_doc: u32,
        is_compound_file: bool,
        codec_name: impl Into<String>,
        diagnostics: BTreeMap<String, String>,
        id: [u8; ID_LENGTH],
    ) -> Self {
        SegmentInfo {
            name: name.into(),
            max_doc,
            version: Version::LATEST,
            is_compound_file,
            codec_name: codec_name.into(),
            diagnostics,
            id,
            files: BTreeSet::new(),
        }
    }

    /// Replace the file set, checking that every file belongs to this segment.
    pub fn set_files<I, S>(&mut self, files: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let files: BTreeSet<String> = files.into_iter().map(Into::into).collect();
        self.check_file_names(&files)?;
        self.files = files;
        Ok(())
    }

    /// Add one file, checking that it belongs to this segment.
    pub fn add_file(&mut self, file: impl Into<String>) -> Result<()> {
        let file = file.into();
        self.check_file_names(std::iter::once(&file))?;
        self.files.insert(file);
        Ok(())
    }

    /// Fail with a consistency error naming the first file that does not
    /// belong to this segment.
    pub fn check_file_names<'a, I>(&self, files: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a String>,
    {
        for file in files {
            if !file_names::matches_segment(file, &self.name) {
                return Err(PilumError::consistency(format!(
                    "invalid file name {file:?}: does not belong to segment {}",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// The segment id as lowercase hex.
    pub fn id_string(&self) -> String {
        id_to_string(&self.id)
    }
}
