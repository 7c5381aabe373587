//! Context handed to formats when a segment is written or read.

use std::sync::Arc;

use crate::codec::codec_util::ID_LENGTH;
use crate::index::field_info::FieldInfos;
use crate::storage::Storage;

/// Everything a format needs to write its files for one segment.
#[derive(Debug, Clone)]
pub struct SegmentWriteState {
    /// Where files are created.
    pub storage: Arc<dyn Storage>,

    /// Name of the segment being written.
    pub segment_name: String,

    /// Id of the segment being written.
    pub segment_id: [u8; ID_LENGTH],

    /// Number of documents in the segment.
    pub max_doc: u32,

    /// Fields of the segment.
    pub field_infos: Arc<FieldInfos>,

    /// Suffix inserted into file names, empty for the top-level format.
    pub segment_suffix: String,
}

impl SegmentWriteState {
    /// A copy of this state with a different suffix.
    pub fn with_suffix(&self, suffix: impl Into<String>) -> Self {
        SegmentWriteState {
            segment_suffix: suffix.into(),
            ..self.clone()
        }
    }
}

/// Everything a format needs to open its files for one segment.
#[derive(Debug, Clone)]
pub struct SegmentReadState {
    /// Where files are read from; the compound reader for compound segments.
    pub storage: Arc<dyn Storage>,

    /// Name of the segment being read.
    pub segment_name: String,

    /// Id recorded in the segment descriptor.
    pub segment_id: [u8; ID_LENGTH],

    /// Number of documents in the segment.
    pub max_doc: u32,

    /// Fields of the segment.
    pub field_infos: Arc<FieldInfos>,

    /// Suffix inserted into file names, empty for the top-level format.
    pub segment_suffix: String,
}

impl SegmentReadState {
    /// A copy of this state with a different suffix.
    pub fn with_suffix(&self, suffix: impl Into<String>) -> Self {
        SegmentReadState {
            segment_suffix: suffix.into(),
            ..self.clone()
        }
    }
}
