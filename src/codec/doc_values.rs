//! Column-stride per-document values.
//!
//! A doc-values format writes one column per field: a number, a byte string,
//! or an ordinal into a sorted dictionary for every document of the segment.
//! [`ColumnarDocValuesFormat`] stores all columns of a segment in a data file
//! (`.dvd`) described by a metadata file (`.dvm`).
//!
//! # Encodings
//!
//! Numeric columns pick one of three encodings after a statistics pass:
//!
//! - **Delta**: `value - min` bit-packed at the width of `max - min`
//! - **Table**: ordinals into a dictionary of at most
//!   [`ColumnarDocValuesConfig::max_table_cardinality`] distinct values
//! - **Raw**: plain 64-bit values, when the range overflows or needs more
//!   than 32 bits
//!
//! Binary columns are fixed-width when every value has the same length and
//! otherwise carry a packed table of end addresses.

use std::fmt::Debug;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::index::field_info::FieldInfo;
use crate::index::state::{SegmentReadState, SegmentWriteState};

pub mod binary;
pub mod numeric;
pub mod reader;
pub mod sorted;
pub mod writer;

pub use reader::ColumnarDocValuesProducer;
pub use writer::ColumnarDocValuesConsumer;

/// Name of the columnar format, as recorded in field attributes.
pub const COLUMNAR_FORMAT_NAME: &str = "Columnar10";

pub(crate) const DATA_CODEC: &str = "ColumnarDocValuesData";
pub(crate) const DATA_EXTENSION: &str = "dvd";
pub(crate) const META_CODEC: &str = "ColumnarDocValuesMetadata";
pub(crate) const META_EXTENSION: &str = "dvm";
pub(crate) const VERSION_START: u32 = 1;
pub(crate) const VERSION_CURRENT: u32 = VERSION_START;

pub(crate) const ENTRY_NUMERIC: u8 = 0;
pub(crate) const ENTRY_BINARY: u8 = 1;
pub(crate) const ENTRY_SORTED: u8 = 2;

/// Encodes doc values for a segment.
pub trait DocValuesFormat: Send + Sync + Debug {
    /// Unique name of the format.
    fn name(&self) -> &str;

    /// Start writing doc values for the segment described by `state`.
    fn fields_consumer(&self, state: &SegmentWriteState) -> Result<Box<dyn DocValuesConsumer>>;

    /// Open the doc values written for the segment described by `state`.
    fn fields_producer(&self, state: &SegmentReadState) -> Result<Box<dyn DocValuesProducer>>;
}

/// Writes the doc values of one segment.
///
/// Every column must hold exactly one entry per document.
pub trait DocValuesConsumer: Send + Debug {
    /// Write a numeric column.
    fn add_numeric_field(&mut self, field: &FieldInfo, values: &[i64]) -> Result<()>;

    /// Write a binary column.
    fn add_binary_field(&mut self, field: &FieldInfo, values: &[Vec<u8>]) -> Result<()>;

    /// Write a sorted column: a strictly ascending dictionary and one ordinal
    /// per document, `-1` for documents without a value.
    fn add_sorted_field(
        &mut self,
        field: &FieldInfo,
        dictionary: &[Vec<u8>],
        ords: &[i64],
    ) -> Result<()>;

    /// Finish writing. The files are complete once this returns.
    fn close(&mut self) -> Result<()>;

    /// Discard everything written, deleting this consumer's files. Safe to
    /// call after a successful `close`.
    fn abort(&mut self);
}

/// Reads the doc values of one segment.
pub trait DocValuesProducer: Send + Sync + Debug {
    /// Numeric column of `field`.
    fn numeric(&self, field: &FieldInfo) -> Result<Arc<dyn NumericDocValues>>;

    /// Binary column of `field`. The accessor owns its own input.
    fn binary(&self, field: &FieldInfo) -> Result<Box<dyn BinaryDocValues>>;

    /// Sorted column of `field`. The accessor owns its own input.
    fn sorted(&self, field: &FieldInfo) -> Result<Box<dyn SortedDocValues>>;

    /// Verify the checksum of every file.
    fn check_integrity(&self) -> Result<()>;

    /// Release resources.
    fn close(&self) -> Result<()>;
}

/// Random access to a numeric column.
pub trait NumericDocValues: Send + Sync + Debug {
    /// Value of `doc`.
    fn get(&self, doc: u32) -> Result<i64>;

    /// Number of documents.
    fn len(&self) -> u32;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Random access to a binary column.
pub trait BinaryDocValues: Send + Debug {
    /// Bytes of `doc`.
    fn get(&mut self, doc: u32) -> Result<Vec<u8>>;

    /// Number of documents.
    fn len(&self) -> u32;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Random access to a sorted column.
pub trait SortedDocValues: Send + Debug {
    /// Ordinal of the term of `doc`, or `-1` if the document has none.
    fn ord(&self, doc: u32) -> Result<i64>;

    /// Term with ordinal `ord`.
    fn lookup_ord(&mut self, ord: u32) -> Result<Vec<u8>>;

    /// Number of distinct terms.
    fn value_count(&self) -> u32;

    /// Term of `doc`, if it has one.
    fn get(&mut self, doc: u32) -> Result<Option<Vec<u8>>> {
        let ord = self.ord(doc)?;
        if ord < 0 {
            Ok(None)
        } else {
            self.lookup_ord(ord as u32).map(Some)
        }
    }

    /// Binary search the dictionary for `term`: `Ok(ord)` when present,
    /// otherwise `Err(insertion_point)`.
    fn lookup_term(&mut self, term: &[u8]) -> Result<std::result::Result<u32, u32>> {
        let mut low = 0u32;
        let mut high = self.value_count();
        while low < high {
            let mid = low + (high - low) / 2;
            let candidate = self.lookup_ord(mid)?;
            match candidate.as_slice().cmp(term) {
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
                std::cmp::Ordering::Equal => return Ok(Ok(mid)),
            }
        }
        Ok(Err(low))
    }
}

/// Tuning knobs of [`ColumnarDocValuesFormat`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnarDocValuesConfig {
    /// Largest number of distinct values for which a numeric column may use
    /// the table encoding.
    pub max_table_cardinality: usize,
}

impl Default for ColumnarDocValuesConfig {
    fn default() -> Self {
        ColumnarDocValuesConfig {
            max_table_cardinality: 256,
        }
    }
}

/// The default doc-values format.
#[derive(Debug, Clone, Default)]
pub struct ColumnarDocValuesFormat {
    config: ColumnarDocValuesConfig,
}

impl ColumnarDocValuesFormat {
    pub fn new(config: ColumnarDocValuesConfig) -> Self {
        ColumnarDocValuesFormat { config }
    }

    pub fn config(&self) -> &ColumnarDocValuesConfig {
        &self.config
    }
}

impl DocValuesFormat for ColumnarDocValuesFormat {
    fn name(&self) -> &str {
        COLUMNAR_FORMAT_NAME
    }

    fn fields_consumer(&self, state: &SegmentWriteState) -> Result<Box<dyn DocValuesConsumer>> {
        Ok(Box::new(ColumnarDocValuesConsumer::new(
            state,
            self.config.clone(),
        )?))
    }

    fn fields_producer(&self, state: &SegmentReadState) -> Result<Box<dyn DocValuesProducer>> {
        Ok(Box::new(ColumnarDocValuesProducer::open(state)?))
    }
}
