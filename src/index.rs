//! Writing and reading whole segments.
//!
//! A segment is written once by a [`SegmentWriter`], which buffers every
//! column and posting list, then commits them through a codec. After the
//! commit the segment is immutable and any number of threads may read it
//! through a shared [`SegmentReader`].
//!
//! # Example
//!
//! ```
//! use pilum::index::{SegmentReader, SegmentWriter, SegmentWriterConfig};
//! use pilum::storage::Storage;
//! use pilum::storage::memory::MemoryStorage;
//! use std::sync::Arc;
//!
//! # fn main() -> pilum::error::Result<()> {
//! let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
//!
//! let mut writer = SegmentWriter::new(Arc::clone(&storage), "_0", 3, SegmentWriterConfig::default())?;
//! writer.add_numeric_field("price", vec![10, 20, 30])?;
//! writer.add_term("body", "rust", 1, 2)?;
//! writer.commit()?;
//!
//! let reader = SegmentReader::open(storage, "_0")?;
//! assert_eq!(reader.numeric("price")?.get(1)?, 20);
//! assert_eq!(reader.terms("body")?.and_then(|t| t.doc_freq(b"rust")), Some(1));
//! reader.close()?;
//! # Ok(())
//! # }
//! ```

pub mod field_info;
pub mod file_names;
pub mod segment_info;
pub mod segment_reader;
pub mod segment_writer;
pub mod state;

pub use field_info::{DocValuesType, FieldInfo, FieldInfos};
pub use segment_info::{SegmentInfo, Version};
pub use segment_reader::SegmentReader;
pub use segment_writer::{SegmentWriter, SegmentWriterConfig, SortedValuesBuilder};
