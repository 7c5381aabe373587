//! # Pilum
//!
//! The segment storage layer of a full-text search engine.
//!
//! A segment is an immutable set of files holding the doc values and postings
//! of a batch of documents. Every file starts with a versioned header and ends
//! with a CRC-32 footer, and every reader validates both.
//!
//! ## Modules
//!
//! - [`storage`]: the directory abstraction, with memory and file backends
//! - [`codec`]: bit-packing, doc-values and postings formats, per-field
//!   dispatch, compound files and the format registry
//! - [`index`]: segment metadata plus the segment writer and reader
//! - [`cli`]: the `pilum` command line tool

pub mod cli;
pub mod codec;
pub mod error;
pub mod index;
pub mod storage;
pub mod util;

pub mod prelude {
    pub use crate::codec::Codec;
    pub use crate::codec::doc_values::{BinaryDocValues, NumericDocValues, SortedDocValues};
    pub use crate::codec::postings::{Posting, PostingList, Terms};
    pub use crate::error::{PilumError, Result};
    pub use crate::index::{SegmentReader, SegmentWriter, SegmentWriterConfig};
    pub use crate::storage::Storage;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
