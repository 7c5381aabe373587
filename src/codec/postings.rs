//! Inverted index storage.
//!
//! A postings format maps every term of a field to the documents containing
//! it. [`BlockPostingsFormat`] keeps the terms dictionary of a segment in a
//! `.tim` file and the posting lists in a `.doc` file. Posting lists are
//! stored as blocks of up to 128 doc-id deltas and frequencies, each block
//! bit-packed at its own minimal width.

use std::fmt::Debug;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::index::field_info::FieldInfo;
use crate::index::state::{SegmentReadState, SegmentWriteState};

pub mod reader;
pub mod writer;

pub use reader::BlockPostingsProducer;
pub use writer::BlockPostingsConsumer;

/// Name of the block postings format, as recorded in field attributes.
pub const BLOCK_POSTINGS_FORMAT_NAME: &str = "BlockPostings10";

pub(crate) const TERMS_CODEC: &str = "BlockPostingsTerms";
pub(crate) const TERMS_EXTENSION: &str = "tim";
pub(crate) const DOCS_CODEC: &str = "BlockPostingsDocs";
pub(crate) const DOCS_EXTENSION: &str = "doc";
pub(crate) const VERSION_START: u32 = 1;
pub(crate) const VERSION_CURRENT: u32 = VERSION_START;

/// A document containing a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    /// Document id within the segment.
    pub doc_id: u32,
    /// Occurrences of the term in the document.
    pub frequency: u32,
}

impl Posting {
    /// Create a posting.
    pub fn new(doc_id: u32, frequency: u32) -> Self {
        Posting { doc_id, frequency }
    }
}

/// The postings of one term, in increasing doc-id order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostingList {
    postings: Vec<Posting>,
}

impl PostingList {
    /// Wrap postings. Ordering is checked when the list is written.
    pub fn new(postings: Vec<Posting>) -> Self {
        PostingList { postings }
    }

    /// Append a posting.
    pub fn push(&mut self, posting: Posting) {
        self.postings.push(posting);
    }

    pub fn len(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Posting> {
        self.postings.iter()
    }

    pub fn as_slice(&self) -> &[Posting] {
        &self.postings
    }

    /// Doc ids of every posting.
    pub fn doc_ids(&self) -> Vec<u32> {
        self.postings.iter().map(|p| p.doc_id).collect()
    }

    /// Sum of the frequencies.
    pub fn total_term_freq(&self) -> u64 {
        self.postings.iter().map(|p| p.frequency as u64).sum()
    }
}

impl From<Vec<Posting>> for PostingList {
    fn from(postings: Vec<Posting>) -> Self {
        PostingList::new(postings)
    }
}

impl<'a> IntoIterator for &'a PostingList {
    type Item = &'a Posting;
    type IntoIter = std::slice::Iter<'a, Posting>;

    fn into_iter(self) -> Self::IntoIter {
        self.postings.iter()
    }
}

/// Statistics of one term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermStats {
    /// Term bytes.
    pub term: Vec<u8>,
    /// Number of documents containing the term.
    pub doc_freq: u32,
    /// Total occurrences over all documents.
    pub total_term_freq: u64,
}

/// Encodes postings for a segment.
pub trait PostingsFormat: Send + Sync + Debug {
    /// Unique name of the format.
    fn name(&self) -> &str;

    /// Start writing postings for the segment described by `state`.
    fn fields_consumer(&self, state: &SegmentWriteState) -> Result<Box<dyn FieldsConsumer>>;

    /// Open the postings written for the segment described by `state`.
    fn fields_producer(&self, state: &SegmentReadState) -> Result<Box<dyn FieldsProducer>>;
}

/// Writes the postings of one segment, one field at a time.
pub trait FieldsConsumer: Send + Debug {
    /// Write every term of `field`. Terms must be strictly ascending and each
    /// posting list non-empty with strictly increasing doc ids.
    fn write_field(&mut self, field: &FieldInfo, terms: &[(Vec<u8>, PostingList)]) -> Result<()>;

    /// Finish writing. The files are complete once this returns.
    fn close(&mut self) -> Result<()>;

    /// Discard everything written, deleting this consumer's files.
    fn abort(&mut self);
}

/// Reads the postings of one segment.
pub trait FieldsProducer: Send + Sync + Debug {
    /// Terms of `field`, or `None` if the field has no postings here.
    fn terms(&self, field: &FieldInfo) -> Result<Option<Arc<dyn Terms>>>;

    /// Verify the checksum of every file.
    fn check_integrity(&self) -> Result<()>;

    /// Release resources.
    fn close(&self) -> Result<()>;
}

/// The terms of one field.
pub trait Terms: Send + Sync + Debug {
    /// Statistics of every term, in ascending term order.
    fn stats(&self) -> &[TermStats];

    /// Sum of the document frequencies of every term.
    fn sum_doc_freq(&self) -> u64;

    /// Sum of the total term frequencies of every term.
    fn sum_total_term_freq(&self) -> u64;

    /// Decode the postings of `term`.
    fn postings(&self, term: &[u8]) -> Result<Option<PostingList>>;

    /// Number of terms.
    fn size(&self) -> usize {
        self.stats().len()
    }

    /// Document frequency of `term`, if present.
    fn doc_freq(&self, term: &[u8]) -> Option<u32> {
        let stats = self.stats();
        stats
            .binary_search_by(|s| s.term.as_slice().cmp(term))
            .ok()
            .map(|i| stats[i].doc_freq)
    }

    /// Iterate the terms in ascending order.
    fn iter(&self) -> std::slice::Iter<'_, TermStats> {
        self.stats().iter()
    }

    /// The smallest term greater than or equal to `term`.
    fn seek_ceil(&self, term: &[u8]) -> Option<&TermStats> {
        let stats = self.stats();
        let index = stats.partition_point(|s| s.term.as_slice() < term);
        stats.get(index)
    }
}

/// The block postings format.
#[derive(Debug, Clone, Default)]
pub struct BlockPostingsFormat;

impl BlockPostingsFormat {
    pub fn new() -> Self {
        BlockPostingsFormat
    }
}

impl PostingsFormat for BlockPostingsFormat {
    fn name(&self) -> &str {
        BLOCK_POSTINGS_FORMAT_NAME
    }

    fn fields_consumer(&self, state: &SegmentWriteState) -> Result<Box<dyn FieldsConsumer>> {
        Ok(Box::new(BlockPostingsConsumer::new(state)?))
    }

    fn fields_producer(&self, state: &SegmentReadState) -> Result<Box<dyn FieldsProducer>> {
        Ok(Box::new(BlockPostingsProducer::open(state)?))
    }
}
