use std::sync::Arc;

use ahash::AHashSet;

use crate::codec::bitpack::{self, BLOCK_SIZE};
use crate::codec::codec_util;
use crate::codec::postings::{
    DOCS_CODEC, DOCS_EXTENSION, FieldsConsumer, PostingList, TERMS_CODEC, TERMS_EXTENSION,
    VERSION_CURRENT,
};
use crate::error::{PilumError, Result};
use crate::index::field_info::FieldInfo;
use crate::index::file_names::segment_file_name;
use crate::index::state::SegmentWriteState;
use crate::storage::structured::StructWriter;
use crate::storage::{Storage, StorageOutput, delete_files_quietly};
use crate::util::bytes;

type Output = StructWriter<Box<dyn StorageOutput>>;

#[derive(Debug)]
struct TermEntry {
    term: Vec<u8>,
    doc_freq: u32,
    total_term_freq: u64,
    pointer: u64,
}

#[derive(Debug)]
struct FieldEntry {
    number: u32,
    terms: Vec<TermEntry>,
    sum_doc_freq: u64,
    sum_total_term_freq: u64,
}

/// Writes the `.doc` and `.tim` files of the block postings format.
///
/// Posting lists are streamed to `.doc` as fields arrive; the terms
/// dictionary is kept in memory and written to `.tim` on close.
#[derive(Debug)]
pub struct BlockPostingsConsumer {
    storage: Arc<dyn Storage>,
    terms_name: String,
    docs_name: String,
    terms_out: Option<Output>,
    docs_out: Option<Output>,
    max_doc: u32,
    fields: Vec<FieldEntry>,
    written: AHashSet<u32>,
    deltas: Vec<u32>,
    freqs: Vec<u32>,
    words: Vec<u32>,
}

impl BlockPostingsConsumer {
    /// Create both files and write their headers.
    pub fn new(state: &SegmentWriteState) -> Result<Self> {
        let suffix = state.segment_suffix.as_str();
        let mut consumer = BlockPostingsConsumer {
            storage: Arc::clone(&state.storage),
            terms_name: segment_file_name(&state.segment_name, suffix, TERMS_EXTENSION),
            docs_name: segment_file_name(&state.segment_name, suffix, DOCS_EXTENSION),
            terms_out: None,
            docs_out: None,
            max_doc: state.max_doc,
            fields: Vec::new(),
            written: AHashSet::new(),
            deltas: Vec::with_capacity(BLOCK_SIZE),
            freqs: Vec::with_capacity(BLOCK_SIZE),
            words: Vec::new(),
        };

        let opened = (|| -> Result<()> {
            let mut docs = StructWriter::new(consumer.storage.create_output(&consumer.docs_name)?);
            codec_util::write_index_header(
                &mut docs,
                DOCS_CODEC,
                VERSION_CURRENT,
                &state.segment_id,
                suffix,
            )?;
            consumer.docs_out = Some(docs);

            let mut terms =
                StructWriter::new(consumer.storage.create_output(&consumer.terms_name)?);
            codec_util::write_index_header(
                &mut terms,
                TERMS_CODEC,
                VERSION_CURRENT,
                &state.segment_id,
                suffix,
            )?;
            consumer.terms_out = Some(terms);
            Ok(())
        })();

        match opened {
            Ok(()) => {
                log::debug!(
                    "Writing postings {} / {}",
                    consumer.terms_name,
                    consumer.docs_name
                );
                Ok(consumer)
            }
            Err(e) => {
                consumer.abort();
                Err(e)
            }
        }
    }

    fn validate_field(&self, field: &FieldInfo, terms: &[(Vec<u8>, PostingList)]) -> Result<()> {
        if !field.has_postings {
            return Err(PilumError::consistency(format!(
                "field {:?} is not indexed for postings",
                field.name
            )));
        }
        if self.written.contains(&field.number) {
            return Err(PilumError::consistency(format!(
                "postings for field {:?} written twice",
                field.name
            )));
        }
        let term_bytes: Vec<&[u8]> = terms.iter().map(|(t, _)| t.as_slice()).collect();
        if let Some(pos) = bytes::first_unsorted(&term_bytes) {
            return Err(PilumError::consistency(format!(
                "terms of field {:?} are not strictly ascending at position {pos}",
                field.name
            )));
        }
        for (term, postings) in terms {
            self.validate_postings(field, term, postings)?;
        }
        Ok(())
    }

    fn validate_postings(&self, field: &FieldInfo, term: &[u8], postings: &PostingList) -> Result<()> {
        let term = String::from_utf8_lossy(term);
        if postings.is_empty() {
            return Err(PilumError::consistency(format!(
                "term {term:?} of field {:?} has no postings",
                field.name
            )));
        }
        let mut previous: Option<u32> = None;
        for posting in postings {
            if previous.is_some_and(|p| posting.doc_id <= p) {
                return Err(PilumError::consistency(format!(
                    "doc ids of term {term:?} in field {:?} are not strictly increasing at doc {}",
                    field.name, posting.doc_id
                )));
            }
            if posting.doc_id >= self.max_doc {
                return Err(PilumError::consistency(format!(
                    "doc {} of term {term:?} is out of range [0, {})",
                    posting.doc_id, self.max_doc
                )));
            }
            if posting.frequency == 0 {
                return Err(PilumError::consistency(format!(
                    "doc {} of term {term:?} has frequency 0",
                    posting.doc_id
                )));
            }
            previous = Some(posting.doc_id);
        }
        Ok(())
    }

    /// Stream one posting list to `.doc` and return its file pointer.
    fn write_postings(&mut self, postings: &PostingList) -> Result<u64> {
        let docs = self.docs_out.as_mut().ok_or_else(|| {
            PilumError::invalid_operation(format!("postings consumer for {} is closed", self.docs_name))
        })?;
        let pointer = docs.position();
        let mut previous = 0u32;

        for chunk in postings.as_slice().chunks(BLOCK_SIZE) {
            self.deltas.clear();
            self.freqs.clear();
            for posting in chunk {
                self.deltas.push(posting.doc_id - previous);
                self.freqs.push(posting.frequency);
                previous = posting.doc_id;
            }
            let delta_bits = bitpack::bits_required(self.deltas.iter().copied().max().unwrap_or(0) as u64);
            let freq_bits = bitpack::bits_required(self.freqs.iter().copied().max().unwrap_or(0) as u64);

            self.words.clear();
            bitpack::pack_block_into(&self.deltas, delta_bits, &mut self.words)?;
            bitpack::pack_block_into(&self.freqs, freq_bits, &mut self.words)?;
            docs.write_u32_words(&self.words)?;
        }
        Ok(pointer)
    }
}

impl FieldsConsumer for BlockPostingsConsumer {
    fn write_field(&mut self, field: &FieldInfo, terms: &[(Vec<u8>, PostingList)]) -> Result<()> {
        self.validate_field(field, terms)?;

        let mut entry = FieldEntry {
            number: field.number,
            terms: Vec::with_capacity(terms.len()),
            sum_doc_freq: 0,
            sum_total_term_freq: 0,
        };
        for (term, postings) in terms {
            let pointer = self.write_postings(postings)?;
            let doc_freq = postings.len() as u32;
            let total_term_freq = postings.total_term_freq();
            entry.sum_doc_freq += doc_freq as u64;
            entry.sum_total_term_freq += total_term_freq;
            entry.terms.push(TermEntry {
                term: term.clone(),
                doc_freq,
                total_term_freq,
                pointer,
            });
        }

        log::debug!(
            "postings field {:?}: {} terms, {} postings",
            field.name,
            entry.terms.len(),
            entry.sum_doc_freq
        );
        self.written.insert(field.number);
        self.fields.push(entry);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let (Some(mut terms_out), Some(mut docs_out)) = (self.terms_out.take(), self.docs_out.take())
        else {
            return Ok(());
        };

        codec_util::write_footer(&mut docs_out)?;
        docs_out.close()?;

        terms_out.write_varint(self.fields.len() as u64)?;
        for field in &self.fields {
            terms_out.write_varint(field.number as u64)?;
            terms_out.write_varint(field.terms.len() as u64)?;
            terms_out.write_varint(field.sum_doc_freq)?;
            terms_out.write_varint(field.sum_total_term_freq)?;

            let mut previous: &[u8] = &[];
            for term in &field.terms {
                let shared = bytes::common_prefix_len(previous, &term.term);
                let suffix = &term.term[shared..];
                terms_out.write_varint(shared as u64)?;
                terms_out.write_varint(suffix.len() as u64)?;
                terms_out.write_raw(suffix)?;
                terms_out.write_varint(term.doc_freq as u64)?;
                terms_out.write_varint(term.total_term_freq)?;
                terms_out.write_u64(term.pointer)?;
                previous = &term.term;
            }
        }
        codec_util::write_footer(&mut terms_out)?;
        terms_out.close()?;

        log::debug!(
            "Closed postings {}: {} fields",
            self.terms_name,
            self.fields.len()
        );
        Ok(())
    }

    fn abort(&mut self) {
        self.terms_out = None;
        self.docs_out = None;
        delete_files_quietly(
            self.storage.as_ref(),
            [self.terms_name.as_str(), self.docs_name.as_str()],
        );
    }
}
