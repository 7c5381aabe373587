use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::codec::bitpack::{self, BLOCK_SIZE};
use crate::codec::codec_util::{self, FOOTER_LENGTH};
use crate::codec::postings::{
    DOCS_CODEC, DOCS_EXTENSION, FieldsProducer, Posting, PostingList, TERMS_CODEC,
    TERMS_EXTENSION, TermStats, Terms, VERSION_CURRENT, VERSION_START,
};
use crate::error::{PilumError, Result};
use crate::index::field_info::{FieldInfo, FieldInfos};
use crate::index::file_names::segment_file_name;
use crate::index::state::SegmentReadState;
use crate::storage::structured::StructReader;
use crate::storage::{Storage, StorageInput};

/// The `.doc` input shared by a producer and every [`BlockTerms`] it hands
/// out. Decoding always happens on a clone.
#[derive(Debug)]
struct DocsInput {
    name: String,
    input: Mutex<Box<dyn StorageInput>>,
    closed: AtomicBool,
}

impl DocsInput {
    fn clone_input(&self) -> Result<Box<dyn StorageInput>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PilumError::invalid_operation(format!(
                "postings {} are closed",
                self.name
            )));
        }
        self.input.lock().clone_input()
    }
}

/// Terms of one field of a block postings file.
#[derive(Debug)]
pub struct BlockTerms {
    field: String,
    stats: Vec<TermStats>,
    pointers: Vec<u64>,
    sum_doc_freq: u64,
    sum_total_term_freq: u64,
    max_doc: u32,
    docs: Arc<DocsInput>,
}

impl BlockTerms {
    fn decode(&self, index: usize) -> Result<PostingList> {
        let mut reader = StructReader::new(self.docs.clone_input()?)?;
        reader.seek(self.pointers[index])?;

        let stats = &self.stats[index];
        let mut postings = Vec::with_capacity(stats.doc_freq as usize);
        let mut remaining = stats.doc_freq as usize;
        let mut previous = 0u32;

        while remaining > 0 {
            let expected = remaining.min(BLOCK_SIZE);
            let deltas = read_block(&mut reader, expected)?;
            let freqs = read_block(&mut reader, expected)?;
            for (delta, frequency) in deltas.into_iter().zip(freqs) {
                if delta == 0 && !postings.is_empty() {
                    return Err(self.corrupt(stats, "repeats a doc id"));
                }
                let doc_id = previous
                    .checked_add(delta)
                    .filter(|&doc| doc < self.max_doc)
                    .ok_or_else(|| self.corrupt(stats, "points past the last document"))?;
                if frequency == 0 {
                    return Err(self.corrupt(stats, "has a zero frequency"));
                }
                postings.push(Posting { doc_id, frequency });
                previous = doc_id;
            }
            remaining -= expected;
        }

        let list = PostingList::new(postings);
        if list.total_term_freq() != stats.total_term_freq {
            return Err(self.corrupt(stats, "disagrees with its total term frequency"));
        }
        Ok(list)
    }

    fn corrupt(&self, stats: &TermStats, problem: &str) -> PilumError {
        PilumError::corruption(format!(
            "postings of term {:?} in field {:?} {problem}",
            String::from_utf8_lossy(&stats.term),
            self.field
        ))
    }
}

fn read_block<R: StorageInput>(reader: &mut StructReader<R>, expected: usize) -> Result<Vec<u32>> {
    let (count, bits) = bitpack::decode_header(reader.read_u32()?)?;
    if count != expected {
        return Err(PilumError::corruption(format!(
            "postings block holds {count} values, expected {expected}"
        )));
    }
    let payload = reader.read_u32_words(bitpack::payload_words(count, bits))?;
    let mut values = vec![0u32; count];
    bitpack::unpack_payload(&payload, bits, &mut values)?;
    Ok(values)
}

impl Terms for BlockTerms {
    fn stats(&self) -> &[TermStats] {
        &self.stats
    }

    fn sum_doc_freq(&self) -> u64 {
        self.sum_doc_freq
    }

    fn sum_total_term_freq(&self) -> u64 {
        self.sum_total_term_freq
    }

    fn postings(&self, term: &[u8]) -> Result<Option<PostingList>> {
        match self.stats.binary_search_by(|s| s.term.as_slice().cmp(term)) {
            Ok(index) => self.decode(index).map(Some),
            Err(_) => Ok(None),
        }
    }
}

/// Reads the postings of one segment.
///
/// The terms dictionary is loaded and validated at open; posting lists are
/// decoded on demand.
#[derive(Debug)]
pub struct BlockPostingsProducer {
    storage: Arc<dyn Storage>,
    terms_name: String,
    docs: Arc<DocsInput>,
    fields: AHashMap<u32, Arc<BlockTerms>>,
}

impl BlockPostingsProducer {
    pub fn open(state: &SegmentReadState) -> Result<Self> {
        let suffix = state.segment_suffix.as_str();
        let terms_name = segment_file_name(&state.segment_name, suffix, TERMS_EXTENSION);
        let docs_name = segment_file_name(&state.segment_name, suffix, DOCS_EXTENSION);

        let docs_input = state.storage.open_input(&docs_name)?;
        let docs_start = {
            let mut header = StructReader::new(docs_input.clone_input()?)?;
            codec_util::check_index_header(
                &mut header,
                DOCS_CODEC,
                VERSION_START,
                VERSION_CURRENT,
                &state.segment_id,
                suffix,
            )?;
            header.position()
        };
        codec_util::checksum_entire_file(docs_input.as_ref())?;
        let docs_end = docs_input.size()? - FOOTER_LENGTH;

        let docs = Arc::new(DocsInput {
            name: docs_name,
            input: Mutex::new(docs_input),
            closed: AtomicBool::new(false),
        });

        let mut terms_in = StructReader::new(state.storage.open_input(&terms_name)?)?;
        codec_util::check_index_header(
            &mut terms_in,
            TERMS_CODEC,
            VERSION_START,
            VERSION_CURRENT,
            &state.segment_id,
            suffix,
        )?;

        let field_count = terms_in.read_varint()?;
        let mut fields = AHashMap::new();
        for _ in 0..field_count {
            let (number, terms) = read_field(
                &mut terms_in,
                &state.field_infos,
                state.max_doc,
                (docs_start, docs_end),
                &docs,
            )?;
            if fields.insert(number, Arc::new(terms)).is_some() {
                return Err(PilumError::corruption(format!(
                    "duplicate postings for field {number} in {terms_name}"
                )));
            }
        }
        codec_util::check_footer(&mut terms_in)?;
        terms_in.close()?;

        log::debug!(
            "Opened postings {} with {} fields",
            terms_name,
            fields.len()
        );

        Ok(BlockPostingsProducer {
            storage: Arc::clone(&state.storage),
            terms_name,
            docs,
            fields,
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.docs.closed.load(Ordering::Acquire) {
            Err(PilumError::invalid_operation(format!(
                "postings {} are closed",
                self.terms_name
            )))
        } else {
            Ok(())
        }
    }
}

fn read_field(
    input: &mut StructReader<Box<dyn StorageInput>>,
    field_infos: &FieldInfos,
    max_doc: u32,
    (docs_start, docs_end): (u64, u64),
    docs: &Arc<DocsInput>,
) -> Result<(u32, BlockTerms)> {
    let number = input.read_varint_u32()?;
    let field = field_infos.field_by_number(number).ok_or_else(|| {
        PilumError::corruption(format!("postings for unknown field {number}"))
    })?;
    if !field.has_postings {
        return Err(PilumError::corruption(format!(
            "postings stored for field {:?}, which is not indexed",
            field.name
        )));
    }

    let term_count = input.read_varint()?;
    let sum_doc_freq = input.read_varint()?;
    let sum_total_term_freq = input.read_varint()?;

    // Each term needs at least 12 bytes, which bounds the allocation below.
    if term_count.saturating_mul(12) > input.remaining() {
        return Err(PilumError::corruption(format!(
            "field {:?} claims {term_count} terms",
            field.name
        )));
    }

    let mut stats: Vec<TermStats> = Vec::with_capacity(term_count as usize);
    let mut pointers = Vec::with_capacity(term_count as usize);
    let mut doc_freqs = 0u64;
    let mut total_freqs = 0u64;

    for _ in 0..term_count {
        let shared = input.read_varint()? as usize;
        let suffix_len = input.read_varint()? as usize;
        let previous: &[u8] = stats.last().map(|s| s.term.as_slice()).unwrap_or_default();
        if shared > previous.len() {
            return Err(PilumError::corruption(format!(
                "term of field {:?} shares {shared} bytes with a {}-byte term",
                field.name,
                previous.len()
            )));
        }
        if suffix_len as u64 > input.remaining() {
            return Err(PilumError::corruption(format!(
                "term suffix of {suffix_len} bytes in field {:?} is truncated",
                field.name
            )));
        }
        let mut term = previous[..shared].to_vec();
        term.extend_from_slice(&input.read_raw(suffix_len)?);
        if !stats.is_empty() && term.as_slice() <= previous {
            return Err(PilumError::corruption(format!(
                "terms of field {:?} are out of order",
                field.name
            )));
        }

        let doc_freq = input.read_varint_u32()?;
        let total_term_freq = input.read_varint()?;
        let pointer = input.read_u64()?;
        if doc_freq == 0 || doc_freq > max_doc || total_term_freq < doc_freq as u64 {
            return Err(PilumError::corruption(format!(
                "invalid statistics for a term of field {:?}: doc_freq {doc_freq}, total {total_term_freq}",
                field.name
            )));
        }
        if pointer < docs_start || pointer >= docs_end {
            return Err(PilumError::corruption(format!(
                "postings pointer {pointer} of field {:?} lies outside [{docs_start}, {docs_end})",
                field.name
            )));
        }

        doc_freqs += doc_freq as u64;
        total_freqs += total_term_freq;
        stats.push(TermStats {
            term,
            doc_freq,
            total_term_freq,
        });
        pointers.push(pointer);
    }

    if doc_freqs != sum_doc_freq || total_freqs != sum_total_term_freq {
        return Err(PilumError::corruption(format!(
            "term statistics of field {:?} do not add up",
            field.name
        )));
    }

    log::trace!("field {:?}: {} terms", field.name, stats.len());
    let terms = BlockTerms {
        field: field.name.clone(),
        stats,
        pointers,
        sum_doc_freq,
        sum_total_term_freq,
        max_doc,
        docs: Arc::clone(docs),
    };
    Ok((number, terms))
}

impl FieldsProducer for BlockPostingsProducer {
    fn terms(&self, field: &FieldInfo) -> Result<Option<Arc<dyn Terms>>> {
        self.ensure_open()?;
        Ok(self
            .fields
            .get(&field.number)
            .map(|terms| Arc::clone(terms) as Arc<dyn Terms>))
    }

    fn check_integrity(&self) -> Result<()> {
        let docs = self.docs.clone_input()?;
        codec_util::checksum_entire_file(docs.as_ref())?;
        let terms = self.storage.open_input(&self.terms_name)?;
        codec_util::checksum_entire_file(terms.as_ref())?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if !self.docs.closed.swap(true, Ordering::AcqRel) {
            self.docs.input.lock().close()?;
            log::debug!("Closed postings {}", self.terms_name);
        }
        Ok(())
    }
}
