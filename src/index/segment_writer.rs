//! Buffers the columns and postings of one segment and commits them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::codec::doc_values::DocValuesFormat;
use crate::codec::postings::{Posting, PostingList, PostingsFormat};
use crate::codec::registry::FormatRegistry;
use crate::codec::{CODEC_NAME, Codec};
use crate::error::{PilumError, Result};
use crate::index::field_info::{DocValuesType, FieldInfo, FieldInfos};
use crate::index::file_names::{self, SEGMENT_INFO_EXTENSION, segment_file_name};
use crate::index::segment_info::{SegmentInfo, random_id};
use crate::index::state::SegmentWriteState;
use crate::storage::Storage;
use crate::storage::tracking::TrackingStorage;

/// Segment writer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentWriterConfig {
    /// Pack the segment's files into a compound file.
    pub use_compound_file: bool,

    /// Name of the codec, resolved through the global format registry.
    pub codec_name: String,

    /// Extra diagnostics stored in the segment descriptor.
    pub diagnostics: BTreeMap<String, String>,
}

impl Default for SegmentWriterConfig {
    fn default() -> Self {
        SegmentWriterConfig {
            use_compound_file: true,
            codec_name: CODEC_NAME.to_string(),
            diagnostics: BTreeMap::new(),
        }
    }
}

/// Builds the dictionary and ordinals of a sorted column.
///
/// ```
/// use pilum::index::SortedValuesBuilder;
///
/// let mut builder = SortedValuesBuilder::new();
/// builder.add(Some(b"red"));
/// builder.add(None::<&[u8]>);
/// builder.add(Some(b"blue"));
/// builder.add(Some(b"red"));
///
/// let (dictionary, ords) = builder.build();
/// assert_eq!(dictionary, vec![b"blue".to_vec(), b"red".to_vec()]);
/// assert_eq!(ords, vec![1, -1, 0, 1]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SortedValuesBuilder {
    values: Vec<Option<Vec<u8>>>,
    distinct: BTreeSet<Vec<u8>>,
}

impl SortedValuesBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the value of the next document.
    pub fn add<V: AsRef<[u8]>>(&mut self, value: Option<V>) {
        let value = value.map(|v| v.as_ref().to_vec());
        if let Some(v) = &value {
            if !self.distinct.contains(v) {
                self.distinct.insert(v.clone());
            }
        }
        self.values.push(value);
    }

    /// Number of documents added.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The ascending dictionary and one ordinal per document, `-1` where the
    /// document has no value.
    pub fn build(self) -> (Vec<Vec<u8>>, Vec<i64>) {
        let dictionary: Vec<Vec<u8>> = self.distinct.into_iter().collect();
        let ords = self
            .values
            .iter()
            .map(|value| match value {
                Some(v) => dictionary
                    .binary_search(v)
                    .map_or(-1, |ord| ord as i64),
                None => -1,
            })
            .collect();
        (dictionary, ords)
    }
}

#[derive(Debug)]
enum BufferedDocValues {
    Numeric(Vec<i64>),
    Binary(Vec<Vec<u8>>),
    Sorted {
        dictionary: Vec<Vec<u8>>,
        ords: Vec<i64>,
    },
}

impl BufferedDocValues {
    fn doc_values_type(&self) -> DocValuesType {
        match self {
            BufferedDocValues::Numeric(_) => DocValuesType::Numeric,
            BufferedDocValues::Binary(_) => DocValuesType::Binary,
            BufferedDocValues::Sorted { .. } => DocValuesType::Sorted,
        }
    }
}

#[derive(Debug)]
struct PendingField {
    name: String,
    doc_values: Option<BufferedDocValues>,
    postings: Option<BTreeMap<Vec<u8>, PostingList>>,
}

/// Writes one segment.
///
/// Fields are numbered in the order they are first added. Nothing reaches the
/// storage before [`commit`](Self::commit); a failed commit deletes every file
/// it created.
#[derive(Debug)]
pub struct SegmentWriter {
    storage: Arc<dyn Storage>,
    segment_name: String,
    max_doc: u32,
    config: SegmentWriterConfig,
    codec: Arc<Codec>,
    fields: Vec<PendingField>,
    field_numbers: AHashMap<String, usize>,
    committed: bool,
}

impl SegmentWriter {
    /// Create a writer for a segment of `max_doc` documents, using the codec
    /// named by `config`.
    pub fn new(
        storage: Arc<dyn Storage>,
        segment_name: impl Into<String>,
        max_doc: u32,
        config: SegmentWriterConfig,
    ) -> Result<Self> {
        let codec = FormatRegistry::global()
            .read()
            .codec(&config.codec_name)
            .ok_or_else(|| {
                PilumError::invalid_argument(format!("unknown codec {:?}", config.codec_name))
            })?;
        Self::with_codec(storage, segment_name, max_doc, config, codec)
    }

    /// Create a writer that uses `codec` instead of looking one up by name.
    ///
    /// The codec must be registered under its name for the segment to be
    /// readable again.
    pub fn with_codec(
        storage: Arc<dyn Storage>,
        segment_name: impl Into<String>,
        max_doc: u32,
        config: SegmentWriterConfig,
        codec: Arc<Codec>,
    ) -> Result<Self> {
        let segment_name = segment_name.into();
        file_names::validate_segment_name(&segment_name)?;
        if max_doc == 0 {
            return Err(PilumError::invalid_argument(
                "a segment must contain at least one document",
            ));
        }
        let descriptor = segment_file_name(&segment_name, "", SEGMENT_INFO_EXTENSION);
        if storage.file_exists(&descriptor) {
            return Err(PilumError::consistency(format!(
                "segment {segment_name} already exists"
            )));
        }

        Ok(SegmentWriter {
            storage,
            segment_name,
            max_doc,
            config,
            codec,
            fields: Vec::new(),
            field_numbers: AHashMap::new(),
            committed: false,
        })
    }

    pub fn segment_name(&self) -> &str {
        &self.segment_name
    }

    pub fn max_doc(&self) -> u32 {
        self.max_doc
    }

    pub fn codec(&self) -> &Arc<Codec> {
        &self.codec
    }

    /// Buffer a numeric column with one value per document.
    pub fn add_numeric_field(&mut self, field: &str, values: Vec<i64>) -> Result<()> {
        self.check_column_len(field, values.len())?;
        self.set_doc_values(field, BufferedDocValues::Numeric(values))
    }

    /// Buffer a binary column with one value per document.
    pub fn add_binary_field(&mut self, field: &str, values: Vec<Vec<u8>>) -> Result<()> {
        self.check_column_len(field, values.len())?;
        self.set_doc_values(field, BufferedDocValues::Binary(values))
    }

    /// Buffer a sorted column with at most one term per document.
    pub fn add_sorted_field<I, V>(&mut self, field: &str, values: I) -> Result<()>
    where
        I: IntoIterator<Item = Option<V>>,
        V: AsRef<[u8]>,
    {
        let mut builder = SortedValuesBuilder::new();
        for value in values {
            builder.add(value);
        }
        self.check_column_len(field, builder.len())?;
        let (dictionary, ords) = builder.build();
        self.set_doc_values(field, BufferedDocValues::Sorted { dictionary, ords })
    }

    /// Buffer the whole posting list of `term`.
    pub fn add_postings(
        &mut self,
        field: &str,
        term: impl Into<Vec<u8>>,
        postings: PostingList,
    ) -> Result<()> {
        self.check_open()?;
        let term = term.into();
        let terms = self.postings_mut(field);
        if terms.contains_key(&term) {
            return Err(PilumError::invalid_argument(format!(
                "postings of term {:?} in field {field:?} added twice",
                String::from_utf8_lossy(&term)
            )));
        }
        terms.insert(term, postings);
        Ok(())
    }

    /// Append one posting to the list of `term`. Documents must be added in
    /// increasing order.
    pub fn add_term(
        &mut self,
        field: &str,
        term: impl Into<Vec<u8>>,
        doc_id: u32,
        frequency: u32,
    ) -> Result<()> {
        self.check_open()?;
        if doc_id >= self.max_doc {
            return Err(PilumError::invalid_argument(format!(
                "doc {doc_id} out of range for segment of {} docs",
                self.max_doc
            )));
        }
        let term = term.into();
        let list = self.postings_mut(field).entry(term).or_default();
        if let Some(last) = list.as_slice().last() {
            if last.doc_id >= doc_id {
                return Err(PilumError::invalid_argument(format!(
                    "doc {doc_id} added after doc {} in field {field:?}",
                    last.doc_id
                )));
            }
        }
        list.push(Posting::new(doc_id, frequency));
        Ok(())
    }

    /// Write the segment.
    ///
    /// Returns the descriptor that was written. On failure every file created
    /// by this commit is deleted and the writer cannot be used again.
    pub fn commit(&mut self) -> Result<SegmentInfo> {
        self.check_open()?;
        self.committed = true;

        let tracking = Arc::new(TrackingStorage::new(Arc::clone(&self.storage)));
        match self.write_segment(&tracking) {
            Ok(info) => {
                log::debug!(
                    "Committed segment {}: {} docs, {} fields, {} files",
                    info.name,
                    info.max_doc,
                    self.fields.len(),
                    info.files.len()
                );
                Ok(info)
            }
            Err(e) => {
                log::debug!("Commit of segment {} failed: {e}", self.segment_name);
                tracking.delete_created_quietly();
                Err(e)
            }
        }
    }

    fn write_segment(&mut self, tracking: &Arc<TrackingStorage>) -> Result<SegmentInfo> {
        let segment_id = random_id();
        let field_infos = Arc::new(self.build_field_infos()?);
        let state = SegmentWriteState {
            storage: Arc::clone(tracking) as Arc<dyn Storage>,
            segment_name: self.segment_name.clone(),
            segment_id,
            max_doc: self.max_doc,
            field_infos: Arc::clone(&field_infos),
            segment_suffix: String::new(),
        };

        self.write_postings(&state)?;
        self.write_doc_values(&state)?;
        self.codec
            .field_infos_format()
            .write(tracking.as_ref(), &self.segment_name, &segment_id, "", &field_infos)?;

        let mut files: Vec<String> = tracking.created_files().into_iter().collect();
        if self.config.use_compound_file {
            self.codec
                .compound_format()
                .write(tracking.as_ref(), &self.segment_name, &segment_id, &files)?;
            for file in &files {
                tracking.delete_file(file)?;
            }
            files = self
                .codec
                .compound_format()
                .file_names(&self.segment_name)
                .to_vec();
        }

        let mut info = SegmentInfo::new(
            self.segment_name.clone(),
            self.max_doc,
            self.config.use_compound_file,
            self.codec.name(),
            self.diagnostics(),
            segment_id,
        );
        info.set_files(files)?;
        self.codec
            .segment_info_format()
            .write(tracking.as_ref(), &mut info)?;
        tracking.sync()?;
        Ok(info)
    }

    fn build_field_infos(&self) -> Result<FieldInfos> {
        let fields = self
            .fields
            .iter()
            .enumerate()
            .map(|(number, field)| {
                let doc_values_type = field
                    .doc_values
                    .as_ref()
                    .map_or(DocValuesType::None, BufferedDocValues::doc_values_type);
                log::trace!(
                    "field {:?} -> number {number}, {doc_values_type}, postings={}",
                    field.name,
                    field.postings.is_some()
                );
                FieldInfo::new(
                    field.name.clone(),
                    number as u32,
                    doc_values_type,
                    field.postings.is_some(),
                )
            })
            .collect();
        FieldInfos::new(fields)
    }

    fn write_postings(&mut self, state: &SegmentWriteState) -> Result<()> {
        if !state.field_infos.has_postings() {
            return Ok(());
        }
        let mut consumer = self.codec.postings_format().fields_consumer(state)?;
        let written = (|| -> Result<()> {
            for field in &mut self.fields {
                let Some(postings) = field.postings.take() else {
                    continue;
                };
                let info = field_info(state, &field.name)?;
                let terms: Vec<(Vec<u8>, PostingList)> = postings.into_iter().collect();
                consumer.write_field(info, &terms)?;
            }
            consumer.close()
        })();
        if written.is_err() {
            consumer.abort();
        }
        written
    }

    fn write_doc_values(&mut self, state: &SegmentWriteState) -> Result<()> {
        if !state.field_infos.has_doc_values() {
            return Ok(());
        }
        let mut consumer = self.codec.doc_values_format().fields_consumer(state)?;
        let written = (|| -> Result<()> {
            for field in &mut self.fields {
                let Some(values) = field.doc_values.take() else {
                    continue;
                };
                let info = field_info(state, &field.name)?;
                match values {
                    BufferedDocValues::Numeric(values) => consumer.add_numeric_field(info, &values)?,
                    BufferedDocValues::Binary(values) => consumer.add_binary_field(info, &values)?,
                    BufferedDocValues::Sorted { dictionary, ords } => {
                        consumer.add_sorted_field(info, &dictionary, &ords)?
                    }
                }
            }
            consumer.close()
        })();
        if written.is_err() {
            consumer.abort();
        }
        written
    }

    fn diagnostics(&self) -> BTreeMap<String, String> {
        let mut diagnostics = self.config.diagnostics.clone();
        diagnostics
            .entry("source".to_string())
            .or_insert_with(|| "flush".to_string());
        diagnostics.insert("os".to_string(), std::env::consts::OS.to_string());
        diagnostics.insert("pilum.version".to_string(), crate::VERSION.to_string());
        diagnostics.insert("timestamp".to_string(), chrono::Utc::now().to_rfc3339());
        diagnostics
    }

    fn check_open(&self) -> Result<()> {
        if self.committed {
            Err(PilumError::invalid_operation(format!(
                "segment {} is already committed",
                self.segment_name
            )))
        } else {
            Ok(())
        }
    }

    fn check_column_len(&self, field: &str, len: usize) -> Result<()> {
        self.check_open()?;
        if len != self.max_doc as usize {
            return Err(PilumError::invalid_argument(format!(
                "field {field:?} has {len} values, expected one per document ({})",
                self.max_doc
            )));
        }
        Ok(())
    }

    fn field_mut(&mut self, name: &str) -> &mut PendingField {
        let index = match self.field_numbers.get(name) {
            Some(&index) => index,
            None => {
                self.fields.push(PendingField {
                    name: name.to_string(),
                    doc_values: None,
                    postings: None,
                });
                self.field_numbers.insert(name.to_string(), self.fields.len() - 1);
                self.fields.len() - 1
            }
        };
        &mut self.fields[index]
    }

    fn set_doc_values(&mut self, name: &str, values: BufferedDocValues) -> Result<()> {
        let field = self.field_mut(name);
        if let Some(existing) = &field.doc_values {
            return Err(PilumError::invalid_argument(format!(
                "field {name:?} already has {} doc values",
                existing.doc_values_type()
            )));
        }
        field.doc_values = Some(values);
        Ok(())
    }

    fn postings_mut(&mut self, name: &str) -> &mut BTreeMap<Vec<u8>, PostingList> {
        self.field_mut(name).postings.get_or_insert_with(BTreeMap::new)
    }
}

fn field_info<'a>(state: &'a SegmentWriteState, name: &str) -> Result<&'a FieldInfo> {
    state
        .field_infos
        .field_by_name(name)
        .map(|info| info.as_ref())
        .ok_or_else(|| PilumError::other(format!("field {name:?} missing from field infos")))
}
