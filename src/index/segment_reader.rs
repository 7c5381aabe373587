//! Read access to a committed segment.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::codec::Codec;
use crate::codec::codec_util;
use crate::codec::compound::CompoundReader;
use crate::codec::doc_values::{
    BinaryDocValues, DocValuesFormat, DocValuesProducer, NumericDocValues, SortedDocValues,
};
use crate::codec::postings::{FieldsProducer, PostingsFormat, Terms};
use crate::codec::registry::FormatRegistry;
use crate::codec::segment_info::SegmentInfoFormat;
use crate::error::{PilumError, Result};
use crate::index::field_info::{FieldInfo, FieldInfos};
use crate::index::segment_info::SegmentInfo;
use crate::index::state::SegmentReadState;
use crate::storage::Storage;

/// An open segment.
///
/// Every accessor takes `&self`, so one reader can be shared between threads.
#[derive(Debug)]
pub struct SegmentReader {
    storage: Arc<dyn Storage>,
    info: SegmentInfo,
    codec: Arc<Codec>,
    field_infos: Arc<FieldInfos>,
    compound: Option<Arc<CompoundReader>>,
    postings: Option<Box<dyn FieldsProducer>>,
    doc_values: Option<Box<dyn DocValuesProducer>>,
    closed: AtomicBool,
}

impl SegmentReader {
    /// Open segment `segment_name` in `storage`.
    pub fn open(storage: Arc<dyn Storage>, segment_name: &str) -> Result<Self> {
        let info = SegmentInfoFormat::new().read(storage.as_ref(), segment_name)?;
        let codec = FormatRegistry::global()
            .read()
            .codec(&info.codec_name)
            .ok_or_else(|| {
                PilumError::corruption(format!(
                    "segment {segment_name} was written with unknown codec {:?}",
                    info.codec_name
                ))
            })?;

        let compound = if info.is_compound_file {
            Some(Arc::new(codec.compound_format().open_reader(
                Arc::clone(&storage),
                segment_name,
                &info.id,
            )?))
        } else {
            None
        };
        let segment_storage: Arc<dyn Storage> = match &compound {
            Some(reader) => Arc::clone(reader) as Arc<dyn Storage>,
            None => Arc::clone(&storage),
        };

        let mut reader = SegmentReader {
            storage,
            info,
            codec,
            field_infos: Arc::new(FieldInfos::default()),
            compound,
            postings: None,
            doc_values: None,
            closed: AtomicBool::new(false),
        };
        if let Err(e) = reader.open_producers(segment_storage) {
            if let Err(close_error) = reader.close() {
                log::warn!("Failed to close segment {segment_name} after open error: {close_error}");
            }
            return Err(e);
        }

        log::debug!(
            "Opened segment {segment_name}: {} docs, {} fields, compound={}",
            reader.info.max_doc,
            reader.field_infos.len(),
            reader.info.is_compound_file
        );
        Ok(reader)
    }

    fn open_producers(&mut self, segment_storage: Arc<dyn Storage>) -> Result<()> {
        let field_infos = Arc::new(self.codec.field_infos_format().read(
            segment_storage.as_ref(),
            &self.info.name,
            &self.info.id,
            "",
        )?);
        self.field_infos = Arc::clone(&field_infos);

        let state = SegmentReadState {
            storage: segment_storage,
            segment_name: self.info.name.clone(),
            segment_id: self.info.id,
            max_doc: self.info.max_doc,
            field_infos,
            segment_suffix: String::new(),
        };
        if self.field_infos.has_postings() {
            self.postings = Some(self.codec.postings_format().fields_producer(&state)?);
        }
        if self.field_infos.has_doc_values() {
            self.doc_values = Some(self.codec.doc_values_format().fields_producer(&state)?);
        }
        Ok(())
    }

    /// The segment descriptor.
    pub fn info(&self) -> &SegmentInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn max_doc(&self) -> u32 {
        self.info.max_doc
    }

    pub fn codec(&self) -> &Arc<Codec> {
        &self.codec
    }

    pub fn field_infos(&self) -> &Arc<FieldInfos> {
        &self.field_infos
    }

    /// Numeric doc values of `field`.
    pub fn numeric(&self, field: &str) -> Result<Arc<dyn NumericDocValues>> {
        let (producer, info) = self.doc_values_of(field)?;
        producer.numeric(info)
    }

    /// Binary doc values of `field`.
    pub fn binary(&self, field: &str) -> Result<Box<dyn BinaryDocValues>> {
        let (producer, info) = self.doc_values_of(field)?;
        producer.binary(info)
    }

    /// Sorted doc values of `field`.
    pub fn sorted(&self, field: &str) -> Result<Box<dyn SortedDocValues>> {
        let (producer, info) = self.doc_values_of(field)?;
        producer.sorted(info)
    }

    /// Terms of `field`, or `None` if the field has no postings.
    pub fn terms(&self, field: &str) -> Result<Option<Arc<dyn Terms>>> {
        self.check_open()?;
        let Some(info) = self.field_infos.field_by_name(field) else {
            return Ok(None);
        };
        match &self.postings {
            Some(postings) if info.has_postings => postings.terms(info),
            _ => Ok(None),
        }
    }

    /// Verify the checksum of every file of the segment.
    pub fn check_integrity(&self) -> Result<()> {
        self.check_open()?;
        for file in &self.info.files {
            let input = self.storage.open_input(file)?;
            codec_util::checksum_entire_file(input.as_ref())
                .map_err(|e| PilumError::corruption(format!("{file}: {e}")))?;
        }
        if let Some(compound) = &self.compound {
            compound.check_integrity()?;
        }
        if let Some(postings) = &self.postings {
            postings.check_integrity()?;
        }
        if let Some(doc_values) = &self.doc_values {
            doc_values.check_integrity()?;
        }
        log::debug!("Segment {} passed integrity check", self.info.name);
        Ok(())
    }

    /// Release every producer. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut first_error = None;
        if let Some(postings) = &self.postings {
            if let Err(e) = postings.close() {
                log::warn!("Failed to close postings of {}: {e}", self.info.name);
                first_error.get_or_insert(e);
            }
        }
        if let Some(doc_values) = &self.doc_values {
            if let Err(e) = doc_values.close() {
                log::warn!("Failed to close doc values of {}: {e}", self.info.name);
                first_error.get_or_insert(e);
            }
        }
        if let Some(compound) = &self.compound {
            if let Err(e) = compound.close() {
                log::warn!("Failed to close compound file of {}: {e}", self.info.name);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(PilumError::invalid_operation(format!(
                "segment {} is closed",
                self.info.name
            )))
        } else {
            Ok(())
        }
    }

    fn doc_values_of(&self, field: &str) -> Result<(&dyn DocValuesProducer, &FieldInfo)> {
        self.check_open()?;
        let info = self.field_infos.field_by_name(field).ok_or_else(|| {
            PilumError::invalid_argument(format!(
                "segment {} has no field {field:?}",
                self.info.name
            ))
        })?;
        match &self.doc_values {
            Some(producer) if info.has_doc_values() => Ok((producer.as_ref(), info.as_ref())),
            _ => Err(PilumError::consistency(format!(
                "field {field:?} has no doc values"
            ))),
        }
    }
}
