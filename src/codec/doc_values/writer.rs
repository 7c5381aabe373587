use std::sync::Arc;

use ahash::AHashSet;

use crate::codec::codec_util;
use crate::codec::doc_values::{
    ColumnarDocValuesConfig, DATA_CODEC, DATA_EXTENSION, DocValuesConsumer, ENTRY_BINARY,
    ENTRY_NUMERIC, ENTRY_SORTED, META_CODEC, META_EXTENSION, VERSION_CURRENT, binary, numeric,
    sorted,
};
use crate::error::{PilumError, Result};
use crate::index::field_info::{DocValuesType, FieldInfo};
use crate::index::file_names::segment_file_name;
use crate::index::state::SegmentWriteState;
use crate::storage::structured::StructWriter;
use crate::storage::{Storage, StorageOutput, delete_files_quietly};

type Output = StructWriter<Box<dyn StorageOutput>>;

/// Writes the `.dvd` and `.dvm` files of the columnar format.
#[derive(Debug)]
pub struct ColumnarDocValuesConsumer {
    storage: Arc<dyn Storage>,
    data_name: String,
    meta_name: String,
    data: Option<Output>,
    meta: Option<Output>,
    max_doc: u32,
    config: ColumnarDocValuesConfig,
    written: AHashSet<u32>,
}

impl ColumnarDocValuesConsumer {
    /// Create both files and write their headers.
    pub fn new(state: &SegmentWriteState, config: ColumnarDocValuesConfig) -> Result<Self> {
        let suffix = state.segment_suffix.as_str();
        let data_name = segment_file_name(&state.segment_name, suffix, DATA_EXTENSION);
        let meta_name = segment_file_name(&state.segment_name, suffix, META_EXTENSION);

        let mut consumer = ColumnarDocValuesConsumer {
            storage: Arc::clone(&state.storage),
            data_name,
            meta_name,
            data: None,
            meta: None,
            max_doc: state.max_doc,
            config,
            written: AHashSet::new(),
        };

        let opened = (|| -> Result<()> {
            let mut data = StructWriter::new(consumer.storage.create_output(&consumer.data_name)?);
            codec_util::write_index_header(
                &mut data,
                DATA_CODEC,
                VERSION_CURRENT,
                &state.segment_id,
                suffix,
            )?;
            consumer.data = Some(data);

            let mut meta = StructWriter::new(consumer.storage.create_output(&consumer.meta_name)?);
            codec_util::write_index_header(
                &mut meta,
                META_CODEC,
                VERSION_CURRENT,
                &state.segment_id,
                suffix,
            )?;
            consumer.meta = Some(meta);
            Ok(())
        })();

        match opened {
            Ok(()) => {
                log::debug!(
                    "Writing doc values {} / {}",
                    consumer.data_name,
                    consumer.meta_name
                );
                Ok(consumer)
            }
            Err(e) => {
                consumer.abort();
                Err(e)
            }
        }
    }

    fn outputs(&mut self) -> Result<(&mut Output, &mut Output)> {
        match (self.data.as_mut(), self.meta.as_mut()) {
            (Some(data), Some(meta)) => Ok((data, meta)),
            _ => Err(PilumError::invalid_operation(format!(
                "doc values consumer for {} is closed",
                self.data_name
            ))),
        }
    }

    fn start_field(
        &mut self,
        field: &FieldInfo,
        expected: DocValuesType,
        count: usize,
    ) -> Result<()> {
        if field.doc_values_type != expected {
            return Err(PilumError::consistency(format!(
                "field {:?} has doc values type {}, cannot write {expected}",
                field.name, field.doc_values_type
            )));
        }
        if count != self.max_doc as usize {
            return Err(PilumError::consistency(format!(
                "field {:?} has {count} values, segment has {} documents",
                field.name, self.max_doc
            )));
        }
        if !self.written.insert(field.number) {
            return Err(PilumError::consistency(format!(
                "doc values for field {:?} written twice",
                field.name
            )));
        }
        Ok(())
    }
}

impl DocValuesConsumer for ColumnarDocValuesConsumer {
    fn add_numeric_field(&mut self, field: &FieldInfo, values: &[i64]) -> Result<()> {
        self.start_field(field, DocValuesType::Numeric, values.len())?;
        let max_table_cardinality = self.config.max_table_cardinality;
        let (data, meta) = self.outputs()?;

        meta.write_varint(field.number as u64 + 1)?;
        meta.write_u8(ENTRY_NUMERIC)?;
        let entry = numeric::write_numeric(data, values, max_table_cardinality)?;
        entry.write_to(meta)?;

        log::debug!(
            "numeric field {:?}: {} docs, {:?}, {} bytes",
            field.name,
            entry.count,
            entry.mode,
            entry.length
        );
        Ok(())
    }

    fn add_binary_field(&mut self, field: &FieldInfo, values: &[Vec<u8>]) -> Result<()> {
        self.start_field(field, DocValuesType::Binary, values.len())?;
        let (data, meta) = self.outputs()?;

        meta.write_varint(field.number as u64 + 1)?;
        meta.write_u8(ENTRY_BINARY)?;
        let entry = binary::write_binary(data, values)?;
        entry.write_to(meta)?;

        log::debug!(
            "binary field {:?}: {} docs, {:?}, {} bytes",
            field.name,
            entry.count,
            entry.mode,
            entry.total_bytes
        );
        Ok(())
    }

    fn add_sorted_field(
        &mut self,
        field: &FieldInfo,
        dictionary: &[Vec<u8>],
        ords: &[i64],
    ) -> Result<()> {
        sorted::validate_sorted(dictionary, ords)?;
        self.start_field(field, DocValuesType::Sorted, ords.len())?;
        let max_table_cardinality = self.config.max_table_cardinality;
        let (data, meta) = self.outputs()?;

        meta.write_varint(field.number as u64 + 1)?;
        meta.write_u8(ENTRY_SORTED)?;
        let entry = sorted::write_sorted(data, dictionary, ords, max_table_cardinality)?;
        entry.dictionary.write_to(meta)?;
        entry.ords.write_to(meta)?;

        log::debug!(
            "sorted field {:?}: {} docs, {} distinct terms",
            field.name,
            entry.ords.count,
            entry.dictionary.count
        );
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let (Some(mut data), Some(mut meta)) = (self.data.take(), self.meta.take()) else {
            return Ok(());
        };

        meta.write_varint(0)?;
        codec_util::write_footer(&mut meta)?;
        codec_util::write_footer(&mut data)?;
        meta.close()?;
        data.close()?;

        log::debug!(
            "Closed doc values {}: {} fields",
            self.data_name,
            self.written.len()
        );
        Ok(())
    }

    fn abort(&mut self) {
        self.data = None;
        self.meta = None;
        delete_files_quietly(
            self.storage.as_ref(),
            [self.data_name.as_str(), self.meta_name.as_str()],
        );
    }
}
