use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ahash::AHashMap;

use crate::codec::doc_values::{
    BinaryDocValues, DocValuesConsumer, DocValuesFormat, DocValuesProducer, NumericDocValues,
    SortedDocValues,
};
use crate::codec::per_field::{
    DocValuesFormatPolicy, PER_FIELD_DOC_VALUES_FORMAT_KEY, PER_FIELD_DOC_VALUES_SUFFIX_KEY,
    SuffixAssigner, instance_key, record_format, recorded_format, suffix_name,
};
use crate::codec::registry::FormatRegistry;
use crate::error::{PilumError, Result};
use crate::index::field_info::FieldInfo;
use crate::index::state::{SegmentReadState, SegmentWriteState};

/// Name of the per-field doc-values dispatcher.
pub const PER_FIELD_DOC_VALUES_FORMAT_NAME: &str = "PerFieldDocValues";

/// Routes every field to the doc-values format chosen by a policy.
#[derive(Debug, Clone)]
pub struct PerFieldDocValuesFormat {
    policy: Arc<dyn DocValuesFormatPolicy>,
}

impl PerFieldDocValuesFormat {
    pub fn new(policy: Arc<dyn DocValuesFormatPolicy>) -> Self {
        PerFieldDocValuesFormat { policy }
    }

    pub fn policy(&self) -> &Arc<dyn DocValuesFormatPolicy> {
        &self.policy
    }
}

impl DocValuesFormat for PerFieldDocValuesFormat {
    fn name(&self) -> &str {
        PER_FIELD_DOC_VALUES_FORMAT_NAME
    }

    fn fields_consumer(&self, state: &SegmentWriteState) -> Result<Box<dyn DocValuesConsumer>> {
        Ok(Box::new(PerFieldDocValuesConsumer::new(
            state.clone(),
            Arc::clone(&self.policy),
        )))
    }

    fn fields_producer(&self, state: &SegmentReadState) -> Result<Box<dyn DocValuesProducer>> {
        Ok(Box::new(PerFieldDocValuesProducer::open(state)?))
    }
}

#[derive(Debug)]
struct Group {
    // Held so the instance, and with it its identity, outlives the write.
    format: Arc<dyn DocValuesFormat>,
    number: u32,
    suffix: String,
    consumer: Box<dyn DocValuesConsumer>,
}

/// Writes each field through the consumer of its format instance.
///
/// Consumers are opened lazily, on the first field of their group.
#[derive(Debug)]
pub struct PerFieldDocValuesConsumer {
    state: SegmentWriteState,
    policy: Arc<dyn DocValuesFormatPolicy>,
    groups: Vec<Group>,
    by_instance: AHashMap<usize, usize>,
    suffixes: SuffixAssigner,
    finished: bool,
}

impl PerFieldDocValuesConsumer {
    pub fn new(state: SegmentWriteState, policy: Arc<dyn DocValuesFormatPolicy>) -> Self {
        PerFieldDocValuesConsumer {
            state,
            policy,
            groups: Vec::new(),
            by_instance: AHashMap::new(),
            suffixes: SuffixAssigner::default(),
            finished: false,
        }
    }

    /// Suffixes of the groups opened so far.
    pub fn suffixes(&self) -> Vec<String> {
        self.groups.iter().map(|g| g.suffix.clone()).collect()
    }

    fn group_for(&mut self, field: &FieldInfo) -> Result<usize> {
        if self.finished {
            return Err(PilumError::invalid_operation(
                "per-field doc values consumer is closed",
            ));
        }
        let format = self.policy.format_for_field(&field.name);
        let key = instance_key(&format);
        let index = match self.by_instance.get(&key) {
            Some(&index) => index,
            None => {
                let number = self.suffixes.next_suffix(format.name());
                let suffix = suffix_name(format.name(), number);
                let consumer = format.fields_consumer(&self.state.with_suffix(&suffix))?;
                log::debug!(
                    "Segment {}: doc values group {suffix}",
                    self.state.segment_name
                );
                self.groups.push(Group {
                    format,
                    number,
                    suffix,
                    consumer,
                });
                self.by_instance.insert(key, self.groups.len() - 1);
                self.groups.len() - 1
            }
        };

        let group = &self.groups[index];
        record_format(
            field,
            PER_FIELD_DOC_VALUES_FORMAT_KEY,
            PER_FIELD_DOC_VALUES_SUFFIX_KEY,
            group.format.name(),
            group.number,
        )?;
        Ok(index)
    }

    fn with_group<F>(&mut self, field: &FieldInfo, write: F) -> Result<()>
    where
        F: FnOnce(&mut dyn DocValuesConsumer) -> Result<()>,
    {
        let written = self
            .group_for(field)
            .and_then(|index| write(self.groups[index].consumer.as_mut()));
        if written.is_err() {
            self.abort();
        }
        written
    }
}

impl DocValuesConsumer for PerFieldDocValuesConsumer {
    fn add_numeric_field(&mut self, field: &FieldInfo, values: &[i64]) -> Result<()> {
        self.with_group(field, |consumer| consumer.add_numeric_field(field, values))
    }

    fn add_binary_field(&mut self, field: &FieldInfo, values: &[Vec<u8>]) -> Result<()> {
        self.with_group(field, |consumer| consumer.add_binary_field(field, values))
    }

    fn add_sorted_field(
        &mut self,
        field: &FieldInfo,
        dictionary: &[Vec<u8>],
        ords: &[i64],
    ) -> Result<()> {
        self.with_group(field, |consumer| {
            consumer.add_sorted_field(field, dictionary, ords)
        })
    }

    fn close(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let mut first_error = None;
        for group in &mut self.groups {
            if let Err(e) = group.consumer.close() {
                log::warn!("Failed to close doc values group {}: {e}", group.suffix);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => {
                self.abort();
                Err(e)
            }
            None => Ok(()),
        }
    }

    fn abort(&mut self) {
        self.finished = true;
        for group in &mut self.groups {
            group.consumer.abort();
        }
    }
}

/// Reads each field through the producer of the format that wrote it.
///
/// Producers are opened once per `(format, suffix)` and shared by every
/// field of the group.
#[derive(Debug)]
pub struct PerFieldDocValuesProducer {
    producers: Vec<(String, Box<dyn DocValuesProducer>)>,
    fields: AHashMap<u32, usize>,
    closed: AtomicBool,
}

impl PerFieldDocValuesProducer {
    pub fn open(state: &SegmentReadState) -> Result<Self> {
        let mut producer = PerFieldDocValuesProducer {
            producers: Vec::new(),
            fields: AHashMap::new(),
            closed: AtomicBool::new(false),
        };
        let mut by_suffix: AHashMap<String, usize> = AHashMap::new();

        for field in state.field_infos.iter().filter(|f| f.has_doc_values()) {
            let opened = (|| -> Result<Option<usize>> {
                let Some((format_name, number)) = recorded_format(
                    field,
                    PER_FIELD_DOC_VALUES_FORMAT_KEY,
                    PER_FIELD_DOC_VALUES_SUFFIX_KEY,
                )?
                else {
                    return Ok(None);
                };
                let suffix = suffix_name(&format_name, number);
                if let Some(&index) = by_suffix.get(&suffix) {
                    return Ok(Some(index));
                }
                let format = FormatRegistry::global()
                    .read()
                    .doc_values_format(&format_name)
                    .ok_or_else(|| {
                        PilumError::corruption(format!(
                            "field {:?} uses unknown doc values format {format_name}",
                            field.name
                        ))
                    })?;
                let opened = format.fields_producer(&state.with_suffix(&suffix))?;
                producer.producers.push((suffix.clone(), opened));
                by_suffix.insert(suffix, producer.producers.len() - 1);
                Ok(Some(producer.producers.len() - 1))
            })();

            match opened {
                Ok(Some(index)) => {
                    producer.fields.insert(field.number, index);
                }
                Ok(None) => {}
                Err(e) => {
                    if let Err(close_error) = producer.close() {
                        log::warn!("Failed to close doc values after open error: {close_error}");
                    }
                    return Err(e);
                }
            }
        }

        log::debug!(
            "Opened per-field doc values of {}: {} producers",
            state.segment_name,
            producer.producers.len()
        );
        Ok(producer)
    }

    /// Suffixes of the opened producers.
    pub fn suffixes(&self) -> Vec<String> {
        self.producers.iter().map(|(s, _)| s.clone()).collect()
    }

    fn producer(&self, field: &FieldInfo) -> Result<&dyn DocValuesProducer> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PilumError::invalid_operation("doc values are closed"));
        }
        self.fields
            .get(&field.number)
            .map(|&index| self.producers[index].1.as_ref())
            .ok_or_else(|| {
                PilumError::consistency(format!("field {:?} has no doc values", field.name))
            })
    }
}

impl DocValuesProducer for PerFieldDocValuesProducer {
    fn numeric(&self, field: &FieldInfo) -> Result<Arc<dyn NumericDocValues>> {
        self.producer(field)?.numeric(field)
    }

    fn binary(&self, field: &FieldInfo) -> Result<Box<dyn BinaryDocValues>> {
        self.producer(field)?.binary(field)
    }

    fn sorted(&self, field: &FieldInfo) -> Result<Box<dyn SortedDocValues>> {
        self.producer(field)?.sorted(field)
    }

    fn check_integrity(&self) -> Result<()> {
        for (_, producer) in &self.producers {
            producer.check_integrity()?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut first_error = None;
        for (suffix, producer) in &self.producers {
            if let Err(e) = producer.close() {
                log::warn!("Failed to close doc values {suffix}: {e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::doc_values::{ColumnarDocValuesConfig, ColumnarDocValuesConsumer, ColumnarDocValuesFormat};
    use crate::codec::per_field::PerFieldFormats;
    use crate::index::field_info::{DocValuesType, FieldInfos};
    use crate::storage::Storage;
    use crate::storage::memory::MemoryStorage;

    const ID: [u8; 16] = [8; 16];

    /// Writes through the columnar format, then fails on close.
    #[derive(Debug)]
    struct FailingFormat;

    #[derive(Debug)]
    struct FailingConsumer(ColumnarDocValuesConsumer);

    impl DocValuesFormat for FailingFormat {
        fn name(&self) -> &str {
            "Failing10"
        }

        fn fields_consumer(&self, state: &SegmentWriteState) -> Result<Box<dyn DocValuesConsumer>> {
            Ok(Box::new(FailingConsumer(ColumnarDocValuesConsumer::new(
                state,
                ColumnarDocValuesConfig::default(),
            )?)))
        }

        fn fields_producer(&self, _state: &SegmentReadState) -> Result<Box<dyn DocValuesProducer>> {
            Err(PilumError::other("not readable"))
        }
    }

    impl DocValuesConsumer for FailingConsumer {
        fn add_numeric_field(&mut self, field: &FieldInfo, values: &[i64]) -> Result<()> {
            self.0.add_numeric_field(field, values)
        }

        fn add_binary_field(&mut self, field: &FieldInfo, values: &[Vec<u8>]) -> Result<()> {
            self.0.add_binary_field(field, values)
        }

        fn add_sorted_field(&mut self, field: &FieldInfo, dictionary: &[Vec<u8>], ords: &[i64]) -> Result<()> {
            self.0.add_sorted_field(field, dictionary, ords)
        }

        fn close(&mut self) -> Result<()> {
            self.0.close()?;
            Err(PilumError::storage("disk full"))
        }

        fn abort(&mut self) {
            self.0.abort();
        }
    }

    fn infos() -> Arc<FieldInfos> {
        Arc::new(
            FieldInfos::new(vec![
                FieldInfo::new("a", 0, DocValuesType::Numeric, false),
                FieldInfo::new("b", 1, DocValuesType::Numeric, false),
                FieldInfo::new("c", 2, DocValuesType::Binary, false),
            ])
            .unwrap(),
        )
    }

    fn write_state(storage: &Arc<dyn Storage>, infos: &Arc<FieldInfos>) -> SegmentWriteState {
        SegmentWriteState {
            storage: Arc::clone(storage),
            segment_name: "_0".to_string(),
            segment_id: ID,
            max_doc: 4,
            field_infos: Arc::clone(infos),
            segment_suffix: String::new(),
        }
    }

    fn read_state(storage: &Arc<dyn Storage>, infos: &Arc<FieldInfos>) -> SegmentReadState {
        SegmentReadState {
            storage: Arc::clone(storage),
            segment_name: "_0".to_string(),
            segment_id: ID,
            max_doc: 4,
            field_infos: Arc::clone(infos),
            segment_suffix: String::new(),
        }
    }

    #[test]
    fn test_fields_grouped_by_instance() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let infos = infos();

        let shared: Arc<dyn DocValuesFormat> = Arc::new(ColumnarDocValuesFormat::default());
        let mut formats = PerFieldFormats::new(Arc::new(ColumnarDocValuesFormat::default()) as Arc<dyn DocValuesFormat>);
        formats.add_format("a", Arc::clone(&shared));
        formats.add_format("b", Arc::clone(&shared));

        let mut consumer = PerFieldDocValuesConsumer::new(write_state(&storage, &infos), Arc::new(formats));
        consumer.add_numeric_field(infos.field_by_number(0).unwrap(), &[1, 2, 3, 4]).unwrap();
        consumer
            .add_binary_field(infos.field_by_number(2).unwrap(), &[b"w".to_vec(), b"x".to_vec(), b"yy".to_vec(), Vec::new()])
            .unwrap();
        consumer.add_numeric_field(infos.field_by_number(1).unwrap(), &[-5, 0, 5, 10]).unwrap();
        assert_eq!(consumer.suffixes(), vec!["Columnar10_0", "Columnar10_1"]);
        consumer.close().unwrap();

        assert_eq!(
            storage.list_files().unwrap(),
            vec!["_0_Columnar10_0.dvd", "_0_Columnar10_0.dvm", "_0_Columnar10_1.dvd", "_0_Columnar10_1.dvm"]
        );
        let a = infos.field_by_name("a").unwrap();
        let b = infos.field_by_name("b").unwrap();
        let c = infos.field_by_name("c").unwrap();
        assert_eq!(a.attribute(PER_FIELD_DOC_VALUES_SUFFIX_KEY).as_deref(), Some("0"));
        assert_eq!(b.attribute(PER_FIELD_DOC_VALUES_SUFFIX_KEY).as_deref(), Some("0"));
        assert_eq!(c.attribute(PER_FIELD_DOC_VALUES_SUFFIX_KEY).as_deref(), Some("1"));
        assert_eq!(c.attribute(PER_FIELD_DOC_VALUES_FORMAT_KEY).as_deref(), Some("Columnar10"));

        let producer = PerFieldDocValuesProducer::open(&read_state(&storage, &infos)).unwrap();
        assert_eq!(producer.suffixes().len(), 2);
        assert_eq!(producer.numeric(a).unwrap().get(3).unwrap(), 4);
        assert_eq!(producer.numeric(b).unwrap().get(0).unwrap(), -5);
        assert_eq!(producer.binary(c).unwrap().get(2).unwrap(), b"yy".to_vec());
        producer.check_integrity().unwrap();
        producer.close().unwrap();
        producer.close().unwrap();
    }

    #[test]
    fn test_failed_close_rolls_back_every_group() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let infos = infos();

        let mut formats = PerFieldFormats::new(Arc::new(ColumnarDocValuesFormat::default()) as Arc<dyn DocValuesFormat>);
        formats.add_format("b", Arc::new(FailingFormat) as Arc<dyn DocValuesFormat>);

        let mut consumer = PerFieldDocValuesConsumer::new(write_state(&storage, &infos), Arc::new(formats));
        consumer.add_numeric_field(infos.field_by_number(0).unwrap(), &[1, 2, 3, 4]).unwrap();
        consumer.add_numeric_field(infos.field_by_number(1).unwrap(), &[1, 1, 1, 1]).unwrap();
        assert_eq!(storage.list_files().unwrap().len(), 4);

        assert!(consumer.close().is_err());
        assert!(storage.list_files().unwrap().is_empty());
    }

    #[test]
    fn test_failed_add_rolls_back() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let infos = infos();
        let formats = PerFieldFormats::new(Arc::new(ColumnarDocValuesFormat::default()) as Arc<dyn DocValuesFormat>);

        let mut consumer = PerFieldDocValuesConsumer::new(write_state(&storage, &infos), Arc::new(formats));
        consumer.add_numeric_field(infos.field_by_number(0).unwrap(), &[1, 2, 3, 4]).unwrap();
        assert!(consumer.add_numeric_field(infos.field_by_number(1).unwrap(), &[1]).is_err());
        assert!(storage.list_files().unwrap().is_empty());
        assert!(consumer.add_numeric_field(infos.field_by_number(1).unwrap(), &[1, 2, 3, 4]).is_err());
    }

    #[test]
    fn test_fields_without_format_and_unknown_formats() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let plain = infos();
        let producer = PerFieldDocValuesProducer::open(&read_state(&storage, &plain)).unwrap();
        let err = producer.numeric(plain.field_by_name("a").unwrap()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Consistency);

        let mut attributes = std::collections::BTreeMap::new();
        attributes.insert(PER_FIELD_DOC_VALUES_FORMAT_KEY.to_string(), "Missing99".to_string());
        attributes.insert(PER_FIELD_DOC_VALUES_SUFFIX_KEY.to_string(), "0".to_string());
        let unknown = Arc::new(
            FieldInfos::new(vec![FieldInfo::with_attributes("a", 0, DocValuesType::Numeric, false, attributes)])
                .unwrap(),
        );
        let err = PerFieldDocValuesProducer::open(&read_state(&storage, &unknown)).unwrap_err();
        assert!(err.is_corruption());
    }
}
