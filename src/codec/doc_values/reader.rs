use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::codec::bitpack::PackedColumn;
use crate::codec::codec_util::{self, FOOTER_LENGTH};
use crate::codec::doc_values::binary::{self, BinaryEntry, BinaryMode, BinaryValues};
use crate::codec::doc_values::numeric::{LoadedNumeric, NumericEntry};
use crate::codec::doc_values::sorted::{SortedEntry, SortedValues};
use crate::codec::doc_values::{
    BinaryDocValues, DATA_CODEC, DATA_EXTENSION, DocValuesProducer, ENTRY_BINARY, ENTRY_NUMERIC,
    ENTRY_SORTED, META_CODEC, META_EXTENSION, NumericDocValues, SortedDocValues, VERSION_CURRENT,
    VERSION_START,
};
use crate::error::{PilumError, Result};
use crate::index::field_info::{DocValuesType, FieldInfo, FieldInfos};
use crate::index::file_names::segment_file_name;
use crate::index::state::SegmentReadState;
use crate::storage::structured::StructReader;
use crate::storage::{Storage, StorageInput};

#[derive(Debug, Clone, Copy)]
enum DocValuesEntry {
    Numeric(NumericEntry),
    Binary(BinaryEntry),
    Sorted(SortedEntry),
}

impl DocValuesEntry {
    fn doc_values_type(&self) -> DocValuesType {
        match self {
            DocValuesEntry::Numeric(_) => DocValuesType::Numeric,
            DocValuesEntry::Binary(_) => DocValuesType::Binary,
            DocValuesEntry::Sorted(_) => DocValuesType::Sorted,
        }
    }

    fn doc_count(&self) -> u32 {
        match self {
            DocValuesEntry::Numeric(entry) => entry.count,
            DocValuesEntry::Binary(entry) => entry.count,
            DocValuesEntry::Sorted(entry) => entry.ords.count,
        }
    }
}

/// Reads the columnar doc values of one segment.
///
/// Numeric columns and address tables are decoded on first use and shared by
/// every later accessor. Each binary or sorted accessor owns a clone of the
/// data input, so accessors can be used from different threads.
#[derive(Debug)]
pub struct ColumnarDocValuesProducer {
    storage: Arc<dyn Storage>,
    data_name: String,
    meta_name: String,
    data: Mutex<Box<dyn StorageInput>>,
    data_end: u64,
    entries: AHashMap<u32, DocValuesEntry>,
    numerics: Mutex<AHashMap<u32, Arc<LoadedNumeric>>>,
    addresses: Mutex<AHashMap<u32, Arc<PackedColumn>>>,
    closed: AtomicBool,
}

impl ColumnarDocValuesProducer {
    /// Open the files written for `state`, verifying headers, entries and both
    /// checksums.
    pub fn open(state: &SegmentReadState) -> Result<Self> {
        let suffix = state.segment_suffix.as_str();
        let data_name = segment_file_name(&state.segment_name, suffix, DATA_EXTENSION);
        let meta_name = segment_file_name(&state.segment_name, suffix, META_EXTENSION);

        let entries = {
            let mut meta = StructReader::new(state.storage.open_input(&meta_name)?)?;
            codec_util::check_index_header(
                &mut meta,
                META_CODEC,
                VERSION_START,
                VERSION_CURRENT,
                &state.segment_id,
                suffix,
            )?;
            let entries = read_entries(&mut meta, &state.field_infos, state.max_doc)?;
            codec_util::check_footer(&mut meta)?;
            meta.close()?;
            entries
        };

        let data = state.storage.open_input(&data_name)?;
        let data_start = {
            let mut header = StructReader::new(data.clone_input()?)?;
            codec_util::check_index_header(
                &mut header,
                DATA_CODEC,
                VERSION_START,
                VERSION_CURRENT,
                &state.segment_id,
                suffix,
            )?;
            header.position()
        };
        codec_util::checksum_entire_file(data.as_ref())?;
        let data_end = data.size()? - FOOTER_LENGTH;

        for (number, entry) in &entries {
            check_entry_bounds(*number, entry, data_start, data_end)?;
        }

        log::debug!(
            "Opened doc values {} with {} fields",
            data_name,
            entries.len()
        );

        Ok(ColumnarDocValuesProducer {
            storage: Arc::clone(&state.storage),
            data_name,
            meta_name,
            data: Mutex::new(data),
            data_end,
            entries,
            numerics: Mutex::new(AHashMap::new()),
            addresses: Mutex::new(AHashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(PilumError::invalid_operation(format!(
                "doc values {} are closed",
                self.data_name
            )))
        } else {
            Ok(())
        }
    }

    fn entry(&self, field: &FieldInfo, expected: DocValuesType) -> Result<DocValuesEntry> {
        self.ensure_open()?;
        let entry = self.entries.get(&field.number).ok_or_else(|| {
            PilumError::consistency(format!("field {:?} has no doc values", field.name))
        })?;
        if entry.doc_values_type() != expected {
            return Err(PilumError::consistency(format!(
                "field {:?} has {} doc values, not {expected}",
                field.name,
                entry.doc_values_type()
            )));
        }
        Ok(*entry)
    }

    fn clone_data(&self) -> Result<Box<dyn StorageInput>> {
        self.data.lock().clone_input()
    }

    /// Decode a numeric column once; concurrent callers wait for the first
    /// load and share its result.
    fn load_numeric(&self, number: u32, entry: &NumericEntry) -> Result<Arc<LoadedNumeric>> {
        let mut cache = self.numerics.lock();
        if let Some(loaded) = cache.get(&number) {
            return Ok(Arc::clone(loaded));
        }
        let mut reader = StructReader::new(self.clone_data()?)?;
        let loaded = Arc::new(LoadedNumeric::load(&mut reader, entry)?);
        log::trace!(
            "loaded numeric column of field {number}: {:?}, {} values",
            loaded.mode(),
            loaded.count()
        );
        cache.insert(number, Arc::clone(&loaded));
        Ok(loaded)
    }

    fn load_addresses(&self, number: u32, entry: &BinaryEntry) -> Result<Option<Arc<PackedColumn>>> {
        if entry.mode == BinaryMode::Fixed {
            return Ok(None);
        }
        let mut cache = self.addresses.lock();
        if let Some(addresses) = cache.get(&number) {
            return Ok(Some(Arc::clone(addresses)));
        }
        let mut reader = StructReader::new(self.clone_data()?)?;
        let addresses = Arc::new(binary::load_addresses(&mut reader, entry, self.data_end)?);
        cache.insert(number, Arc::clone(&addresses));
        Ok(Some(addresses))
    }

    fn binary_values(&self, number: u32, entry: &BinaryEntry) -> Result<BinaryValues> {
        let addresses = self.load_addresses(number, entry)?;
        BinaryValues::new(self.clone_data()?, *entry, addresses)
    }
}

fn read_entries(
    meta: &mut StructReader<Box<dyn StorageInput>>,
    field_infos: &FieldInfos,
    max_doc: u32,
) -> Result<AHashMap<u32, DocValuesEntry>> {
    let mut entries = AHashMap::new();
    loop {
        let code = meta.read_varint()?;
        if code == 0 {
            break;
        }
        let number = u32::try_from(code - 1)
            .map_err(|_| PilumError::corruption(format!("invalid field number {}", code - 1)))?;
        let field = field_infos.field_by_number(number).ok_or_else(|| {
            PilumError::corruption(format!("doc values entry for unknown field {number}"))
        })?;

        let entry = match meta.read_u8()? {
            ENTRY_NUMERIC => DocValuesEntry::Numeric(NumericEntry::read_from(meta)?),
            ENTRY_BINARY => DocValuesEntry::Binary(BinaryEntry::read_from(meta)?),
            ENTRY_SORTED => {
                let dictionary = BinaryEntry::read_from(meta)?;
                let ords = NumericEntry::read_from(meta)?;
                DocValuesEntry::Sorted(SortedEntry { dictionary, ords })
            }
            other => {
                return Err(PilumError::corruption(format!(
                    "unknown doc values entry type {other} for field {:?}",
                    field.name
                )));
            }
        };

        if entry.doc_values_type() != field.doc_values_type {
            return Err(PilumError::corruption(format!(
                "field {:?} is declared {} but stored as {}",
                field.name,
                field.doc_values_type,
                entry.doc_values_type()
            )));
        }
        if entry.doc_count() != max_doc {
            return Err(PilumError::corruption(format!(
                "field {:?} stores {} values for {max_doc} documents",
                field.name,
                entry.doc_count()
            )));
        }
        if entries.insert(number, entry).is_some() {
            return Err(PilumError::corruption(format!(
                "duplicate doc values entry for field {:?}",
                field.name
            )));
        }
    }
    Ok(entries)
}

fn check_numeric_bounds(entry: &NumericEntry, start: u64, end: u64) -> Result<()> {
    match entry.end() {
        Some(entry_end) if entry.offset >= start && entry_end <= end => Ok(()),
        _ => Err(PilumError::corruption(format!(
            "numeric entry at {} ({} bytes) lies outside the data region [{start}, {end})",
            entry.offset, entry.length
        ))),
    }
}

fn check_entry_bounds(number: u32, entry: &DocValuesEntry, start: u64, end: u64) -> Result<()> {
    let checked = match entry {
        DocValuesEntry::Numeric(numeric) => check_numeric_bounds(numeric, start, end),
        DocValuesEntry::Binary(binary) => binary.check_bounds(start, end),
        DocValuesEntry::Sorted(sorted) => sorted
            .dictionary
            .check_bounds(start, end)
            .and_then(|_| check_numeric_bounds(&sorted.ords, start, end)),
    };
    checked.map_err(|e| PilumError::corruption(format!("field {number}: {e}")))
}

impl DocValuesProducer for ColumnarDocValuesProducer {
    fn numeric(&self, field: &FieldInfo) -> Result<Arc<dyn NumericDocValues>> {
        let DocValuesEntry::Numeric(entry) = self.entry(field, DocValuesType::Numeric)? else {
            return Err(PilumError::consistency("entry type mismatch"));
        };
        let loaded: Arc<dyn NumericDocValues> = self.load_numeric(field.number, &entry)?;
        Ok(loaded)
    }

    fn binary(&self, field: &FieldInfo) -> Result<Box<dyn BinaryDocValues>> {
        let DocValuesEntry::Binary(entry) = self.entry(field, DocValuesType::Binary)? else {
            return Err(PilumError::consistency("entry type mismatch"));
        };
        Ok(Box::new(self.binary_values(field.number, &entry)?))
    }

    fn sorted(&self, field: &FieldInfo) -> Result<Box<dyn SortedDocValues>> {
        let DocValuesEntry::Sorted(entry) = self.entry(field, DocValuesType::Sorted)? else {
            return Err(PilumError::consistency("entry type mismatch"));
        };
        let ords = self.load_numeric(field.number, &entry.ords)?;
        let terms = self.binary_values(field.number, &entry.dictionary)?;
        Ok(Box::new(SortedValues::new(terms, ords)))
    }

    fn check_integrity(&self) -> Result<()> {
        self.ensure_open()?;
        let data = self.clone_data()?;
        codec_util::checksum_entire_file(data.as_ref())?;
        let meta = self.storage.open_input(&self.meta_name)?;
        codec_util::checksum_entire_file(meta.as_ref())?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.numerics.lock().clear();
            self.addresses.lock().clear();
            self.data.lock().close()?;
            log::debug!("Closed doc values {}", self.data_name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::doc_values::{ColumnarDocValuesConfig, ColumnarDocValuesConsumer, DocValuesConsumer};
    use crate::codec::doc_values::numeric::NumericMode;
    use crate::index::field_info::FieldInfo;
    use crate::index::state::SegmentWriteState;
    use crate::storage::memory::MemoryStorage;
    use std::thread;

    const ID: [u8; 16] = [3; 16];

    fn field_infos() -> Arc<FieldInfos> {
        Arc::new(
            FieldInfos::new(vec![
                FieldInfo::new("count", 0, DocValuesType::Numeric, false),
                FieldInfo::new("payload", 1, DocValuesType::Binary, false),
                FieldInfo::new("color", 2, DocValuesType::Sorted, false),
                FieldInfo::new("unused", 3, DocValuesType::Numeric, false),
            ])
            .unwrap(),
        )
    }

    fn write_state(storage: &Arc<dyn Storage>, infos: &Arc<FieldInfos>, max_doc: u32) -> SegmentWriteState {
        SegmentWriteState {
            storage: Arc::clone(storage),
            segment_name: "_0".to_string(),
            segment_id: ID,
            max_doc,
            field_infos: Arc::clone(infos),
            segment_suffix: "Columnar10_0".to_string(),
        }
    }

    fn read_state(storage: &Arc<dyn Storage>, infos: &Arc<FieldInfos>, max_doc: u32) -> SegmentReadState {
        SegmentReadState {
            storage: Arc::clone(storage),
            segment_name: "_0".to_string(),
            segment_id: ID,
            max_doc,
            field_infos: Arc::clone(infos),
            segment_suffix: "Columnar10_0".to_string(),
        }
    }

    fn write_segment(storage: &Arc<dyn Storage>, infos: &Arc<FieldInfos>) {
        let state = write_state(storage, infos, 100);
        let mut consumer =
            ColumnarDocValuesConsumer::new(&state, ColumnarDocValuesConfig::default()).unwrap();

        let counts: Vec<i64> = (0..100).map(|i| i * 3).collect();
        let payloads: Vec<Vec<u8>> = (0..100).map(|i| vec![b'x'; i % 5]).collect();
        let dictionary = vec![b"blue".to_vec(), b"green".to_vec(), b"red".to_vec()];
        let ords: Vec<i64> = (0..100).map(|i| (i % 4) - 1).collect();

        consumer
            .add_numeric_field(infos.field_by_number(0).unwrap(), &counts)
            .unwrap();
        consumer
            .add_binary_field(infos.field_by_number(1).unwrap(), &payloads)
            .unwrap();
        consumer
            .add_sorted_field(infos.field_by_number(2).unwrap(), &dictionary, &ords)
            .unwrap();
        consumer.close().unwrap();
    }

    #[test]
    fn test_write_and_read_all_types() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let infos = field_infos();
        write_segment(&storage, &infos);

        assert_eq!(
            storage.list_files().unwrap(),
            vec!["_0_Columnar10_0.dvd", "_0_Columnar10_0.dvm"]
        );

        let producer = ColumnarDocValuesProducer::open(&read_state(&storage, &infos, 100)).unwrap();
        let counts = producer.numeric(infos.field_by_name("count").unwrap()).unwrap();
        assert_eq!(counts.get(33).unwrap(), 99);
        assert_eq!(counts.len(), 100);

        let mut payloads = producer.binary(infos.field_by_name("payload").unwrap()).unwrap();
        assert_eq!(payloads.get(7).unwrap(), vec![b'x'; 2]);
        assert_eq!(payloads.get(5).unwrap(), Vec::<u8>::new());

        let mut colors = producer.sorted(infos.field_by_name("color").unwrap()).unwrap();
        assert_eq!(colors.get(0).unwrap(), None);
        assert_eq!(colors.get(3).unwrap(), Some(b"red".to_vec()));
        assert_eq!(colors.lookup_term(b"green").unwrap(), Ok(1));

        producer.check_integrity().unwrap();
        producer.close().unwrap();
        producer.close().unwrap();
        assert!(producer.numeric(infos.field_by_name("count").unwrap()).is_err());
    }

    #[test]
    fn test_numeric_columns_are_memoized() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let infos = field_infos();
        write_segment(&storage, &infos);

        let producer =
            Arc::new(ColumnarDocValuesProducer::open(&read_state(&storage, &infos, 100)).unwrap());
        let field = Arc::clone(infos.field_by_name("count").unwrap());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let producer = Arc::clone(&producer);
                let field = Arc::clone(&field);
                thread::spawn(move || producer.numeric(&field).unwrap())
            })
            .collect();
        let loaded: Vec<Arc<dyn NumericDocValues>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        for other in &loaded[1..] {
            assert!(Arc::ptr_eq(&loaded[0], other));
        }
        assert_eq!(loaded[0].get(99).unwrap(), 297);
    }

    #[test]
    fn test_wrong_type_and_missing_field() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let infos = field_infos();
        write_segment(&storage, &infos);

        let producer = ColumnarDocValuesProducer::open(&read_state(&storage, &infos, 100)).unwrap();
        let err = producer.binary(infos.field_by_name("count").unwrap()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Consistency);
        assert!(producer.numeric(infos.field_by_name("unused").unwrap()).is_err());
    }

    #[test]
    fn test_wrong_value_count_rejected() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let infos = field_infos();
        let state = write_state(&storage, &infos, 10);
        let mut consumer =
            ColumnarDocValuesConsumer::new(&state, ColumnarDocValuesConfig::default()).unwrap();

        let field = infos.field_by_number(0).unwrap();
        assert!(consumer.add_numeric_field(field, &[1, 2, 3]).is_err());
        assert!(
            consumer
                .add_binary_field(field, &vec![Vec::new(); 10])
                .is_err()
        );
        consumer.abort();
        assert!(storage.list_files().unwrap().is_empty());
    }

    #[test]
    fn test_table_mode_survives_reopen() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let infos = field_infos();
        let state = write_state(&storage, &infos, 1000);
        let mut consumer =
            ColumnarDocValuesConsumer::new(&state, ColumnarDocValuesConfig::default()).unwrap();
        let values: Vec<i64> = (0..1000).map(|i| [5, 1 << 40, -7][i % 3]).collect();
        consumer
            .add_numeric_field(infos.field_by_number(0).unwrap(), &values)
            .unwrap();
        consumer.close().unwrap();

        let producer = ColumnarDocValuesProducer::open(&read_state(&storage, &infos, 1000)).unwrap();
        let field = infos.field_by_number(0).unwrap();
        let column = producer.numeric(field).unwrap();
        for (doc, &v) in values.iter().enumerate() {
            assert_eq!(column.get(doc as u32).unwrap(), v);
        }
        let Some(DocValuesEntry::Numeric(entry)) = producer.entries.get(&0).copied() else {
            panic!("expected a numeric entry");
        };
        let loaded = producer.load_numeric(0, &entry).unwrap();
        assert_eq!(loaded.mode(), NumericMode::Table);
    }

    #[test]
    fn test_corrupt_data_detected_at_open() {
        let memory = Arc::new(MemoryStorage::new_default());
        let storage: Arc<dyn Storage> = memory.clone();
        let infos = field_infos();
        write_segment(&storage, &infos);

        let name = "_0_Columnar10_0.dvd";
        let mut bytes = crate::storage::read_all(storage.as_ref(), name).unwrap();
        let middle = bytes.len() / 2;
        bytes[middle] ^= 0xFF;
        memory.overwrite_file(name, bytes).unwrap();

        let err = ColumnarDocValuesProducer::open(&read_state(&storage, &infos, 100)).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_wrong_suffix_or_id_detected() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let infos = field_infos();
        write_segment(&storage, &infos);

        let mut state = read_state(&storage, &infos, 100);
        state.segment_id = [9; 16];
        assert!(ColumnarDocValuesProducer::open(&state).unwrap_err().is_corruption());

        let mut state = read_state(&storage, &infos, 100);
        state.max_doc = 99;
        assert!(ColumnarDocValuesProducer::open(&state).unwrap_err().is_corruption());
    }
}
