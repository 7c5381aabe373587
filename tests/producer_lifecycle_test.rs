use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use pilum::codec::Codec;
use pilum::codec::doc_values::{
    BinaryDocValues, ColumnarDocValuesFormat, DocValuesConsumer, DocValuesFormat,
    DocValuesProducer, NumericDocValues, SortedDocValues,
};
use pilum::codec::per_field::PerFieldFormats;
use pilum::codec::registry::FormatRegistry;
use pilum::error::{PilumError, Result};
use pilum::index::state::{SegmentReadState, SegmentWriteState};
use pilum::index::{FieldInfo, SegmentReader, SegmentWriter, SegmentWriterConfig};
use pilum::storage::Storage;
use pilum::storage::memory::MemoryStorage;

static HEALTHY_CLOSES: AtomicUsize = AtomicUsize::new(0);
static PARTIAL_OPEN_CLOSES: AtomicUsize = AtomicUsize::new(0);

/// Columnar doc values that count how often their producer is closed.
#[derive(Debug)]
struct CountingFormat {
    name: &'static str,
    closes: &'static AtomicUsize,
}

#[derive(Debug)]
struct CountingProducer {
    inner: Box<dyn DocValuesProducer>,
    closes: &'static AtomicUsize,
}

impl DocValuesFormat for CountingFormat {
    fn name(&self) -> &str {
        self.name
    }

    fn fields_consumer(&self, state: &SegmentWriteState) -> Result<Box<dyn DocValuesConsumer>> {
        ColumnarDocValuesFormat::default().fields_consumer(state)
    }

    fn fields_producer(&self, state: &SegmentReadState) -> Result<Box<dyn DocValuesProducer>> {
        Ok(Box::new(CountingProducer {
            inner: ColumnarDocValuesFormat::default().fields_producer(state)?,
            closes: self.closes,
        }))
    }
}

impl DocValuesProducer for CountingProducer {
    fn numeric(&self, field: &FieldInfo) -> Result<Arc<dyn NumericDocValues>> {
        self.inner.numeric(field)
    }

    fn binary(&self, field: &FieldInfo) -> Result<Box<dyn BinaryDocValues>> {
        self.inner.binary(field)
    }

    fn sorted(&self, field: &FieldInfo) -> Result<Box<dyn SortedDocValues>> {
        self.inner.sorted(field)
    }

    fn check_integrity(&self) -> Result<()> {
        self.inner.check_integrity()
    }

    fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close()
    }
}

/// Writes like the columnar format but can never be opened for reading.
#[derive(Debug)]
struct UnreadableFormat;

impl DocValuesFormat for UnreadableFormat {
    fn name(&self) -> &str {
        "Unreadable10"
    }

    fn fields_consumer(&self, state: &SegmentWriteState) -> Result<Box<dyn DocValuesConsumer>> {
        ColumnarDocValuesFormat::default().fields_consumer(state)
    }

    fn fields_producer(&self, _state: &SegmentReadState) -> Result<Box<dyn DocValuesProducer>> {
        Err(PilumError::storage("media unreadable"))
    }
}

fn counting(name: &'static str, closes: &'static AtomicUsize) -> Arc<dyn DocValuesFormat> {
    FormatRegistry::global()
        .write()
        .register_doc_values_format(name, move || {
            Arc::new(CountingFormat { name, closes }) as Arc<dyn DocValuesFormat>
        })
        .unwrap();
    Arc::new(CountingFormat { name, closes })
}

fn write_segment(storage: &Arc<dyn Storage>, formats: PerFieldFormats<dyn DocValuesFormat>) {
    let codec = Codec::builder().doc_values_policy(Arc::new(formats)).build();
    let mut writer = SegmentWriter::with_codec(
        Arc::clone(storage),
        "_0",
        8,
        SegmentWriterConfig::default(),
        Arc::new(codec),
    )
    .unwrap();
    writer.add_numeric_field("a_counted", (0..8).collect()).unwrap();
    writer.add_numeric_field("b_other", (0..8).map(|d| d * 10).collect()).unwrap();
    writer.commit().unwrap();
}

#[test]
fn test_double_close_closes_each_producer_once() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
    let format = counting("CountingHealthy10", &HEALTHY_CLOSES);
    write_segment(&storage, PerFieldFormats::new(format));

    let reader = SegmentReader::open(Arc::clone(&storage), "_0").unwrap();
    assert_eq!(reader.numeric("a_counted").unwrap().get(3).unwrap(), 3);
    assert_eq!(reader.numeric("b_other").unwrap().get(3).unwrap(), 30);
    assert_eq!(HEALTHY_CLOSES.load(Ordering::SeqCst), 0);

    // Both fields share one producer.
    reader.close().unwrap();
    reader.close().unwrap();
    assert_eq!(HEALTHY_CLOSES.load(Ordering::SeqCst), 1);
}

#[test]
fn test_failed_open_closes_already_opened_producers() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
    let unreadable: Arc<dyn DocValuesFormat> = Arc::new(UnreadableFormat);
    FormatRegistry::global()
        .write()
        .register_doc_values_format("Unreadable10", || {
            Arc::new(UnreadableFormat) as Arc<dyn DocValuesFormat>
        })
        .unwrap();
    let mut formats = PerFieldFormats::new(counting("CountingPartial10", &PARTIAL_OPEN_CLOSES));
    formats.add_format("b_other", unreadable);
    write_segment(&storage, formats);

    let err = SegmentReader::open(Arc::clone(&storage), "_0").unwrap_err();
    assert!(err.to_string().contains("media unreadable"), "{err}");
    assert!(!err.is_corruption());
    assert_eq!(PARTIAL_OPEN_CLOSES.load(Ordering::SeqCst), 1);
}
