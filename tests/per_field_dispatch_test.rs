use std::sync::Arc;

use pilum::codec::Codec;
use pilum::codec::doc_values::{
    ColumnarDocValuesConfig, ColumnarDocValuesFormat, DocValuesFormat,
};
use pilum::codec::per_field::{
    PER_FIELD_DOC_VALUES_FORMAT_KEY, PER_FIELD_DOC_VALUES_SUFFIX_KEY,
    PER_FIELD_POSTINGS_SUFFIX_KEY, PerFieldFormats,
};
use pilum::codec::postings::{BlockPostingsFormat, PostingsFormat};
use pilum::index::{SegmentReader, SegmentWriter, SegmentWriterConfig};
use pilum::storage::Storage;
use pilum::storage::memory::MemoryStorage;

const MAX_DOC: u32 = 300;

/// "price" and "rank" share one instance, "title" gets its own, everything
/// else uses the default.
fn codec() -> Arc<Codec> {
    let default_doc_values: Arc<dyn DocValuesFormat> = Arc::new(ColumnarDocValuesFormat::default());
    let shared: Arc<dyn DocValuesFormat> =
        Arc::new(ColumnarDocValuesFormat::new(ColumnarDocValuesConfig {
            max_table_cardinality: 4,
        }));
    let title: Arc<dyn DocValuesFormat> = Arc::new(ColumnarDocValuesFormat::default());
    let mut doc_values = PerFieldFormats::new(default_doc_values);
    doc_values.add_format("price", Arc::clone(&shared));
    doc_values.add_format("rank", Arc::clone(&shared));
    doc_values.add_format("title", title);

    let default_postings: Arc<dyn PostingsFormat> = Arc::new(BlockPostingsFormat::new());
    let mut postings = PerFieldFormats::new(default_postings);
    postings.add_format("tags", Arc::new(BlockPostingsFormat::new()) as Arc<dyn PostingsFormat>);

    Arc::new(
        Codec::builder()
            .doc_values_policy(Arc::new(doc_values))
            .postings_policy(Arc::new(postings))
            .build(),
    )
}

fn write_segment(storage: &Arc<dyn Storage>, use_compound_file: bool) {
    let config = SegmentWriterConfig {
        use_compound_file,
        ..Default::default()
    };
    let mut writer =
        SegmentWriter::with_codec(Arc::clone(storage), "_0", MAX_DOC, config, codec()).unwrap();
    writer
        .add_numeric_field("price", (0..MAX_DOC as i64).map(|d| d * 3).collect())
        .unwrap();
    writer
        .add_numeric_field("rank", (0..MAX_DOC as i64).map(|d| d % 4).collect())
        .unwrap();
    writer
        .add_binary_field(
            "title",
            (0..MAX_DOC).map(|d| format!("title {d}").into_bytes()).collect(),
        )
        .unwrap();
    writer
        .add_numeric_field("year", (0..MAX_DOC as i64).map(|d| 1990 + d % 30).collect())
        .unwrap();
    for doc in 0..MAX_DOC {
        writer.add_term("body", "common", doc, 1).unwrap();
        if doc % 2 == 0 {
            writer.add_term("tags", "even", doc, 1).unwrap();
        }
    }
    writer.commit().unwrap();
}

fn suffix_of(reader: &SegmentReader, field: &str, key: &str) -> String {
    reader
        .field_infos()
        .field_by_name(field)
        .and_then(|info| info.attribute(key))
        .unwrap_or_default()
}

#[test]
fn test_fields_grouped_by_format_instance() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
    write_segment(&storage, false);

    let files = storage.list_files().unwrap();
    for suffix in ["Columnar10_0", "Columnar10_1", "Columnar10_2"] {
        for ext in ["dvd", "dvm"] {
            let name = format!("_0_{suffix}.{ext}");
            assert!(files.contains(&name), "missing {name} in {files:?}");
        }
    }
    for suffix in ["BlockPostings10_0", "BlockPostings10_1"] {
        for ext in ["doc", "tim"] {
            let name = format!("_0_{suffix}.{ext}");
            assert!(files.contains(&name), "missing {name} in {files:?}");
        }
    }
    assert!(!files.iter().any(|f| f.contains("Columnar10_3")));

    let reader = SegmentReader::open(Arc::clone(&storage), "_0").unwrap();
    let key = PER_FIELD_DOC_VALUES_SUFFIX_KEY;
    assert_eq!(suffix_of(&reader, "price", key), suffix_of(&reader, "rank", key));
    assert_ne!(suffix_of(&reader, "price", key), suffix_of(&reader, "title", key));
    assert_ne!(suffix_of(&reader, "title", key), suffix_of(&reader, "year", key));
    assert_ne!(
        suffix_of(&reader, "body", PER_FIELD_POSTINGS_SUFFIX_KEY),
        suffix_of(&reader, "tags", PER_FIELD_POSTINGS_SUFFIX_KEY)
    );
    assert_eq!(
        suffix_of(&reader, "price", PER_FIELD_DOC_VALUES_FORMAT_KEY),
        "Columnar10"
    );
    // Fields without doc values record no doc-values format.
    assert_eq!(suffix_of(&reader, "body", PER_FIELD_DOC_VALUES_FORMAT_KEY), "");
}

#[test]
fn test_reopen_reads_every_group() {
    for use_compound_file in [false, true] {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        write_segment(&storage, use_compound_file);

        // The reader resolves formats from the recorded attributes, not from
        // the writer's policy.
        let reader = SegmentReader::open(Arc::clone(&storage), "_0").unwrap();
        let price = reader.numeric("price").unwrap();
        let rank = reader.numeric("rank").unwrap();
        let year = reader.numeric("year").unwrap();
        let mut title = reader.binary("title").unwrap();
        for doc in 0..MAX_DOC {
            assert_eq!(price.get(doc).unwrap(), doc as i64 * 3);
            assert_eq!(rank.get(doc).unwrap(), doc as i64 % 4);
            assert_eq!(year.get(doc).unwrap(), 1990 + doc as i64 % 30);
            assert_eq!(title.get(doc).unwrap(), format!("title {doc}").into_bytes());
        }

        let body = reader.terms("body").unwrap().unwrap();
        assert_eq!(body.doc_freq(b"common"), Some(MAX_DOC));
        let tags = reader.terms("tags").unwrap().unwrap();
        assert_eq!(tags.doc_freq(b"even"), Some(MAX_DOC / 2));

        reader.check_integrity().unwrap();
        reader.close().unwrap();
    }
}

#[test]
fn test_unknown_recorded_format_is_corruption() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
    let mut writer =
        SegmentWriter::new(Arc::clone(&storage), "_0", 2, SegmentWriterConfig::default()).unwrap();
    writer.add_numeric_field("n", vec![1, 2]).unwrap();
    writer.commit().unwrap();

    // Rename the format recorded in the field infos to one nobody registered.
    let reader = SegmentReader::open(Arc::clone(&storage), "_0").unwrap();
    let field = reader.field_infos().field_by_name("n").unwrap();
    field.put_attribute(PER_FIELD_DOC_VALUES_FORMAT_KEY, "Unregistered10");
    let state = pilum::index::state::SegmentReadState {
        storage: Arc::clone(&storage),
        segment_name: "_0".to_string(),
        segment_id: reader.info().id,
        max_doc: 2,
        field_infos: Arc::clone(reader.field_infos()),
        segment_suffix: String::new(),
    };
    let err = reader
        .codec()
        .doc_values_format()
        .fields_producer(&state)
        .unwrap_err();
    assert!(err.is_corruption());
}
