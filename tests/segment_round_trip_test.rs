use std::sync::Arc;

use pilum::codec::postings::Terms;
use pilum::index::{SegmentReader, SegmentWriter, SegmentWriterConfig};
use pilum::storage::file::FileStorageConfig;
use pilum::storage::memory::MemoryStorage;
use pilum::storage::{Storage, StorageConfig, StorageFactory};
use tempfile::tempdir;

const MAX_DOC: u32 = 1000;
const COLORS: [&str; 5] = ["amber", "blue", "cyan", "green", "red"];
const TERM_COUNT: u32 = 7;

fn term(k: u32) -> String {
    format!("term{k}")
}

fn write_segment(storage: &Arc<dyn Storage>, name: &str, use_compound_file: bool) {
    let config = SegmentWriterConfig {
        use_compound_file,
        ..Default::default()
    };
    let mut writer = SegmentWriter::new(Arc::clone(storage), name, MAX_DOC, config).unwrap();

    writer
        .add_numeric_field("a", (0..MAX_DOC).map(|doc| (doc % 10) as i64).collect())
        .unwrap();
    for doc in 0..MAX_DOC {
        writer.add_term("b", term(doc % TERM_COUNT), doc, 1 + doc % 3).unwrap();
    }
    writer
        .add_sorted_field("c", (0..MAX_DOC).map(|doc| Some(COLORS[doc as usize % 5])))
        .unwrap();

    let info = writer.commit().unwrap();
    assert_eq!(info.max_doc, MAX_DOC);
    assert_eq!(info.is_compound_file, use_compound_file);
}

fn verify_segment(storage: &Arc<dyn Storage>, name: &str) {
    let reader = SegmentReader::open(Arc::clone(storage), name).unwrap();
    assert_eq!(reader.max_doc(), MAX_DOC);
    assert_eq!(reader.field_infos().len(), 3);

    let a = reader.numeric("a").unwrap();
    assert_eq!(a.len(), MAX_DOC);
    for doc in 0..MAX_DOC {
        assert_eq!(a.get(doc).unwrap(), (doc % 10) as i64, "doc {doc}");
    }

    let b: Arc<dyn Terms> = reader.terms("b").unwrap().expect("field b has postings");
    assert_eq!(b.size(), TERM_COUNT as usize);
    assert_eq!(b.sum_doc_freq(), MAX_DOC as u64);
    for k in 0..TERM_COUNT {
        let postings = b.postings(term(k).as_bytes()).unwrap().unwrap();
        let expected: Vec<u32> = (0..MAX_DOC).filter(|doc| doc % TERM_COUNT == k).collect();
        assert_eq!(postings.doc_ids(), expected);
        for posting in postings.iter() {
            assert_eq!(posting.frequency, 1 + posting.doc_id % 3);
        }
        assert_eq!(b.doc_freq(term(k).as_bytes()), Some(expected.len() as u32));
    }
    assert!(b.postings(b"missing").unwrap().is_none());

    let mut c = reader.sorted("c").unwrap();
    assert_eq!(c.value_count(), 5);
    for (ord, color) in COLORS.iter().enumerate() {
        assert_eq!(c.lookup_ord(ord as u32).unwrap(), color.as_bytes());
    }
    for doc in 0..MAX_DOC {
        assert_eq!(c.ord(doc).unwrap(), (doc % 5) as i64);
    }
    assert_eq!(c.lookup_term(b"cyan").unwrap(), Ok(2));
    assert_eq!(c.lookup_term(b"black").unwrap(), Err(1));

    reader.check_integrity().unwrap();
    reader.close().unwrap();
}

#[test]
fn test_memory_round_trip() {
    for use_compound_file in [true, false] {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        write_segment(&storage, "_0", use_compound_file);
        verify_segment(&storage, "_0");
    }
}

#[test]
fn test_file_round_trip() {
    for use_mmap in [false, true] {
        let dir = tempdir().unwrap();
        {
            let storage =
                StorageFactory::create(StorageConfig::File(FileStorageConfig::new(dir.path())))
                    .unwrap();
            write_segment(&storage, "_0", true);
            write_segment(&storage, "_1", false);
        }

        let mut config = FileStorageConfig::new(dir.path());
        config.use_mmap = use_mmap;
        let storage = StorageFactory::open(StorageConfig::File(config)).unwrap();
        verify_segment(&storage, "_0");
        verify_segment(&storage, "_1");
    }
}

#[test]
fn test_reopen_is_deterministic() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
    write_segment(&storage, "_0", true);

    let first = SegmentReader::open(Arc::clone(&storage), "_0").unwrap();
    let second = SegmentReader::open(Arc::clone(&storage), "_0").unwrap();
    assert_eq!(first.info(), second.info());
    for (x, y) in first.field_infos().iter().zip(second.field_infos().iter()) {
        assert_eq!(x.name, y.name);
        assert_eq!(x.attributes(), y.attributes());
    }
    let (x, y) = (first.terms("b").unwrap().unwrap(), second.terms("b").unwrap().unwrap());
    assert_eq!(x.stats(), y.stats());
}
