//! Compound files.
//!
//! Packing a segment into a compound file replaces its many small files with
//! two: `<segment>.cfs` holds the bytes of every packed file back to back and
//! `<segment>.cfe` lists where each one starts. [`CompoundReader`] exposes the
//! packed files again through the [`Storage`] trait, so formats read from a
//! compound segment exactly as they would from a plain one.

use std::collections::{BTreeMap, BTreeSet};
use std::io::SeekFrom;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crc32fast::Hasher;
use parking_lot::Mutex;

use crate::codec::codec_util::{self, FOOTER_LENGTH, ID_LENGTH};
use crate::error::{PilumError, Result};
use crate::index::file_names::{matches_segment, segment_file_name, strip_segment_name};
use crate::storage::slice::SliceInput;
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{Storage, StorageError, StorageInput, StorageOutput, delete_files_quietly};

/// Name of the compound format.
pub const COMPOUND_FORMAT_NAME: &str = "Compound10";

/// Extension of the compound data file.
pub const DATA_EXTENSION: &str = "cfs";
/// Extension of the compound entries file.
pub const ENTRIES_EXTENSION: &str = "cfe";

const DATA_CODEC: &str = "CompoundData";
const ENTRIES_CODEC: &str = "CompoundEntries";
const VERSION_START: u32 = 1;
const VERSION_CURRENT: u32 = VERSION_START;
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Location of a packed file inside the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompoundEntry {
    pub offset: u64,
    pub length: u64,
}

/// Packs the files of a segment.
#[derive(Debug, Clone, Default)]
pub struct CompoundFormat;

impl CompoundFormat {
    pub fn new() -> Self {
        CompoundFormat
    }

    /// Names of the two compound files of `segment`.
    pub fn file_names(&self, segment: &str) -> [String; 2] {
        [
            segment_file_name(segment, "", DATA_EXTENSION),
            segment_file_name(segment, "", ENTRIES_EXTENSION),
        ]
    }

    /// Pack `files` of `segment` into `<segment>.cfs` and `<segment>.cfe`.
    ///
    /// Every source file is checksum-verified while it is copied. On failure
    /// both compound files are deleted.
    pub fn write(
        &self,
        storage: &dyn Storage,
        segment: &str,
        segment_id: &[u8; ID_LENGTH],
        files: &[String],
    ) -> Result<()> {
        let [data_name, entries_name] = self.file_names(segment);
        let result = write_compound(storage, segment, segment_id, files, &data_name, &entries_name);
        if result.is_err() {
            delete_files_quietly(storage, [data_name.as_str(), entries_name.as_str()]);
        }
        result
    }

    /// Open the compound files of `segment`.
    pub fn open_reader(
        &self,
        storage: Arc<dyn Storage>,
        segment: &str,
        segment_id: &[u8; ID_LENGTH],
    ) -> Result<CompoundReader> {
        CompoundReader::open(storage, segment, segment_id)
    }
}

fn write_compound(
    storage: &dyn Storage,
    segment: &str,
    segment_id: &[u8; ID_LENGTH],
    files: &[String],
    data_name: &str,
    entries_name: &str,
) -> Result<()> {
    let mut stripped_names = BTreeSet::new();
    for file in files {
        if !matches_segment(file, segment) {
            return Err(PilumError::consistency(format!(
                "file {file} does not belong to segment {segment}"
            )));
        }
        if !stripped_names.insert(strip_segment_name(file)) {
            return Err(PilumError::consistency(format!(
                "duplicate file {file} in compound file of {segment}"
            )));
        }
    }

    let mut data = StructWriter::new(storage.create_output(data_name)?);
    codec_util::write_index_header(&mut data, DATA_CODEC, VERSION_CURRENT, segment_id, "")?;

    let mut entries = Vec::with_capacity(files.len());
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    for file in files {
        let offset = data.position();
        let mut input = storage.open_input(file)?;
        let length = copy_verified(&mut data, input.as_mut(), file, &mut buffer)?;
        input.close()?;
        entries.push((strip_segment_name(file), CompoundEntry { offset, length }));
    }
    codec_util::write_footer(&mut data)?;
    data.close()?;

    let mut out = StructWriter::new(storage.create_output(entries_name)?);
    codec_util::write_index_header(&mut out, ENTRIES_CODEC, VERSION_CURRENT, segment_id, "")?;
    out.write_varint(entries.len() as u64)?;
    for (name, entry) in &entries {
        out.write_string(name)?;
        out.write_u64(entry.offset)?;
        out.write_u64(entry.length)?;
    }
    codec_util::write_footer(&mut out)?;
    out.close()?;

    log::debug!(
        "Wrote compound file {data_name} with {} entries",
        entries.len()
    );
    Ok(())
}

/// Copy `input` to `out`, checking its footer checksum on the way.
fn copy_verified<W: StorageOutput>(
    out: &mut StructWriter<W>,
    input: &mut dyn StorageInput,
    name: &str,
    buffer: &mut [u8],
) -> Result<u64> {
    let stored = codec_util::retrieve_checksum(input)
        .map_err(|e| PilumError::corruption(format!("cannot pack {name}: {e}")))?;
    let size = input.size()?;
    input.seek(SeekFrom::Start(0))?;

    let mut hasher = Hasher::new();
    let mut remaining = size - 8;
    while remaining > 0 {
        let n = remaining.min(buffer.len() as u64) as usize;
        input.read_exact(&mut buffer[..n])?;
        hasher.update(&buffer[..n]);
        out.write_raw(&buffer[..n])?;
        remaining -= n as u64;
    }
    let mut checksum = [0u8; 8];
    input.read_exact(&mut checksum)?;
    out.write_raw(&checksum)?;

    let actual = hasher.finalize() as u64;
    if actual != stored {
        return Err(PilumError::corruption(format!(
            "checksum of {name} failed while packing: expected {actual:#010x}, stored {stored:#010x}"
        )));
    }
    Ok(size)
}

/// Read-only view of the files packed into a compound file.
///
/// Each opened input is a [`SliceInput`] over its own clone of the data file;
/// reading or seeking past the end of a packed file fails.
#[derive(Debug)]
pub struct CompoundReader {
    segment: String,
    data_name: String,
    data: Mutex<Box<dyn StorageInput>>,
    entries: BTreeMap<String, CompoundEntry>,
    closed: AtomicBool,
}

impl CompoundReader {
    /// Open `<segment>.cfe` and `<segment>.cfs`, verifying both headers and
    /// the checksum of the entries.
    pub fn open(storage: Arc<dyn Storage>, segment: &str, segment_id: &[u8; ID_LENGTH]) -> Result<Self> {
        let data_name = segment_file_name(segment, "", DATA_EXTENSION);
        let entries_name = segment_file_name(segment, "", ENTRIES_EXTENSION);

        let entries = {
            let mut input = StructReader::new(storage.open_input(&entries_name)?)?;
            codec_util::check_index_header(
                &mut input,
                ENTRIES_CODEC,
                VERSION_START,
                VERSION_CURRENT,
                segment_id,
                "",
            )?;
            let count = input.read_varint()?;
            let mut entries = BTreeMap::new();
            for _ in 0..count {
                let name = input.read_string()?;
                let offset = input.read_u64()?;
                let length = input.read_u64()?;
                if entries.insert(name.clone(), CompoundEntry { offset, length }).is_some() {
                    return Err(PilumError::corruption(format!(
                        "duplicate entry {name} in {entries_name}"
                    )));
                }
            }
            codec_util::check_footer(&mut input)?;
            input.close()?;
            entries
        };

        let data = storage.open_input(&data_name)?;
        let data_start = {
            let mut header = StructReader::new(data.clone_input()?)?;
            codec_util::check_index_header(
                &mut header,
                DATA_CODEC,
                VERSION_START,
                VERSION_CURRENT,
                segment_id,
                "",
            )?;
            header.position()
        };
        codec_util::retrieve_checksum(data.as_ref())?;
        let data_end = data.size()? - FOOTER_LENGTH;

        for (name, entry) in &entries {
            let in_bounds = entry
                .offset
                .checked_add(entry.length)
                .is_some_and(|end| entry.offset >= data_start && end <= data_end);
            if !in_bounds {
                return Err(PilumError::corruption(format!(
                    "entry {name} at {} ({} bytes) lies outside {data_name}",
                    entry.offset, entry.length
                )));
            }
        }

        log::debug!(
            "Opened compound file {data_name} with {} entries",
            entries.len()
        );
        Ok(CompoundReader {
            segment: segment.to_string(),
            data_name,
            data: Mutex::new(data),
            entries,
            closed: AtomicBool::new(false),
        })
    }

    /// Verify the checksum of the data file.
    pub fn check_integrity(&self) -> Result<()> {
        let data = self.clone_data()?;
        codec_util::checksum_entire_file(data.as_ref())?;
        Ok(())
    }

    /// Packed entries by full file name.
    pub fn entries(&self) -> BTreeMap<String, CompoundEntry> {
        self.entries
            .iter()
            .map(|(stripped, entry)| (format!("{}{stripped}", self.segment), *entry))
            .collect()
    }

    fn clone_data(&self) -> Result<Box<dyn StorageInput>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::StorageClosed.into());
        }
        self.data.lock().clone_input()
    }

    fn entry(&self, name: &str) -> Result<CompoundEntry> {
        matches_segment(name, &self.segment)
            .then(|| self.entries.get(strip_segment_name(name)))
            .flatten()
            .copied()
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()).into())
    }

    fn read_only(&self, operation: &str) -> PilumError {
        StorageError::InvalidOperation(format!(
            "{operation} is not supported by compound file {}",
            self.data_name
        ))
        .into()
    }
}

impl Storage for CompoundReader {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let entry = self.entry(name)?;
        let data = self.clone_data()?;
        Ok(Box::new(SliceInput::new(data, entry.offset, entry.length)?))
    }

    fn create_output(&self, _name: &str) -> Result<Box<dyn StorageOutput>> {
        Err(self.read_only("create_output"))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.entry(name).is_ok()
    }

    fn delete_file(&self, _name: &str) -> Result<()> {
        Err(self.read_only("delete_file"))
    }

    fn list_files(&self) -> Result<Vec<String>> {
        Ok(self.entries().into_keys().collect())
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        Ok(self.entry(name)?.length)
    }

    fn rename_file(&self, _old_name: &str, _new_name: &str) -> Result<()> {
        Err(self.read_only("rename_file"))
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.data.lock().close()?;
            log::debug!("Closed compound file {}", self.data_name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    const ID: [u8; 16] = [1; 16];

    fn write_file(storage: &dyn Storage, name: &str, body: &[u8]) {
        let mut out = StructWriter::new(storage.create_output(name).unwrap());
        codec_util::write_header(&mut out, "Test", 1).unwrap();
        out.write_raw(body).unwrap();
        codec_util::write_footer(&mut out).unwrap();
        out.close().unwrap();
    }

    fn packed(storage: &Arc<dyn Storage>) -> Vec<String> {
        let files = vec![
            "_0.fnm".to_string(),
            "_0_BlockPostings10_0.doc".to_string(),
            "_0_Columnar10_0.dvd".to_string(),
        ];
        for (i, name) in files.iter().enumerate() {
            write_file(storage.as_ref(), name, &vec![i as u8; 100 * (i + 1)]);
        }
        CompoundFormat::new()
            .write(storage.as_ref(), "_0", &ID, &files)
            .unwrap();
        files
    }

    #[test]
    fn test_round_trip() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let files = packed(&storage);

        let reader = CompoundReader::open(Arc::clone(&storage), "_0", &ID).unwrap();
        assert_eq!(reader.list_files().unwrap(), files);
        for name in &files {
            let expected = crate::storage::read_all(storage.as_ref(), name).unwrap();
            assert_eq!(reader.file_size(name).unwrap(), expected.len() as u64);
            assert_eq!(crate::storage::read_all(&reader, name).unwrap(), expected);

            let input = reader.open_input(name).unwrap();
            codec_util::checksum_entire_file(input.as_ref()).unwrap();
        }
        assert!(reader.file_exists("_0.fnm"));
        assert!(!reader.file_exists("_1.fnm"));
        assert!(reader.open_input("_0.si").is_err());
        reader.check_integrity().unwrap();
    }

    #[test]
    fn test_reads_past_entry_fail() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        packed(&storage);
        let reader = CompoundReader::open(Arc::clone(&storage), "_0", &ID).unwrap();

        let mut input = reader.open_input("_0.fnm").unwrap();
        let size = input.size().unwrap();
        input.seek(SeekFrom::Start(size - 4)).unwrap();
        let mut buf = [0u8; 8];
        let err = input.read_exact(&mut buf).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
        assert!(input.seek(SeekFrom::Start(size + 1)).is_err());
    }

    #[test]
    fn test_read_only() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        packed(&storage);
        let reader = CompoundReader::open(Arc::clone(&storage), "_0", &ID).unwrap();

        assert!(matches!(
            reader.create_output("_0.x"),
            Err(PilumError::InvalidOperation(_))
        ));
        assert!(matches!(
            reader.delete_file("_0.fnm"),
            Err(PilumError::InvalidOperation(_))
        ));
        assert!(reader.rename_file("_0.fnm", "_0.x").is_err());

        reader.close().unwrap();
        assert!(reader.open_input("_0.fnm").is_err());
    }

    #[test]
    fn test_rejects_foreign_and_corrupt_files() {
        let memory = Arc::new(MemoryStorage::new_default());
        let storage: Arc<dyn Storage> = memory.clone();
        write_file(storage.as_ref(), "_0.fnm", b"fields");
        write_file(storage.as_ref(), "_1.fnm", b"other");
        let format = CompoundFormat::new();

        let err = format
            .write(storage.as_ref(), "_0", &ID, &["_0.fnm".to_string(), "_1.fnm".to_string()])
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Consistency);
        assert!(!storage.file_exists("_0.cfs"));

        let mut bytes = crate::storage::read_all(storage.as_ref(), "_0.fnm").unwrap();
        bytes[10] ^= 0x40;
        memory.overwrite_file("_0.fnm", bytes).unwrap();
        let err = format
            .write(storage.as_ref(), "_0", &ID, &["_0.fnm".to_string()])
            .unwrap_err();
        assert!(err.is_corruption());
        assert!(!storage.file_exists("_0.cfs"));
        assert!(!storage.file_exists("_0.cfe"));
    }

    #[test]
    fn test_corrupt_entries_detected() {
        let memory = Arc::new(MemoryStorage::new_default());
        let storage: Arc<dyn Storage> = memory.clone();
        packed(&storage);

        let mut bytes = crate::storage::read_all(storage.as_ref(), "_0.cfe").unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        memory.overwrite_file("_0.cfe", bytes).unwrap();
        assert!(
            CompoundReader::open(Arc::clone(&storage), "_0", &ID)
                .unwrap_err()
                .is_corruption()
        );
    }
}
