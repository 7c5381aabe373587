//! Structured file I/O for binary data serialization.
//!
//! [`StructWriter`] and [`StructReader`] wrap a storage output or input with
//! typed little-endian and VInt primitives and keep a running CRC-32 of every
//! byte that passes through them. The codec footer is built on that checksum.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;

use crate::error::{PilumError, Result};
use crate::storage::{StorageInput, StorageOutput};
use crate::util::varint;

/// A structured file writer for binary data.
pub struct StructWriter<W: StorageOutput> {
    writer: W,
    hasher: Hasher,
    position: u64,
}

impl<W: StorageOutput> StructWriter<W> {
    /// Create a new structured file writer.
    pub fn new(writer: W) -> Self {
        StructWriter {
            writer,
            hasher: Hasher::new(),
            position: 0,
        }
    }

    /// Write a u8 value.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.writer.write_u8(value)?;
        self.update(&[value]);
        Ok(())
    }

    /// Write a u32 value (little-endian).
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.writer.write_u32::<LittleEndian>(value)?;
        self.update(&value.to_le_bytes());
        Ok(())
    }

    /// Write a u64 value (little-endian).
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.writer.write_u64::<LittleEndian>(value)?;
        self.update(&value.to_le_bytes());
        Ok(())
    }

    /// Write an i64 value (little-endian, two's complement).
    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        self.writer.write_i64::<LittleEndian>(value)?;
        self.update(&value.to_le_bytes());
        Ok(())
    }

    /// Write a variable-length integer.
    pub fn write_varint(&mut self, value: u64) -> Result<()> {
        let encoded = varint::encode_u64(value);
        self.write_raw(&encoded)
    }

    /// Write a string with length prefix.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_bytes(value.as_bytes())
    }

    /// Write raw bytes with length prefix.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.write_varint(value.len() as u64)?;
        self.write_raw(value)
    }

    /// Write raw bytes without length prefix.
    pub fn write_raw(&mut self, value: &[u8]) -> Result<()> {
        self.writer.write_all(value)?;
        self.update(value);
        Ok(())
    }

    /// Write 32-bit words, each little-endian.
    pub fn write_u32_words(&mut self, words: &[u32]) -> Result<()> {
        let mut bytes = Vec::with_capacity(words.len() * 4);
        for &word in words {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        self.write_raw(&bytes)
    }

    /// Write a string map as a count followed by pairs in key order.
    pub fn write_string_map(&mut self, map: &BTreeMap<String, String>) -> Result<()> {
        self.write_varint(map.len() as u64)?;
        for (key, value) in map {
            self.write_string(key)?;
            self.write_string(value)?;
        }
        Ok(())
    }

    /// Write a string set as a count followed by the members in order.
    pub fn write_string_set(&mut self, set: &BTreeSet<String>) -> Result<()> {
        self.write_varint(set.len() as u64)?;
        for value in set {
            self.write_string(value)?;
        }
        Ok(())
    }

    /// Number of bytes written so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// CRC-32 of every byte written so far.
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.position += data.len() as u64;
    }

    /// Flush, sync and close the underlying output.
    pub fn close(mut self) -> Result<()> {
        self.writer.flush_and_sync()?;
        self.writer.close()?;
        Ok(())
    }
}

impl<W: StorageOutput> std::fmt::Debug for StructWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructWriter")
            .field("writer", &self.writer)
            .field("position", &self.position)
            .finish()
    }
}

/// A structured file reader for binary data.
///
/// The running checksum covers the bytes read sequentially since the reader
/// was created. After a [`seek`](Self::seek) it no longer describes a prefix
/// of the file; random-access readers verify files with
/// `codec_util::checksum_entire_file` instead.
pub struct StructReader<R: StorageInput> {
    reader: R,
    hasher: Hasher,
    position: u64,
    file_size: u64,
}

impl<R: StorageInput> StructReader<R> {
    /// Create a new structured file reader.
    pub fn new(mut reader: R) -> Result<Self> {
        let file_size = reader.size()?;
        let position = reader.stream_position()?;
        Ok(StructReader {
            reader,
            hasher: Hasher::new(),
            position,
            file_size,
        })
    }

    /// Read a u8 value.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure_available(1)?;
        let value = self.reader.read_u8()?;
        self.update(&[value]);
        Ok(value)
    }

    /// Read a u32 value (little-endian).
    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure_available(4)?;
        let value = self.reader.read_u32::<LittleEndian>()?;
        self.update(&value.to_le_bytes());
        Ok(value)
    }

    /// Read a u64 value (little-endian).
    pub fn read_u64(&mut self) -> Result<u64> {
        self.ensure_available(8)?;
        let value = self.reader.read_u64::<LittleEndian>()?;
        self.update(&value.to_le_bytes());
        Ok(value)
    }

    /// Read an i64 value (little-endian, two's complement).
    pub fn read_i64(&mut self) -> Result<i64> {
        self.ensure_available(8)?;
        let value = self.reader.read_i64::<LittleEndian>()?;
        self.update(&value.to_le_bytes());
        Ok(value)
    }

    /// Read a variable-length integer.
    pub fn read_varint(&mut self) -> Result<u64> {
        let position = self.position;
        let (value, raw) =
            varint::read_u64(&mut self.reader).map_err(|e| truncated(e, position))?;
        self.update(&raw);
        Ok(value)
    }

    /// Read a variable-length integer that must fit in a u32.
    pub fn read_varint_u32(&mut self) -> Result<u32> {
        let value = self.read_varint()?;
        u32::try_from(value)
            .map_err(|_| PilumError::corruption(format!("VInt {value} overflows u32")))
    }

    /// Read a string with length prefix.
    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|e| PilumError::corruption(format!("Invalid UTF-8: {e}")))
    }

    /// Read bytes with length prefix.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let length = self.read_varint()?;
        if length > self.remaining() {
            return Err(PilumError::corruption(format!(
                "length {length} exceeds the {} bytes remaining",
                self.remaining()
            )));
        }
        self.read_raw(length as usize)
    }

    /// Read exact number of raw bytes.
    pub fn read_raw(&mut self, length: usize) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; length];
        self.read_raw_into(&mut bytes)?;
        Ok(bytes)
    }

    /// Fill `buf` with raw bytes.
    pub fn read_raw_into(&mut self, buf: &mut [u8]) -> Result<()> {
        self.ensure_available(buf.len() as u64)?;
        self.reader.read_exact(buf)?;
        self.update(buf);
        Ok(())
    }

    /// Read `count` little-endian 32-bit words.
    pub fn read_u32_words(&mut self, count: usize) -> Result<Vec<u32>> {
        if count as u64 * 4 > self.remaining() {
            return Err(PilumError::corruption(format!(
                "{count} words exceed the {} bytes remaining",
                self.remaining()
            )));
        }
        let bytes = self.read_raw(count * 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }

    /// Read a string map written by [`StructWriter::write_string_map`].
    pub fn read_string_map(&mut self) -> Result<BTreeMap<String, String>> {
        let count = self.read_varint()?;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let key = self.read_string()?;
            let value = self.read_string()?;
            if map.insert(key.clone(), value).is_some() {
                return Err(PilumError::corruption(format!("duplicate map key {key:?}")));
            }
        }
        Ok(map)
    }

    /// Read a string set written by [`StructWriter::write_string_set`].
    pub fn read_string_set(&mut self) -> Result<BTreeSet<String>> {
        let count = self.read_varint()?;
        let mut set = BTreeSet::new();
        for _ in 0..count {
            let value = self.read_string()?;
            if !set.insert(value.clone()) {
                return Err(PilumError::corruption(format!("duplicate set entry {value:?}")));
            }
        }
        Ok(set)
    }

    /// Move to an absolute position.
    pub fn seek(&mut self, position: u64) -> Result<()> {
        self.reader.seek(SeekFrom::Start(position))?;
        self.position = position;
        Ok(())
    }

    /// Get current file position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Get file size.
    pub fn size(&self) -> u64 {
        self.file_size
    }

    /// Bytes between the current position and the end of the file.
    pub fn remaining(&self) -> u64 {
        self.file_size.saturating_sub(self.position)
    }

    /// CRC-32 of every byte read since creation.
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// The file size is known up front, so a read past the end means the
    /// file is truncated or a length was corrupted.
    fn ensure_available(&self, length: u64) -> Result<()> {
        if length > self.remaining() {
            return Err(PilumError::corruption(format!(
                "read of {length} bytes at position {} runs past the end of a {}-byte file",
                self.position, self.file_size
            )));
        }
        Ok(())
    }

    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.position += data.len() as u64;
    }

    /// Close the underlying input.
    pub fn close(mut self) -> Result<()> {
        self.reader.close()
    }
}

fn truncated(error: PilumError, position: u64) -> PilumError {
    match error {
        PilumError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => PilumError::corruption(
            format!("VInt at position {position} runs past the end of the file"),
        ),
        other => other,
    }
}

impl<R: StorageInput> std::fmt::Debug for StructReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructReader")
            .field("reader", &self.reader)
            .field("position", &self.position)
            .field("file_size", &self.file_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_struct_writer_reader() {
        let storage = MemoryStorage::new_default();

        let mut map = BTreeMap::new();
        map.insert("os".to_string(), "linux".to_string());
        map.insert("a".to_string(), "b".to_string());
        let set: BTreeSet<String> = ["_0.si", "_0.fnm"].iter().map(|s| s.to_string()).collect();

        let written_checksum = {
            let output = storage.create_output("_0.bin").unwrap();
            let mut writer = StructWriter::new(output);

            writer.write_u8(42).unwrap();
            writer.write_u32(0x3FD7_6C17).unwrap();
            writer.write_u64(u64::MAX - 1).unwrap();
            writer.write_i64(-12345).unwrap();
            writer.write_varint(300).unwrap();
            writer.write_string("Hello, World!").unwrap();
            writer.write_bytes(&[1, 2, 3]).unwrap();
            writer.write_u32_words(&[7, 0xFFFF_FFFF]).unwrap();
            writer.write_string_map(&map).unwrap();
            writer.write_string_set(&set).unwrap();

            let checksum = writer.checksum();
            writer.close().unwrap();
            checksum
        };

        let input = storage.open_input("_0.bin").unwrap();
        let mut reader = StructReader::new(input).unwrap();

        assert_eq!(reader.read_u8().unwrap(), 42);
        assert_eq!(reader.read_u32().unwrap(), 0x3FD7_6C17);
        assert_eq!(reader.read_u64().unwrap(), u64::MAX - 1);
        assert_eq!(reader.read_i64().unwrap(), -12345);
        assert_eq!(reader.read_varint().unwrap(), 300);
        assert_eq!(reader.read_string().unwrap(), "Hello, World!");
        assert_eq!(reader.read_bytes().unwrap(), vec![1, 2, 3]);
        assert_eq!(reader.read_u32_words(2).unwrap(), vec![7, 0xFFFF_FFFF]);
        assert_eq!(reader.read_string_map().unwrap(), map);
        assert_eq!(reader.read_string_set().unwrap(), set);

        assert_eq!(reader.remaining(), 0);
        assert_eq!(reader.checksum(), written_checksum);
    }

    #[test]
    fn test_checksum_is_cumulative() {
        let storage = MemoryStorage::new_default();
        let output = storage.create_output("_0.bin").unwrap();
        let mut writer = StructWriter::new(output);
        writer.write_raw(b"abc").unwrap();
        writer.write_raw(b"def").unwrap();

        assert_eq!(writer.checksum(), crc32fast::hash(b"abcdef"));
        assert_eq!(writer.position(), 6);
    }

    #[test]
    fn test_oversized_length_is_corruption() {
        let storage = MemoryStorage::new_default();
        let output = storage.create_output("_0.bin").unwrap();
        let mut writer = StructWriter::new(output);
        writer.write_varint(1000).unwrap();
        writer.write_raw(b"short").unwrap();
        writer.close().unwrap();

        let input = storage.open_input("_0.bin").unwrap();
        let mut reader = StructReader::new(input).unwrap();
        assert!(reader.read_bytes().unwrap_err().is_corruption());
    }

    #[test]
    fn test_reads_past_end_are_corruption() {
        let storage = MemoryStorage::new_default();
        let output = storage.create_output("_0.bin").unwrap();
        let mut writer = StructWriter::new(output);
        writer.write_u8(7).unwrap();
        writer.write_u8(0x80).unwrap();
        writer.close().unwrap();

        let open = || StructReader::new(storage.open_input("_0.bin").unwrap()).unwrap();
        assert!(open().read_u32().unwrap_err().is_corruption());
        assert!(open().read_u64().unwrap_err().is_corruption());
        assert!(open().read_i64().unwrap_err().is_corruption());
        assert!(open().read_raw(3).unwrap_err().is_corruption());

        let mut reader = open();
        assert_eq!(reader.read_u8().unwrap(), 7);
        // A continuation bit with nothing after it.
        assert!(reader.read_varint().unwrap_err().is_corruption());

        let mut reader = open();
        reader.read_raw(2).unwrap();
        assert!(reader.read_u8().unwrap_err().is_corruption());
        assert_eq!(reader.position(), 2);
    }

    #[test]
    fn test_invalid_utf8_is_corruption() {
        let storage = MemoryStorage::new_default();
        let output = storage.create_output("_0.bin").unwrap();
        let mut writer = StructWriter::new(output);
        writer.write_bytes(&[0xFF, 0xFE]).unwrap();
        writer.close().unwrap();

        let input = storage.open_input("_0.bin").unwrap();
        let mut reader = StructReader::new(input).unwrap();
        assert!(reader.read_string().unwrap_err().is_corruption());
    }
}
