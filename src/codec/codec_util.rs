//! Headers and checksum footers shared by every Pilum file.
//!
//! Every file starts with a header naming the codec that wrote it and its
//! version, and ends with a 16-byte footer carrying a CRC-32 of all preceding
//! bytes. Per-segment files use the *index header*, which adds the segment id
//! and the per-field suffix so a file copied from another segment, or renamed
//! between sub-formats, is detected at open time.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};
use crc32fast::Hasher;

use crate::error::{PilumError, Result};
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{StorageInput, StorageOutput};
use crate::util::varint;

/// Magic number at the start of every header.
pub const CODEC_MAGIC: u32 = 0x3FD7_6C17;

/// Magic number at the start of every footer.
pub const FOOTER_MAGIC: u32 = !CODEC_MAGIC;

/// Length of the footer in bytes.
pub const FOOTER_LENGTH: u64 = 16;

/// Length of a segment id in bytes.
pub const ID_LENGTH: usize = 16;

/// Algorithm id of CRC-32/IEEE, the only supported checksum.
pub const CRC32_ALGORITHM: u32 = 0;

const MAX_CODEC_NAME_LEN: usize = 127;
const MAX_SUFFIX_LEN: usize = 255;
const CHECKSUM_BUFFER_SIZE: usize = 8192;

/// Write a plain header: magic, codec name and version.
pub fn write_header<W: StorageOutput>(
    out: &mut StructWriter<W>,
    codec: &str,
    version: u32,
) -> Result<()> {
    if codec.len() > MAX_CODEC_NAME_LEN || !codec.is_ascii() {
        return Err(PilumError::invalid_argument(format!(
            "codec name must be ASCII and at most {MAX_CODEC_NAME_LEN} bytes: {codec:?}"
        )));
    }
    out.write_u32(CODEC_MAGIC)?;
    out.write_string(codec)?;
    out.write_u32(version)
}

/// Write an index header: a plain header followed by the segment id and the
/// file suffix.
pub fn write_index_header<W: StorageOutput>(
    out: &mut StructWriter<W>,
    codec: &str,
    version: u32,
    id: &[u8; ID_LENGTH],
    suffix: &str,
) -> Result<()> {
    if suffix.len() > MAX_SUFFIX_LEN {
        return Err(PilumError::invalid_argument(format!(
            "suffix longer than {MAX_SUFFIX_LEN} bytes: {suffix:?}"
        )));
    }
    write_header(out, codec, version)?;
    out.write_raw(id)?;
    out.write_u8(suffix.len() as u8)?;
    out.write_raw(suffix.as_bytes())
}

/// Write the footer. Must be the last thing written to the file.
pub fn write_footer<W: StorageOutput>(out: &mut StructWriter<W>) -> Result<()> {
    out.write_u32(FOOTER_MAGIC)?;
    out.write_u32(CRC32_ALGORITHM)?;
    let checksum = out.checksum();
    out.write_u64(checksum as u64)
}

/// Length of the header written by [`write_header`] for `codec`.
pub fn header_length(codec: &str) -> u64 {
    (4 + varint::encoded_len(codec.len() as u64) + codec.len() + 4) as u64
}

/// Length of the header written by [`write_index_header`].
pub fn index_header_length(codec: &str, suffix: &str) -> u64 {
    header_length(codec) + ID_LENGTH as u64 + 1 + suffix.len() as u64
}

/// Validate a plain header and return its version.
pub fn check_header<R: StorageInput>(
    input: &mut StructReader<R>,
    codec: &str,
    min_version: u32,
    max_version: u32,
) -> Result<u32> {
    let magic = input.read_u32()?;
    if magic != CODEC_MAGIC {
        return Err(PilumError::corruption(format!(
            "codec header mismatch: expected magic {CODEC_MAGIC:#010x}, got {magic:#010x}"
        )));
    }
    let actual = input.read_string()?;
    if actual != codec {
        return Err(PilumError::corruption(format!(
            "codec mismatch: expected {codec:?}, got {actual:?}"
        )));
    }
    let version = input.read_u32()?;
    if version < min_version || version > max_version {
        return Err(PilumError::corruption(format!(
            "unsupported {codec} version {version}, expected [{min_version}, {max_version}]"
        )));
    }
    Ok(version)
}

/// Validate an index header and return its version.
pub fn check_index_header<R: StorageInput>(
    input: &mut StructReader<R>,
    codec: &str,
    min_version: u32,
    max_version: u32,
    id: &[u8; ID_LENGTH],
    suffix: &str,
) -> Result<u32> {
    let version = check_header(input, codec, min_version, max_version)?;

    let mut actual_id = [0u8; ID_LENGTH];
    input.read_raw_into(&mut actual_id)?;
    if &actual_id != id {
        return Err(PilumError::corruption(format!(
            "segment id mismatch: expected {}, got {}",
            id_to_string(id),
            id_to_string(&actual_id)
        )));
    }

    let suffix_len = input.read_u8()? as usize;
    if suffix_len as u64 > input.remaining() {
        return Err(PilumError::corruption(format!(
            "file suffix of {suffix_len} bytes exceeds the {} bytes remaining",
            input.remaining()
        )));
    }
    let actual_suffix = input.read_raw(suffix_len)?;
    if actual_suffix != suffix.as_bytes() {
        return Err(PilumError::corruption(format!(
            "file suffix mismatch: expected {suffix:?}, got {:?}",
            String::from_utf8_lossy(&actual_suffix)
        )));
    }

    Ok(version)
}

/// Validate the footer of a sequentially read file.
///
/// The reader must be positioned exactly at the start of the footer and must
/// have read every preceding byte, so its running checksum covers them.
pub fn check_footer<R: StorageInput>(input: &mut StructReader<R>) -> Result<u64> {
    let remaining = input.remaining();
    if remaining != FOOTER_LENGTH {
        return Err(PilumError::corruption(format!(
            "expected footer at position {}, but {remaining} bytes remain",
            input.position()
        )));
    }

    let magic = input.read_u32()?;
    let algorithm = input.read_u32()?;
    validate_footer_fields(magic, algorithm)?;

    let expected = input.checksum() as u64;
    let actual = input.read_u64()?;
    validate_checksum_value(actual)?;
    if actual != expected {
        return Err(PilumError::corruption(format!(
            "checksum failed: expected {expected:#010x}, stored {actual:#010x}"
        )));
    }
    Ok(actual)
}

/// Stream the whole file through CRC-32 and validate the footer.
///
/// Works on a clone of `input`, so the caller's position is untouched.
/// Returns the verified checksum.
pub fn checksum_entire_file(input: &dyn StorageInput) -> Result<u64> {
    let mut input = input.clone_input()?;
    let size = input.size()?;
    if size < FOOTER_LENGTH {
        return Err(PilumError::corruption(format!(
            "file of {size} bytes is too short to contain a footer"
        )));
    }

    input.seek(SeekFrom::Start(0))?;
    let mut hasher = Hasher::new();
    let mut remaining = size - 8;
    let mut buffer = vec![0u8; CHECKSUM_BUFFER_SIZE];
    while remaining > 0 {
        let n = remaining.min(CHECKSUM_BUFFER_SIZE as u64) as usize;
        input.read_exact(&mut buffer[..n])?;
        hasher.update(&buffer[..n]);
        remaining -= n as u64;
    }
    let expected = hasher.finalize() as u64;

    let (magic, algorithm, actual) = read_footer_fields(input.as_mut(), size)?;
    validate_footer_fields(magic, algorithm)?;
    validate_checksum_value(actual)?;
    if actual != expected {
        return Err(PilumError::corruption(format!(
            "checksum failed: expected {expected:#010x}, stored {actual:#010x}"
        )));
    }
    Ok(actual)
}

/// Read the stored checksum after validating the footer structure only.
pub fn retrieve_checksum(input: &dyn StorageInput) -> Result<u64> {
    let mut input = input.clone_input()?;
    let size = input.size()?;
    if size < FOOTER_LENGTH {
        return Err(PilumError::corruption(format!(
            "file of {size} bytes is too short to contain a footer"
        )));
    }
    let (magic, algorithm, checksum) = read_footer_fields(input.as_mut(), size)?;
    validate_footer_fields(magic, algorithm)?;
    validate_checksum_value(checksum)?;
    Ok(checksum)
}

fn read_footer_fields(input: &mut dyn StorageInput, size: u64) -> Result<(u32, u32, u64)> {
    input.seek(SeekFrom::Start(size - FOOTER_LENGTH))?;
    let magic = input.read_u32::<LittleEndian>()?;
    let algorithm = input.read_u32::<LittleEndian>()?;
    let checksum = input.read_u64::<LittleEndian>()?;
    Ok((magic, algorithm, checksum))
}

fn validate_footer_fields(magic: u32, algorithm: u32) -> Result<()> {
    if magic != FOOTER_MAGIC {
        return Err(PilumError::corruption(format!(
            "codec footer mismatch: expected magic {FOOTER_MAGIC:#010x}, got {magic:#010x}"
        )));
    }
    if algorithm != CRC32_ALGORITHM {
        return Err(PilumError::corruption(format!(
            "unknown checksum algorithm {algorithm}"
        )));
    }
    Ok(())
}

fn validate_checksum_value(checksum: u64) -> Result<()> {
    if checksum >> 32 != 0 {
        return Err(PilumError::corruption(format!(
            "illegal checksum {checksum:#018x}: upper 32 bits are set"
        )));
    }
    Ok(())
}

/// Render a segment id as lowercase hex.
pub fn id_to_string(id: &[u8]) -> String {
    id.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use crate::storage::memory::MemoryStorage;
    use std::io::Write;

    const ID: [u8; ID_LENGTH] = [7; ID_LENGTH];

    fn write_file(storage: &MemoryStorage, name: &str, body: &[u8]) {
        let output = storage.create_output(name).unwrap();
        let mut out = StructWriter::new(output);
        write_index_header(&mut out, "TestCodec", 2, &ID, "Fmt_0").unwrap();
        out.write_raw(body).unwrap();
        write_footer(&mut out).unwrap();
        out.close().unwrap();
    }

    #[test]
    fn test_header_footer_round_trip() {
        let storage = MemoryStorage::new_default();
        write_file(&storage, "_0_Fmt_0.x", b"payload");

        let size = storage.file_size("_0_Fmt_0.x").unwrap();
        assert_eq!(
            size,
            index_header_length("TestCodec", "Fmt_0") + 7 + FOOTER_LENGTH
        );

        let input = storage.open_input("_0_Fmt_0.x").unwrap();
        let mut reader = StructReader::new(input).unwrap();
        let version = check_index_header(&mut reader, "TestCodec", 1, 3, &ID, "Fmt_0").unwrap();
        assert_eq!(version, 2);
        assert_eq!(reader.read_raw(7).unwrap(), b"payload");
        let checksum = check_footer(&mut reader).unwrap();

        let input = storage.open_input("_0_Fmt_0.x").unwrap();
        assert_eq!(checksum_entire_file(input.as_ref()).unwrap(), checksum);
        assert_eq!(retrieve_checksum(input.as_ref()).unwrap(), checksum);
        assert!(checksum >> 32 == 0);
    }

    #[test]
    fn test_header_mismatches_are_corruption() {
        let storage = MemoryStorage::new_default();
        write_file(&storage, "_0.x", b"");

        let check = |codec: &str, min: u32, max: u32, id: &[u8; ID_LENGTH], suffix: &str| {
            let input = storage.open_input("_0.x").unwrap();
            let mut reader = StructReader::new(input).unwrap();
            check_index_header(&mut reader, codec, min, max, id, suffix).unwrap_err()
        };

        assert!(check("Other", 1, 3, &ID, "Fmt_0").is_corruption());
        assert!(check("TestCodec", 3, 4, &ID, "Fmt_0").is_corruption());
        assert!(check("TestCodec", 1, 3, &[0; ID_LENGTH], "Fmt_0").is_corruption());
        assert!(check("TestCodec", 1, 3, &ID, "Fmt_1").is_corruption());
    }

    #[test]
    fn test_corrupt_suffix_length_is_corruption() {
        let storage = MemoryStorage::new_default();
        write_file(&storage, "_0_Fmt_0.x", b"");
        let pristine = crate::storage::read_all(&storage, "_0_Fmt_0.x").unwrap();
        let suffix_len_at = (index_header_length("TestCodec", "Fmt_0") - 6) as usize;
        assert_eq!(pristine[suffix_len_at], 5);

        for corrupt in [0xFF, 0x06, 0x00] {
            let mut bytes = pristine.clone();
            bytes[suffix_len_at] = corrupt;
            storage.overwrite_file("_0_Fmt_0.x", bytes).unwrap();
            let input = storage.open_input("_0_Fmt_0.x").unwrap();
            let mut reader = StructReader::new(input).unwrap();
            let err = check_index_header(&mut reader, "TestCodec", 1, 3, &ID, "Fmt_0").unwrap_err();
            assert!(err.is_corruption(), "suffix length {corrupt}: {err}");
        }
    }

    #[test]
    fn test_truncated_header_is_corruption() {
        let storage = MemoryStorage::new_default();
        write_file(&storage, "_0_Fmt_0.x", b"");
        let pristine = crate::storage::read_all(&storage, "_0_Fmt_0.x").unwrap();
        let header_len = index_header_length("TestCodec", "Fmt_0") as usize;

        for len in [0, 2, 5, 20, header_len - 1] {
            storage.overwrite_file("_0_Fmt_0.x", pristine[..len].to_vec()).unwrap();
            let input = storage.open_input("_0_Fmt_0.x").unwrap();
            let mut reader = StructReader::new(input).unwrap();
            let err = check_index_header(&mut reader, "TestCodec", 1, 3, &ID, "Fmt_0").unwrap_err();
            assert!(err.is_corruption(), "length {len}: {err}");
        }
    }

    #[test]
    fn test_flipping_any_checksum_byte_fails() {
        let storage = MemoryStorage::new_default();
        write_file(&storage, "_0.x", b"some bytes");
        let pristine = crate::storage::read_all(&storage, "_0.x").unwrap();
        let len = pristine.len();

        for pos in len - 8..len {
            let mut bytes = pristine.clone();
            bytes[pos] ^= 0x01;
            storage.overwrite_file("_0.x", bytes).unwrap();
            let input = storage.open_input("_0.x").unwrap();
            assert!(checksum_entire_file(input.as_ref()).unwrap_err().is_corruption());
        }
    }

    #[test]
    fn test_body_flip_and_bad_footer() {
        let storage = MemoryStorage::new_default();
        write_file(&storage, "_0.x", b"some bytes");
        let pristine = crate::storage::read_all(&storage, "_0.x").unwrap();

        let mut bytes = pristine.clone();
        bytes[30] ^= 0x80;
        storage.overwrite_file("_0.x", bytes).unwrap();
        let input = storage.open_input("_0.x").unwrap();
        assert!(checksum_entire_file(input.as_ref()).is_err());

        let mut bytes = pristine.clone();
        let len = bytes.len();
        bytes[len - 12] = 1;
        storage.overwrite_file("_0.x", bytes).unwrap();
        let input = storage.open_input("_0.x").unwrap();
        assert!(retrieve_checksum(input.as_ref()).unwrap_err().is_corruption());
    }

    #[test]
    fn test_trailing_garbage_detected_sequentially() {
        let storage = MemoryStorage::new_default();
        let output = storage.create_output("_0.x").unwrap();
        let mut out = StructWriter::new(output);
        write_header(&mut out, "TestCodec", 1).unwrap();
        out.write_u8(9).unwrap();
        write_footer(&mut out).unwrap();
        out.close().unwrap();

        let input = storage.open_input("_0.x").unwrap();
        let mut reader = StructReader::new(input).unwrap();
        check_header(&mut reader, "TestCodec", 1, 1).unwrap();
        // The extra byte was never consumed.
        assert!(check_footer(&mut reader).unwrap_err().is_corruption());
    }

    #[test]
    fn test_short_file() {
        let storage = MemoryStorage::new_default();
        let mut out = storage.create_output("_0.x").unwrap();
        out.write_all(b"tiny").unwrap();
        out.close().unwrap();

        let input = storage.open_input("_0.x").unwrap();
        assert!(checksum_entire_file(input.as_ref()).unwrap_err().is_corruption());
    }

    #[test]
    fn test_invalid_codec_name_rejected() {
        let storage = MemoryStorage::new_default();
        let output = storage.create_output("_0.x").unwrap();
        let mut out = StructWriter::new(output);
        let long = "x".repeat(200);
        assert!(write_header(&mut out, &long, 1).is_err());
        assert!(write_header(&mut out, "naïve", 1).is_err());
    }
}
