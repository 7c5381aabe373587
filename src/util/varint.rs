//! Variable-length integer encoding utilities.
//!
//! Seven data bits per byte, low group first, with the high bit of every byte
//! except the last set as a continuation flag. This is the VInt encoding used
//! by every Pilum file format for counts, lengths and field numbers.

use std::io::{Read, Write};

use byteorder::ReadBytesExt;

use crate::error::{PilumError, Result};

/// Maximum number of bytes a u32 VInt may occupy.
pub const MAX_VINT32_LEN: usize = 5;

/// Maximum number of bytes a u64 VInt may occupy.
pub const MAX_VINT64_LEN: usize = 10;

/// Encode a u32 value using variable-length encoding.
pub fn encode_u32(value: u32) -> Vec<u8> {
    encode_u64(value as u64)
}

/// Decode a u32 value from variable-length encoding.
///
/// Returns the value and the number of bytes consumed.
pub fn decode_u32(bytes: &[u8]) -> Result<(u32, usize)> {
    let (value, read) = decode_u64(bytes)?;
    if read > MAX_VINT32_LEN || value > u32::MAX as u64 {
        return Err(PilumError::corruption("VInt overflows u32"));
    }
    Ok((value as u32, read))
}

/// Encode a u64 value using variable-length encoding.
pub fn encode_u64(value: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(MAX_VINT64_LEN);
    let mut val = value;

    loop {
        let mut byte = (val & 0x7F) as u8;
        val >>= 7;

        if val != 0 {
            byte |= 0x80;
        }

        bytes.push(byte);

        if val == 0 {
            break;
        }
    }

    bytes
}

/// Decode a u64 value from variable-length encoding.
pub fn decode_u64(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0;
    let mut bytes_read = 0;

    for &byte in bytes {
        bytes_read += 1;

        if shift >= 64 || (shift == 63 && (byte & 0x7F) > 1) {
            return Err(PilumError::corruption("VInt overflows u64"));
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok((result, bytes_read));
        }

        shift += 7;
    }

    Err(PilumError::corruption("Incomplete VInt"))
}

/// Number of bytes `value` occupies once encoded.
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

/// Write a variable-length encoded u64 to a writer.
pub fn write_u64<W: Write + ?Sized>(writer: &mut W, value: u64) -> Result<usize> {
    let bytes = encode_u64(value);
    writer.write_all(&bytes)?;
    Ok(bytes.len())
}

/// Read a variable-length encoded u64 from a reader.
///
/// Returns the value together with the raw bytes consumed, so callers that
/// maintain a running checksum can feed them through it.
pub fn read_u64<R: Read + ?Sized>(reader: &mut R) -> Result<(u64, Vec<u8>)> {
    let mut raw = Vec::with_capacity(2);
    loop {
        let byte = reader.read_u8()?;
        raw.push(byte);
        if byte & 0x80 == 0 {
            break;
        }
        if raw.len() >= MAX_VINT64_LEN {
            return Err(PilumError::corruption("VInt is longer than 10 bytes"));
        }
    }
    let (value, _) = decode_u64(&raw)?;
    Ok((value, raw))
}
