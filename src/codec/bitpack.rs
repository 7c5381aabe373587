//! Bit-packing of unsigned integers into 32-bit words.
//!
//! A block holds `N` values (1 to 128) of `b` bits each (1 to 32). It is
//! serialized as one header word, `(N - 1) | (b - 1) << 8`, followed by
//! `ceil(N * b / 32)` payload words. Value `i` occupies bits `[i*b, i*b + b)`
//! of the payload bit stream, least significant bit first; a value that
//! straddles a word boundary keeps its low bits in the first word and its high
//! bits in the next one.
//!
//! Decoding dispatches on `b` to a routine specialized per width, so the
//! shift and mask arithmetic is resolved at compile time.
//!
//! [`PackedColumn`] stores a long sequence as consecutive blocks that all use
//! the same width, which makes every value addressable in O(1).

use crate::error::{PilumError, Result};
use crate::storage::StorageInput;
use crate::storage::StorageOutput;
use crate::storage::structured::{StructReader, StructWriter};

/// Maximum number of values in one block.
pub const BLOCK_SIZE: usize = 128;

/// Maximum bit width.
pub const MAX_BITS: u32 = 32;

const RESERVED_HEADER_MASK: u32 = !0x1FFF;

/// Number of significant bits of `value`, with a minimum of 1.
#[inline]
pub fn bits_required(value: u64) -> u32 {
    (64 - value.leading_zeros()).max(1)
}

/// Number of payload words for `count` values of `bits` bits.
#[inline]
pub fn payload_words(count: usize, bits: u32) -> usize {
    (count * bits as usize).div_ceil(32)
}

/// Encode the header word of a block.
#[inline]
fn encode_header(count: usize, bits: u32) -> u32 {
    (count as u32 - 1) | ((bits - 1) << 8)
}

/// Decode a block header word into `(count, bits)`.
pub fn decode_header(word: u32) -> Result<(usize, u32)> {
    if word & RESERVED_HEADER_MASK != 0 {
        return Err(PilumError::corruption(format!(
            "bit-packed block header {word:#010x} has reserved bits set"
        )));
    }
    let count = (word & 0xFF) as usize + 1;
    let bits = ((word >> 8) & 0x1F) + 1;
    if count > BLOCK_SIZE {
        return Err(PilumError::corruption(format!(
            "bit-packed block of {count} values exceeds {BLOCK_SIZE}"
        )));
    }
    Ok((count, bits))
}

fn validate_block(count: usize, bits: u32) -> Result<()> {
    if count == 0 || count > BLOCK_SIZE {
        return Err(PilumError::consistency(format!(
            "block size must be in [1, {BLOCK_SIZE}], got {count}"
        )));
    }
    if bits == 0 || bits > MAX_BITS {
        return Err(PilumError::consistency(format!(
            "bit width must be in [1, {MAX_BITS}], got {bits}"
        )));
    }
    Ok(())
}

/// Pack `values` at `bits` bits each into a header word plus payload.
pub fn pack_block(values: &[u32], bits: u32) -> Result<Vec<u32>> {
    let mut words = Vec::with_capacity(1 + payload_words(values.len(), bits.min(MAX_BITS)));
    pack_block_into(values, bits, &mut words)?;
    Ok(words)
}

/// Like [`pack_block`], appending to `words`.
pub fn pack_block_into(values: &[u32], bits: u32, words: &mut Vec<u32>) -> Result<()> {
    validate_block(values.len(), bits)?;

    let start = words.len();
    words.push(encode_header(values.len(), bits));
    words.resize(start + 1 + payload_words(values.len(), bits), 0);
    let payload = &mut words[start + 1..];

    for (i, &value) in values.iter().enumerate() {
        if bits < 32 && value >> bits != 0 {
            return Err(PilumError::consistency(format!(
                "value {value} at index {i} does not fit in {bits} bits"
            )));
        }
        let bit = i * bits as usize;
        let word = bit / 32;
        let shift = (bit % 32) as u32;
        payload[word] |= value << shift;
        if shift + bits > 32 {
            payload[word + 1] |= value >> (32 - shift);
        }
    }
    Ok(())
}

/// Decode one block from the front of `words`.
///
/// Returns the values and the number of words consumed.
pub fn unpack_block(words: &[u32]) -> Result<(Vec<u32>, usize)> {
    let Some(&header) = words.first() else {
        return Err(PilumError::corruption("missing bit-packed block header"));
    };
    let (count, bits) = decode_header(header)?;
    let needed = payload_words(count, bits);
    if words.len() - 1 < needed {
        return Err(PilumError::corruption(format!(
            "bit-packed block needs {needed} payload words, only {} available",
            words.len() - 1
        )));
    }

    let mut values = vec![0u32; count];
    unpack_payload(&words[1..1 + needed], bits, &mut values)?;
    Ok((values, 1 + needed))
}

#[inline(always)]
fn unpack_fixed<const B: u32>(payload: &[u32], out: &mut [u32]) {
    let mask = if B == 32 { u32::MAX } else { (1u32 << B) - 1 };
    let mut bit = 0usize;
    for slot in out.iter_mut() {
        let word = bit >> 5;
        let shift = (bit & 31) as u32;
        let mut value = payload[word] >> shift;
        if shift + B > 32 {
            value |= payload[word + 1] << (32 - shift);
        }
        *slot = value & mask;
        bit += B as usize;
    }
}

macro_rules! unpack_dispatch {
    ($bits:expr, $payload:expr, $out:expr; $($width:literal)+) => {
        match $bits {
            $($width => {
                unpack_fixed::<$width>($payload, $out);
                Ok(())
            })+
            other => Err(PilumError::corruption(format!("invalid bit width {other}"))),
        }
    };
}

/// Decode `out.len()` values of `bits` bits from `payload`.
pub fn unpack_payload(payload: &[u32], bits: u32, out: &mut [u32]) -> Result<()> {
    if payload.len() < payload_words(out.len(), bits.min(MAX_BITS)) {
        return Err(PilumError::corruption("bit-packed payload is truncated"));
    }
    unpack_dispatch!(bits, payload, out;
        1 2 3 4 5 6 7 8 9 10 11 12 13 14 15 16
        17 18 19 20 21 22 23 24 25 26 27 28 29 30 31 32)
}

/// Random access to value `index` of a payload packed at `bits` bits.
#[inline]
pub fn read_value(payload: &[u32], bits: u32, index: usize) -> u32 {
    let bit = index * bits as usize;
    let word = bit / 32;
    let shift = (bit % 32) as u32;
    let mut value = payload[word] >> shift;
    if shift + bits > 32 {
        value |= payload[word + 1] << (32 - shift);
    }
    if bits == 32 {
        value
    } else {
        value & ((1u32 << bits) - 1)
    }
}

/// Byte length of a packed column of `count` values at `bits` bits.
pub fn packed_column_len(count: usize, bits: u32) -> u64 {
    let full_blocks = count / BLOCK_SIZE;
    let tail = count % BLOCK_SIZE;
    let mut words = full_blocks * (1 + payload_words(BLOCK_SIZE, bits));
    if tail > 0 {
        words += 1 + payload_words(tail, bits);
    }
    1 + 4 * words as u64
}

/// Streams values into a packed column.
///
/// Writes the width byte up front, then one block per 128 values.
pub struct PackedColumnWriter<'a, W: StorageOutput> {
    out: &'a mut StructWriter<W>,
    bits: u32,
    pending: Vec<u32>,
    words: Vec<u32>,
    count: usize,
}

impl<'a, W: StorageOutput> PackedColumnWriter<'a, W> {
    /// Start a column of `bits`-bit values.
    pub fn new(out: &'a mut StructWriter<W>, bits: u32) -> Result<Self> {
        validate_block(1, bits)?;
        out.write_u8(bits as u8)?;
        Ok(PackedColumnWriter {
            out,
            bits,
            pending: Vec::with_capacity(BLOCK_SIZE),
            words: Vec::with_capacity(1 + payload_words(BLOCK_SIZE, bits)),
            count: 0,
        })
    }

    /// Append one value.
    pub fn add(&mut self, value: u64) -> Result<()> {
        let value = u32::try_from(value)
            .ok()
            .filter(|v| self.bits == 32 || v >> self.bits == 0)
            .ok_or_else(|| {
                PilumError::consistency(format!(
                    "value {value} does not fit in {} bits",
                    self.bits
                ))
            })?;
        self.pending.push(value);
        self.count += 1;
        if self.pending.len() == BLOCK_SIZE {
            self.flush_block()?;
        }
        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        self.words.clear();
        pack_block_into(&self.pending, self.bits, &mut self.words)?;
        self.out.write_u32_words(&self.words)?;
        self.pending.clear();
        Ok(())
    }

    /// Flush the final partial block. Returns the number of values written.
    pub fn finish(mut self) -> Result<usize> {
        if !self.pending.is_empty() {
            self.flush_block()?;
        }
        Ok(self.count)
    }
}

/// Write `values` as a packed column at the minimal width for their maximum.
///
/// Returns the width used.
pub fn write_packed_column<W: StorageOutput>(
    out: &mut StructWriter<W>,
    values: &[u64],
) -> Result<u32> {
    let max = values.iter().copied().max().unwrap_or(0);
    let bits = bits_required(max);
    let mut writer = PackedColumnWriter::new(out, bits)?;
    for &value in values {
        writer.add(value)?;
    }
    writer.finish()?;
    Ok(bits)
}

/// A packed column held in memory.
#[derive(Debug, Clone)]
pub struct PackedColumn {
    bits: u32,
    count: usize,
    words: Vec<u32>,
}

impl PackedColumn {
    /// Read a column of `count` values, validating every block header.
    pub fn load<R: StorageInput>(input: &mut StructReader<R>, count: usize) -> Result<Self> {
        let bits = input.read_u8()? as u32;
        if bits == 0 || bits > MAX_BITS {
            return Err(PilumError::corruption(format!(
                "packed column has invalid bit width {bits}"
            )));
        }
        let word_count = ((packed_column_len(count, bits) - 1) / 4) as usize;
        let words = input.read_u32_words(word_count)?;

        let block_words = 1 + payload_words(BLOCK_SIZE, bits);
        let mut remaining = count;
        let mut offset = 0;
        while remaining > 0 {
            let expected = remaining.min(BLOCK_SIZE);
            let (block_count, block_bits) = decode_header(words[offset])?;
            if block_count != expected || block_bits != bits {
                return Err(PilumError::corruption(format!(
                    "packed column block at word {offset} has ({block_count}, {block_bits}), \
                     expected ({expected}, {bits})"
                )));
            }
            offset += block_words;
            remaining -= expected;
        }

        Ok(PackedColumn { bits, count, words })
    }

    /// Bit width of every value.
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the column is empty.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Value at `index`. Panics if `index >= len()`.
    #[inline]
    pub fn get(&self, index: usize) -> u64 {
        debug_assert!(index < self.count);
        let block_words = 1 + payload_words(BLOCK_SIZE, self.bits);
        let base = (index / BLOCK_SIZE) * block_words + 1;
        read_value(&self.words[base..], self.bits, index % BLOCK_SIZE) as u64
    }

    /// Iterate over all values in order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.count).map(move |i| self.get(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use crate::storage::memory::MemoryStorage;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_values(rng: &mut StdRng, count: usize, bits: u32) -> Vec<u32> {
        (0..count)
            .map(|_| {
                let v: u32 = rng.random();
                if bits == 32 { v } else { v & ((1 << bits) - 1) }
            })
            .collect()
    }

    #[test]
    fn test_round_trip_every_width_and_block_size() {
        let mut rng = StdRng::seed_from_u64(42);
        for bits in 1..=32 {
            for count in [1usize, 2, 127, 128] {
                let mut values = random_values(&mut rng, count, bits);
                // Always include the largest representable value.
                values[0] = if bits == 32 { u32::MAX } else { (1 << bits) - 1 };

                let words = pack_block(&values, bits).unwrap();
                assert_eq!(words.len(), 1 + payload_words(count, bits));

                let (decoded, consumed) = unpack_block(&words).unwrap();
                assert_eq!(decoded, values, "bits={bits} count={count}");
                assert_eq!(consumed, words.len());

                for (i, &v) in values.iter().enumerate() {
                    assert_eq!(read_value(&words[1..], bits, i), v);
                }
            }
        }
    }

    #[test]
    fn test_header_layout() {
        let words = pack_block(&[1, 2, 3], 5).unwrap();
        assert_eq!(words[0], 2 | (4 << 8));
        // 1 | 2 << 5 | 3 << 10
        assert_eq!(words[1], 1 | (2 << 5) | (3 << 10));
    }

    #[test]
    fn test_straddling_value() {
        // The third 12-bit value spans bits 24..36.
        let values = [0, 0, 0xABC];
        let words = pack_block(&values, 12).unwrap();
        assert_eq!(words[1] >> 24, 0xBC);
        assert_eq!(words[2], 0xA);
        assert_eq!(unpack_block(&words).unwrap().0, values);
    }

    #[test]
    fn test_bits_required() {
        assert_eq!(bits_required(0), 1);
        assert_eq!(bits_required(1), 1);
        assert_eq!(bits_required(2), 2);
        assert_eq!(bits_required(255), 8);
        assert_eq!(bits_required(256), 9);
        assert_eq!(bits_required(u32::MAX as u64), 32);
        assert_eq!(bits_required(u64::MAX), 64);
    }

    #[test]
    fn test_encode_errors_are_consistency() {
        assert!(pack_block(&[], 4).is_err());
        assert!(pack_block(&[0; 129], 4).is_err());
        assert!(pack_block(&[1], 0).is_err());
        assert!(pack_block(&[1], 33).is_err());
        let err = pack_block(&[16], 4).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Consistency);
    }

    #[test]
    fn test_decode_errors_are_corruption() {
        assert!(unpack_block(&[]).unwrap_err().is_corruption());
        assert!(unpack_block(&[1 << 20, 0]).unwrap_err().is_corruption());

        let mut words = pack_block(&[7; 100], 3).unwrap();
        words.pop();
        assert!(unpack_block(&words).unwrap_err().is_corruption());
    }

    #[test]
    fn test_packed_column_random_access() {
        let storage = MemoryStorage::new_default();
        let values: Vec<u64> = (0..1000u64).map(|i| (i * 7919) % 5000).collect();

        let output = storage.create_output("_0.col").unwrap();
        let mut out = StructWriter::new(output);
        let bits = write_packed_column(&mut out, &values).unwrap();
        assert_eq!(bits, bits_required(4999));
        assert_eq!(out.position(), packed_column_len(values.len(), bits));
        out.close().unwrap();

        let input = storage.open_input("_0.col").unwrap();
        let mut reader = StructReader::new(input).unwrap();
        let column = PackedColumn::load(&mut reader, values.len()).unwrap();
        assert_eq!(column.len(), 1000);
        assert_eq!(column.get(999), values[999]);
        assert_eq!(column.get(128), values[128]);
        assert_eq!(column.iter().collect::<Vec<_>>(), values);
    }

    #[test]
    fn test_empty_packed_column() {
        let storage = MemoryStorage::new_default();
        let output = storage.create_output("_0.col").unwrap();
        let mut out = StructWriter::new(output);
        assert_eq!(write_packed_column(&mut out, &[]).unwrap(), 1);
        assert_eq!(out.position(), 1);
        out.close().unwrap();

        let input = storage.open_input("_0.col").unwrap();
        let mut reader = StructReader::new(input).unwrap();
        let column = PackedColumn::load(&mut reader, 0).unwrap();
        assert!(column.is_empty());
    }

    #[test]
    fn test_packed_column_rejects_wrong_count() {
        let storage = MemoryStorage::new_default();
        let output = storage.create_output("_0.col").unwrap();
        let mut out = StructWriter::new(output);
        write_packed_column(&mut out, &[1, 2, 3, 4]).unwrap();
        out.close().unwrap();

        let input = storage.open_input("_0.col").unwrap();
        let mut reader = StructReader::new(input).unwrap();
        assert!(PackedColumn::load(&mut reader, 3).unwrap_err().is_corruption());
    }
}
