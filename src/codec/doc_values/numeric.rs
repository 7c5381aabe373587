//! Numeric column encoding: delta, table or raw.

use std::collections::BTreeSet;

use crate::codec::bitpack::{self, PackedColumn, PackedColumnWriter};
use crate::codec::doc_values::NumericDocValues;
use crate::error::{PilumError, Result};
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{StorageInput, StorageOutput};

/// Physical encoding of a numeric column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericMode {
    /// `value - min`, bit-packed.
    Delta,
    /// Ordinals into a sorted table of distinct values, bit-packed.
    Table,
    /// Plain little-endian `i64`s.
    Raw,
}

impl NumericMode {
    pub fn code(self) -> u8 {
        match self {
            NumericMode::Delta => 0,
            NumericMode::Table => 1,
            NumericMode::Raw => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(NumericMode::Delta),
            1 => Ok(NumericMode::Table),
            2 => Ok(NumericMode::Raw),
            other => Err(PilumError::corruption(format!(
                "unknown numeric encoding {other}"
            ))),
        }
    }
}

/// Statistics gathered over a column before choosing its encoding.
#[derive(Debug, Clone)]
pub struct NumericStats {
    pub count: usize,
    pub min: i64,
    pub max: i64,
    /// Distinct values, or `None` once more than the table limit were seen.
    pub distinct: Option<BTreeSet<i64>>,
}

impl NumericStats {
    /// Scan `values`, tracking distinct values up to `max_table_cardinality`.
    pub fn collect(values: &[i64], max_table_cardinality: usize) -> Self {
        let mut min = i64::MAX;
        let mut max = i64::MIN;
        let mut distinct = Some(BTreeSet::new());

        for &value in values {
            min = min.min(value);
            max = max.max(value);
            if let Some(set) = distinct.as_mut() {
                set.insert(value);
                if set.len() > max_table_cardinality {
                    distinct = None;
                }
            }
        }

        if values.is_empty() {
            min = 0;
            max = 0;
        }

        NumericStats {
            count: values.len(),
            min,
            max,
            distinct,
        }
    }

    /// `max - min`, or `None` if the subtraction overflows.
    pub fn delta(&self) -> Option<u64> {
        self.max.checked_sub(self.min).map(|d| d as u64)
    }

    /// Width needed by the delta encoding, if the range does not overflow.
    pub fn delta_bits(&self) -> Option<u32> {
        self.delta().map(bitpack::bits_required)
    }

    /// Width needed by the table encoding, if the column is tableizable.
    pub fn table_bits(&self) -> Option<u32> {
        self.distinct
            .as_ref()
            .map(|set| bitpack::bits_required(set.len().saturating_sub(1) as u64))
    }

    /// Choose the encoding with the smallest per-value width.
    pub fn choose_mode(&self) -> NumericMode {
        if self.count == 0 {
            return NumericMode::Delta;
        }
        let delta_bits = self.delta_bits();
        if let Some(table_bits) = self.table_bits() {
            match delta_bits {
                None => return NumericMode::Table,
                Some(delta_bits) if table_bits < delta_bits => return NumericMode::Table,
                _ => {}
            }
        }
        match delta_bits {
            None => NumericMode::Raw,
            Some(bits) if bits > bitpack::MAX_BITS => NumericMode::Raw,
            Some(_) => NumericMode::Delta,
        }
    }
}

/// Location and encoding of a numeric column in the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumericEntry {
    pub mode: NumericMode,
    pub offset: u64,
    pub count: u32,
    pub length: u64,
}

impl NumericEntry {
    pub fn write_to<W: StorageOutput>(&self, meta: &mut StructWriter<W>) -> Result<()> {
        meta.write_u8(self.mode.code())?;
        meta.write_u64(self.offset)?;
        meta.write_varint(self.count as u64)?;
        meta.write_u64(self.length)
    }

    pub fn read_from<R: StorageInput>(meta: &mut StructReader<R>) -> Result<Self> {
        let mode = NumericMode::from_code(meta.read_u8()?)?;
        let offset = meta.read_u64()?;
        let count = meta.read_varint_u32()?;
        let length = meta.read_u64()?;
        Ok(NumericEntry {
            mode,
            offset,
            count,
            length,
        })
    }

    /// End of the column in the data file.
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.length)
    }
}

/// Encode `values` at the current position of `data`.
pub fn write_numeric<W: StorageOutput>(
    data: &mut StructWriter<W>,
    values: &[i64],
    max_table_cardinality: usize,
) -> Result<NumericEntry> {
    let count = u32::try_from(values.len()).map_err(|_| {
        PilumError::consistency(format!("numeric column of {} values is too long", values.len()))
    })?;
    let stats = NumericStats::collect(values, max_table_cardinality);
    let mode = stats.choose_mode();
    let offset = data.position();

    match mode {
        NumericMode::Delta => {
            let min = stats.min;
            data.write_i64(min)?;
            let bits = stats.delta_bits().unwrap_or(1);
            let mut column = PackedColumnWriter::new(data, bits)?;
            for &value in values {
                // The range was checked, so this cannot wrap.
                column.add(value.wrapping_sub(min) as u64)?;
            }
            column.finish()?;
        }
        NumericMode::Table => {
            let table: Vec<i64> = stats
                .distinct
                .as_ref()
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default();
            data.write_varint(table.len() as u64)?;
            for &value in &table {
                data.write_i64(value)?;
            }
            let bits = stats.table_bits().unwrap_or(1);
            let mut column = PackedColumnWriter::new(data, bits)?;
            for value in values {
                let ord = table.binary_search(value).map_err(|_| {
                    PilumError::consistency(format!("value {value} missing from numeric table"))
                })?;
                column.add(ord as u64)?;
            }
            column.finish()?;
        }
        NumericMode::Raw => {
            for &value in values {
                data.write_i64(value)?;
            }
        }
    }

    log::trace!(
        "numeric column: {count} values, min={}, max={}, mode={mode:?}",
        stats.min,
        stats.max
    );

    Ok(NumericEntry {
        mode,
        offset,
        count,
        length: data.position() - offset,
    })
}

/// A numeric column decoded into memory.
#[derive(Debug, Clone)]
pub enum LoadedNumeric {
    Delta { min: i64, deltas: PackedColumn },
    Table { table: Vec<i64>, ords: PackedColumn },
    Raw(Vec<i64>),
}

impl LoadedNumeric {
    /// Decode the column described by `entry`.
    ///
    /// `data` is positioned at the entry offset on return from a seek; the
    /// column must consume exactly `entry.length` bytes.
    pub fn load<R: StorageInput>(data: &mut StructReader<R>, entry: &NumericEntry) -> Result<Self> {
        data.seek(entry.offset)?;
        let count = entry.count as usize;

        let loaded = match entry.mode {
            NumericMode::Delta => {
                let min = data.read_i64()?;
                let deltas = PackedColumn::load(data, count)?;
                LoadedNumeric::Delta { min, deltas }
            }
            NumericMode::Table => {
                let size = data.read_varint()?;
                if size as usize * 8 > data.remaining() as usize {
                    return Err(PilumError::corruption(format!(
                        "numeric table of {size} values exceeds the data file"
                    )));
                }
                let mut table = Vec::with_capacity(size as usize);
                for _ in 0..size {
                    table.push(data.read_i64()?);
                }
                let ords = PackedColumn::load(data, count)?;
                if let Some(bad) = ords.iter().find(|&ord| ord >= size) {
                    return Err(PilumError::corruption(format!(
                        "numeric table ordinal {bad} out of range [0, {size})"
                    )));
                }
                LoadedNumeric::Table { table, ords }
            }
            NumericMode::Raw => {
                if count as u64 * 8 > data.remaining() {
                    return Err(PilumError::corruption(format!(
                        "raw numeric column of {count} values exceeds the data file"
                    )));
                }
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(data.read_i64()?);
                }
                LoadedNumeric::Raw(values)
            }
        };

        let consumed = data.position() - entry.offset;
        if consumed != entry.length {
            return Err(PilumError::corruption(format!(
                "numeric column decoded {consumed} bytes, metadata says {}",
                entry.length
            )));
        }
        Ok(loaded)
    }

    /// Encoding of the column.
    pub fn mode(&self) -> NumericMode {
        match self {
            LoadedNumeric::Delta { .. } => NumericMode::Delta,
            LoadedNumeric::Table { .. } => NumericMode::Table,
            LoadedNumeric::Raw(_) => NumericMode::Raw,
        }
    }

    /// Number of values.
    pub fn count(&self) -> usize {
        match self {
            LoadedNumeric::Delta { deltas, .. } => deltas.len(),
            LoadedNumeric::Table { ords, .. } => ords.len(),
            LoadedNumeric::Raw(values) => values.len(),
        }
    }

    /// Value at `index`. Panics if out of range.
    #[inline]
    pub fn value(&self, index: usize) -> i64 {
        match self {
            LoadedNumeric::Delta { min, deltas } => min.wrapping_add(deltas.get(index) as i64),
            LoadedNumeric::Table { table, ords } => table[ords.get(index) as usize],
            LoadedNumeric::Raw(values) => values[index],
        }
    }
}

impl NumericDocValues for LoadedNumeric {
    fn get(&self, doc: u32) -> Result<i64> {
        if doc as usize >= self.count() {
            return Err(PilumError::invalid_argument(format!(
                "doc {doc} out of range [0, {})",
                self.count()
            )));
        }
        Ok(self.value(doc as usize))
    }

    fn len(&self) -> u32 {
        self.count() as u32
    }
}
