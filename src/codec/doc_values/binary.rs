//! Binary column encoding: fixed-width or variable-width with an address
//! table.

use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::codec::bitpack::{self, PackedColumn};
use crate::codec::doc_values::BinaryDocValues;
use crate::error::{PilumError, Result};
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{StorageInput, StorageOutput};

/// Physical layout of a binary column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryMode {
    /// Every value has the same length.
    Fixed,
    /// Values are addressed through a table of cumulative end offsets.
    Variable,
}

impl BinaryMode {
    pub fn code(self) -> u8 {
        match self {
            BinaryMode::Fixed => 0,
            BinaryMode::Variable => 1,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(BinaryMode::Fixed),
            1 => Ok(BinaryMode::Variable),
            other => Err(PilumError::corruption(format!(
                "unknown binary encoding {other}"
            ))),
        }
    }
}

/// Location and layout of a binary column in the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryEntry {
    pub mode: BinaryMode,
    pub offset: u64,
    pub count: u32,
    pub min_length: u32,
    pub max_length: u32,
    pub total_bytes: u64,
    /// Start of the address table, for variable-width columns.
    pub addresses_offset: Option<u64>,
}

impl BinaryEntry {
    pub fn write_to<W: StorageOutput>(&self, meta: &mut StructWriter<W>) -> Result<()> {
        meta.write_u8(self.mode.code())?;
        meta.write_u64(self.offset)?;
        meta.write_varint(self.count as u64)?;
        meta.write_varint(self.min_length as u64)?;
        meta.write_varint(self.max_length as u64)?;
        meta.write_u64(self.total_bytes)?;
        if let Some(addresses_offset) = self.addresses_offset {
            meta.write_u64(addresses_offset)?;
        }
        Ok(())
    }

    pub fn read_from<R: StorageInput>(meta: &mut StructReader<R>) -> Result<Self> {
        let mode = BinaryMode::from_code(meta.read_u8()?)?;
        let offset = meta.read_u64()?;
        let count = meta.read_varint_u32()?;
        let min_length = meta.read_varint_u32()?;
        let max_length = meta.read_varint_u32()?;
        let total_bytes = meta.read_u64()?;
        let addresses_offset = match mode {
            BinaryMode::Fixed => None,
            BinaryMode::Variable => Some(meta.read_u64()?),
        };

        let entry = BinaryEntry {
            mode,
            offset,
            count,
            min_length,
            max_length,
            total_bytes,
            addresses_offset,
        };
        entry.validate()?;
        Ok(entry)
    }

    fn validate(&self) -> Result<()> {
        if self.min_length > self.max_length {
            return Err(PilumError::corruption(format!(
                "binary entry min length {} exceeds max length {}",
                self.min_length, self.max_length
            )));
        }
        if self.mode == BinaryMode::Fixed
            && self.total_bytes != self.count as u64 * self.max_length as u64
        {
            return Err(PilumError::corruption(format!(
                "fixed binary entry of {} x {} bytes claims {} bytes",
                self.count, self.max_length, self.total_bytes
            )));
        }
        if self.mode == BinaryMode::Variable && self.total_bytes > u32::MAX as u64 {
            return Err(PilumError::corruption(format!(
                "variable binary entry of {} bytes exceeds the address range",
                self.total_bytes
            )));
        }
        Ok(())
    }

    /// Length of the fixed-width values.
    pub fn fixed_length(&self) -> u32 {
        self.max_length
    }

    /// Check that the column lies within `[start, end)` of the data file.
    pub fn check_bounds(&self, start: u64, end: u64) -> Result<()> {
        let data_end = self.offset.checked_add(self.total_bytes);
        let in_bounds = match (data_end, self.addresses_offset) {
            (None, _) => false,
            (Some(data_end), None) => self.offset >= start && data_end <= end,
            (Some(data_end), Some(addresses_offset)) => {
                self.offset >= start && data_end <= addresses_offset && addresses_offset < end
            }
        };
        if in_bounds {
            Ok(())
        } else {
            Err(PilumError::corruption(format!(
                "binary entry at {} ({} bytes) lies outside the data region [{start}, {end})",
                self.offset, self.total_bytes
            )))
        }
    }
}

/// Write `values` back to back at the current position of `data`, followed
/// by an address table if their lengths differ.
pub fn write_binary<W: StorageOutput>(
    data: &mut StructWriter<W>,
    values: &[Vec<u8>],
) -> Result<BinaryEntry> {
    let count = u32::try_from(values.len()).map_err(|_| {
        PilumError::consistency(format!("binary column of {} values is too long", values.len()))
    })?;

    let offset = data.position();
    let mut min_length = u32::MAX;
    let mut max_length = 0u32;
    let mut total_bytes = 0u64;

    for value in values {
        let len = u32::try_from(value.len()).map_err(|_| {
            PilumError::consistency(format!("binary value of {} bytes is too long", value.len()))
        })?;
        min_length = min_length.min(len);
        max_length = max_length.max(len);
        total_bytes += len as u64;
        data.write_raw(value)?;
    }
    if values.is_empty() {
        min_length = 0;
    }

    let mode = if min_length == max_length {
        BinaryMode::Fixed
    } else {
        BinaryMode::Variable
    };

    let addresses_offset = if mode == BinaryMode::Variable {
        if total_bytes > u32::MAX as u64 {
            return Err(PilumError::consistency(format!(
                "variable binary column of {total_bytes} bytes exceeds {} bytes",
                u32::MAX
            )));
        }
        let addresses_offset = data.position();
        let mut end = 0u64;
        let addresses: Vec<u64> = values
            .iter()
            .map(|v| {
                end += v.len() as u64;
                end
            })
            .collect();
        bitpack::write_packed_column(data, &addresses)?;
        Some(addresses_offset)
    } else {
        None
    };

    log::trace!(
        "binary column: {count} values, lengths [{min_length}, {max_length}], mode={mode:?}"
    );

    Ok(BinaryEntry {
        mode,
        offset,
        count,
        min_length,
        max_length,
        total_bytes,
        addresses_offset,
    })
}

/// Load and validate the address table of a variable-width column, which
/// must end before `data_end`.
pub fn load_addresses<R: StorageInput>(
    data: &mut StructReader<R>,
    entry: &BinaryEntry,
    data_end: u64,
) -> Result<PackedColumn> {
    let Some(addresses_offset) = entry.addresses_offset else {
        return Err(PilumError::consistency("fixed-width column has no addresses"));
    };
    data.seek(addresses_offset)?;
    let addresses = PackedColumn::load(data, entry.count as usize)?;
    if data.position() > data_end {
        return Err(PilumError::corruption(format!(
            "address table ends at {}, past the data region end {data_end}",
            data.position()
        )));
    }

    let mut previous = 0u64;
    for (doc, address) in addresses.iter().enumerate() {
        if address < previous {
            return Err(PilumError::corruption(format!(
                "address table decreases at doc {doc}: {address} < {previous}"
            )));
        }
        previous = address;
    }
    if previous != entry.total_bytes {
        return Err(PilumError::corruption(format!(
            "address table ends at {previous}, metadata says {} bytes",
            entry.total_bytes
        )));
    }
    Ok(addresses)
}

/// Accessor over a binary column; owns its own clone of the data input.
#[derive(Debug)]
pub struct BinaryValues {
    input: Box<dyn StorageInput>,
    entry: BinaryEntry,
    addresses: Option<Arc<PackedColumn>>,
}

impl BinaryValues {
    /// `addresses` must be given for variable-width columns.
    pub fn new(
        input: Box<dyn StorageInput>,
        entry: BinaryEntry,
        addresses: Option<Arc<PackedColumn>>,
    ) -> Result<Self> {
        if entry.mode == BinaryMode::Variable && addresses.is_none() {
            return Err(PilumError::consistency(
                "variable-width binary values need an address table",
            ));
        }
        Ok(BinaryValues {
            input,
            entry,
            addresses,
        })
    }

    /// The entry this accessor reads.
    pub fn entry(&self) -> &BinaryEntry {
        &self.entry
    }

    fn range(&self, doc: u32) -> (u64, u64) {
        match &self.addresses {
            Some(addresses) => {
                let start = if doc == 0 {
                    0
                } else {
                    addresses.get(doc as usize - 1)
                };
                (start, addresses.get(doc as usize))
            }
            None => {
                let len = self.entry.fixed_length() as u64;
                let start = doc as u64 * len;
                (start, start + len)
            }
        }
    }
}

impl BinaryDocValues for BinaryValues {
    fn get(&mut self, doc: u32) -> Result<Vec<u8>> {
        if doc >= self.entry.count {
            return Err(PilumError::invalid_argument(format!(
                "doc {doc} out of range [0, {})",
                self.entry.count
            )));
        }
        let (start, end) = self.range(doc);
        let mut bytes = vec![0u8; (end - start) as usize];
        self.input
            .seek(SeekFrom::Start(self.entry.offset + start))?;
        self.input.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    fn len(&self) -> u32 {
        self.entry.count
    }
}
