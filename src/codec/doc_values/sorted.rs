//! Sorted columns: a dictionary of distinct terms plus one ordinal per
//! document.

use std::sync::Arc;

use crate::codec::doc_values::binary::{self, BinaryEntry, BinaryValues};
use crate::codec::doc_values::numeric::{self, LoadedNumeric, NumericEntry};
use crate::codec::doc_values::{BinaryDocValues, SortedDocValues};
use crate::error::{PilumError, Result};
use crate::storage::StorageOutput;
use crate::storage::structured::StructWriter;
use crate::util::bytes;

/// Ordinal of a document without a value.
pub const NO_ORD: i64 = -1;

/// The dictionary and ordinal entries of a sorted column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortedEntry {
    pub dictionary: BinaryEntry,
    pub ords: NumericEntry,
}

/// Check a sorted column before anything is written.
pub fn validate_sorted(dictionary: &[Vec<u8>], ords: &[i64]) -> Result<()> {
    if let Some(pos) = bytes::first_unsorted(dictionary) {
        return Err(PilumError::consistency(format!(
            "sorted dictionary is not strictly ascending at position {pos}"
        )));
    }
    let size = dictionary.len() as i64;
    if let Some((doc, ord)) = ords
        .iter()
        .enumerate()
        .find(|&(_, &ord)| ord < NO_ORD || ord >= size)
    {
        return Err(PilumError::consistency(format!(
            "ordinal {ord} of doc {doc} out of range [-1, {size})"
        )));
    }
    Ok(())
}

/// Write the dictionary then the ordinals at the current position of `data`.
pub fn write_sorted<W: StorageOutput>(
    data: &mut StructWriter<W>,
    dictionary: &[Vec<u8>],
    ords: &[i64],
    max_table_cardinality: usize,
) -> Result<SortedEntry> {
    validate_sorted(dictionary, ords)?;
    let dictionary = binary::write_binary(data, dictionary)?;
    let ords = numeric::write_numeric(data, ords, max_table_cardinality)?;
    Ok(SortedEntry { dictionary, ords })
}

/// Accessor over a sorted column.
#[derive(Debug)]
pub struct SortedValues {
    terms: BinaryValues,
    ords: Arc<LoadedNumeric>,
}

impl SortedValues {
    pub fn new(terms: BinaryValues, ords: Arc<LoadedNumeric>) -> Self {
        SortedValues { terms, ords }
    }
}

impl SortedDocValues for SortedValues {
    fn ord(&self, doc: u32) -> Result<i64> {
        if doc as usize >= self.ords.count() {
            return Err(PilumError::invalid_argument(format!(
                "doc {doc} out of range [0, {})",
                self.ords.count()
            )));
        }
        Ok(self.ords.value(doc as usize))
    }

    fn lookup_ord(&mut self, ord: u32) -> Result<Vec<u8>> {
        if ord >= self.terms.len() {
            return Err(PilumError::invalid_argument(format!(
                "ordinal {ord} out of range [0, {})",
                self.terms.len()
            )));
        }
        self.terms.get(ord)
    }

    fn value_count(&self) -> u32 {
        self.terms.len()
    }
}
