//! Per-field metadata shared by the writer, the formats and the reader.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{PilumError, Result};

/// The kind of doc values a field carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocValuesType {
    /// No doc values.
    None,
    /// One `i64` per document.
    Numeric,
    /// One byte string per document.
    Binary,
    /// At most one term per document, drawn from a sorted dictionary.
    Sorted,
}

impl DocValuesType {
    /// Persisted code of this type.
    pub fn code(self) -> u8 {
        match self {
            DocValuesType::None => 0,
            DocValuesType::Numeric => 1,
            DocValuesType::Binary => 2,
            DocValuesType::Sorted => 3,
        }
    }

    /// Decode a persisted code.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(DocValuesType::None),
            1 => Ok(DocValuesType::Numeric),
            2 => Ok(DocValuesType::Binary),
            3 => Ok(DocValuesType::Sorted),
            other => Err(PilumError::corruption(format!(
                "unknown doc values type {other}"
            ))),
        }
    }
}

impl fmt::Display for DocValuesType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DocValuesType::None => "none",
            DocValuesType::Numeric => "numeric",
            DocValuesType::Binary => "binary",
            DocValuesType::Sorted => "sorted",
        };
        f.write_str(name)
    }
}

/// Metadata for one field of a segment.
///
/// The attribute map is interior-mutable: the per-field formats record which
/// sub-format and suffix wrote the field while the field infos are shared.
#[derive(Debug)]
pub struct FieldInfo {
    /// Field name.
    pub name: String,

    /// Dense field number, unique within the segment.
    pub number: u32,

    /// Kind of doc values stored for the field.
    pub doc_values_type: DocValuesType,

    /// Whether the field has an inverted index.
    pub has_postings: bool,

    attributes: RwLock<BTreeMap<String, String>>,
}

impl FieldInfo {
    /// Create a field with no attributes.
    pub fn new(
        name: impl Into<String>,
        number: u32,
        doc_values_type: DocValuesType,
        has_postings: bool,
    ) -> Self {
        FieldInfo {
            name: name.into(),
            number,
            doc_values_type,
            has_postings,
            attributes: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create a field with the given attributes.
    pub fn with_attributes(
        name: impl Into<String>,
        number: u32,
        doc_values_type: DocValuesType,
        has_postings: bool,
        attributes: BTreeMap<String, String>,
    ) -> Self {
        let info = Self::new(name, number, doc_values_type, has_postings);
        *info.attributes.write() = attributes;
        info
    }

    /// Value of an attribute.
    pub fn attribute(&self, key: &str) -> Option<String> {
        self.attributes.read().get(key).cloned()
    }

    /// Set an attribute, returning the previous value.
    pub fn put_attribute(&self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.attributes.write().insert(key.into(), value.into())
    }

    /// Snapshot of every attribute.
    pub fn attributes(&self) -> BTreeMap<String, String> {
        self.attributes.read().clone()
    }

    /// Whether the field stores doc values.
    pub fn has_doc_values(&self) -> bool {
        self.doc_values_type != DocValuesType::None
    }
}

/// Serializable view of a [`FieldInfo`], used for CLI output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldInfoSummary {
    pub name: String,
    pub number: u32,
    pub doc_values_type: DocValuesType,
    pub has_postings: bool,
    pub attributes: BTreeMap<String, String>,
}

impl From<&FieldInfo> for FieldInfoSummary {
    fn from(info: &FieldInfo) -> Self {
        FieldInfoSummary {
            name: info.name.clone(),
            number: info.number,
            doc_values_type: info.doc_values_type,
            has_postings: info.has_postings,
            attributes: info.attributes(),
        }
    }
}

/// The fields of a segment, ordered by number.
#[derive(Debug, Default)]
pub struct FieldInfos {
    by_number: Vec<Arc<FieldInfo>>,
    by_name: AHashMap<String, usize>,
}

impl FieldInfos {
    /// Build from a list of fields. Duplicate numbers or names are rejected.
    pub fn new(fields: Vec<FieldInfo>) -> Result<Self> {
        let mut fields: Vec<Arc<FieldInfo>> = fields.into_iter().map(Arc::new).collect();
        fields.sort_by_key(|f| f.number);

        let mut by_name = AHashMap::with_capacity(fields.len());
        for (i, field) in fields.iter().enumerate() {
            if i > 0 && fields[i - 1].number == field.number {
                return Err(PilumError::consistency(format!(
                    "duplicate field number {} ({} and {})",
                    field.number,
                    fields[i - 1].name,
                    field.name
                )));
            }
            if by_name.insert(field.name.clone(), i).is_some() {
                return Err(PilumError::consistency(format!(
                    "duplicate field name {:?}",
                    field.name
                )));
            }
        }

        Ok(FieldInfos {
            by_number: fields,
            by_name,
        })
    }

    /// Look up a field by name.
    pub fn field_by_name(&self, name: &str) -> Option<&Arc<FieldInfo>> {
        self.by_name.get(name).map(|&i| &self.by_number[i])
    }

    /// Look up a field by number.
    pub fn field_by_number(&self, number: u32) -> Option<&Arc<FieldInfo>> {
        self.by_number
            .binary_search_by_key(&number, |f| f.number)
            .ok()
            .map(|i| &self.by_number[i])
    }

    /// Iterate in field-number order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<FieldInfo>> {
        self.by_number.iter()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.by_number.len()
    }

    /// Whether there are no fields.
    pub fn is_empty(&self) -> bool {
        self.by_number.is_empty()
    }

    /// Whether any field has doc values.
    pub fn has_doc_values(&self) -> bool {
        self.iter().any(|f| f.has_doc_values())
    }

    /// Whether any field has postings.
    pub fn has_postings(&self) -> bool {
        self.iter().any(|f| f.has_postings)
    }
}
