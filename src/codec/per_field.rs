//! Per-field format dispatch.
//!
//! A segment may store each field with a different postings or doc-values
//! format. The dispatcher asks a policy which format instance handles a field,
//! groups the fields by instance and hands each group its own sub-files named
//! `<segment>_<format>_<n>.<ext>`. The chosen format name and suffix number are
//! recorded as attributes of the field, so a reader can route every field back
//! to the right sub-format without consulting the policy.
//!
//! # Example
//!
//! ```
//! use pilum::codec::doc_values::{ColumnarDocValuesFormat, DocValuesFormat};
//! use pilum::codec::per_field::{DocValuesFormatPolicy, PerFieldFormats};
//! use std::sync::Arc;
//!
//! let compact: Arc<dyn DocValuesFormat> = Arc::new(ColumnarDocValuesFormat::default());
//! let mut formats = PerFieldFormats::new(Arc::new(ColumnarDocValuesFormat::default()) as Arc<dyn DocValuesFormat>);
//! formats.add_format("price", Arc::clone(&compact));
//! formats.add_format("rank", Arc::clone(&compact));
//!
//! // "price" and "rank" share one instance and therefore one set of files.
//! assert!(Arc::ptr_eq(&formats.format_for_field("price"), &formats.format_for_field("rank")));
//! assert!(!Arc::ptr_eq(&formats.format_for_field("price"), &formats.format_for_field("title")));
//! ```

use std::fmt::Debug;
use std::sync::Arc;

use ahash::AHashMap;

use crate::codec::doc_values::DocValuesFormat;
use crate::codec::postings::PostingsFormat;
use crate::error::{PilumError, Result};
use crate::index::field_info::FieldInfo;

pub mod doc_values;
pub mod postings;

pub use doc_values::{PerFieldDocValuesConsumer, PerFieldDocValuesFormat, PerFieldDocValuesProducer};
pub use postings::{PerFieldPostingsConsumer, PerFieldPostingsFormat, PerFieldPostingsProducer};

/// Attribute naming the doc-values format of a field.
pub const PER_FIELD_DOC_VALUES_FORMAT_KEY: &str = "PerFieldDocValuesFormat.format";
/// Attribute holding the doc-values suffix number of a field.
pub const PER_FIELD_DOC_VALUES_SUFFIX_KEY: &str = "PerFieldDocValuesFormat.suffix";
/// Attribute naming the postings format of a field.
pub const PER_FIELD_POSTINGS_FORMAT_KEY: &str = "PerFieldPostingsFormat.format";
/// Attribute holding the postings suffix number of a field.
pub const PER_FIELD_POSTINGS_SUFFIX_KEY: &str = "PerFieldPostingsFormat.suffix";

/// Chooses the doc-values format of each field.
pub trait DocValuesFormatPolicy: Send + Sync + Debug {
    fn format_for_field(&self, field: &str) -> Arc<dyn DocValuesFormat>;
}

/// Chooses the postings format of each field.
pub trait PostingsFormatPolicy: Send + Sync + Debug {
    fn format_for_field(&self, field: &str) -> Arc<dyn PostingsFormat>;
}

/// A default format plus per-field overrides.
///
/// Fields mapped to the same `Arc` share their files; two distinct instances
/// always get separate files, even if they are of the same type.
#[derive(Debug)]
pub struct PerFieldFormats<F: ?Sized> {
    default_format: Arc<F>,
    field_formats: AHashMap<String, Arc<F>>,
}

impl<F: ?Sized> PerFieldFormats<F> {
    /// Create a map where every field uses `default_format`.
    pub fn new(default_format: Arc<F>) -> Self {
        PerFieldFormats {
            default_format,
            field_formats: AHashMap::new(),
        }
    }

    /// Use `format` for `field`.
    pub fn add_format(&mut self, field: impl Into<String>, format: Arc<F>) {
        self.field_formats.insert(field.into(), format);
    }

    /// The format configured for `field`.
    pub fn get_format(&self, field: &str) -> &Arc<F> {
        self.field_formats
            .get(field)
            .unwrap_or(&self.default_format)
    }

    pub fn default_format(&self) -> &Arc<F> {
        &self.default_format
    }
}

impl<F: ?Sized> Clone for PerFieldFormats<F> {
    fn clone(&self) -> Self {
        PerFieldFormats {
            default_format: Arc::clone(&self.default_format),
            field_formats: self.field_formats.clone(),
        }
    }
}

impl DocValuesFormatPolicy for PerFieldFormats<dyn DocValuesFormat> {
    fn format_for_field(&self, field: &str) -> Arc<dyn DocValuesFormat> {
        Arc::clone(self.get_format(field))
    }
}

impl PostingsFormatPolicy for PerFieldFormats<dyn PostingsFormat> {
    fn format_for_field(&self, field: &str) -> Arc<dyn PostingsFormat> {
        Arc::clone(self.get_format(field))
    }
}

/// Suffix of the sub-files written by the `number`-th instance of a format.
pub fn suffix_name(format_name: &str, number: u32) -> String {
    format!("{format_name}_{number}")
}

/// Identity of a format instance.
pub(crate) fn instance_key<F: ?Sized>(format: &Arc<F>) -> usize {
    Arc::as_ptr(format) as *const () as usize
}

/// Hands out suffix numbers, one counter per format name, one number per
/// format instance.
#[derive(Debug, Default)]
pub(crate) struct SuffixAssigner {
    next: AHashMap<String, u32>,
}

impl SuffixAssigner {
    pub(crate) fn next_suffix(&mut self, format_name: &str) -> u32 {
        let next = self.next.entry(format_name.to_string()).or_insert(0);
        let suffix = *next;
        *next += 1;
        suffix
    }
}

/// Record `(format_name, suffix)` in the attributes of `field`.
///
/// A field that already names a different format or suffix cannot be
/// rewritten with this one.
pub(crate) fn record_format(
    field: &FieldInfo,
    format_key: &str,
    suffix_key: &str,
    format_name: &str,
    suffix: u32,
) -> Result<()> {
    let suffix_value = suffix.to_string();
    for (key, value) in [(format_key, format_name), (suffix_key, suffix_value.as_str())] {
        if let Some(existing) = field.attribute(key) {
            if existing != value {
                return Err(PilumError::consistency(format!(
                    "field {:?} already has {key}={existing}, cannot set {value}",
                    field.name
                )));
            }
        }
    }
    field.put_attribute(format_key, format_name);
    field.put_attribute(suffix_key, suffix_value);
    log::trace!("field {:?} -> {}", field.name, suffix_name(format_name, suffix));
    Ok(())
}

/// Read back the format name and suffix recorded by [`record_format`].
///
/// Returns `None` when the field names no format, which means it has no data
/// of this kind.
pub(crate) fn recorded_format(
    field: &FieldInfo,
    format_key: &str,
    suffix_key: &str,
) -> Result<Option<(String, u32)>> {
    let Some(format_name) = field.attribute(format_key) else {
        return Ok(None);
    };
    let suffix = field.attribute(suffix_key).ok_or_else(|| {
        PilumError::corruption(format!(
            "field {:?} names format {format_name} but has no {suffix_key} attribute",
            field.name
        ))
    })?;
    let suffix = suffix.parse::<u32>().map_err(|_| {
        PilumError::corruption(format!(
            "field {:?} has an invalid {suffix_key} attribute {suffix:?}",
            field.name
        ))
    })?;
    Ok(Some((format_name, suffix)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::doc_values::ColumnarDocValuesFormat;
    use crate::index::field_info::DocValuesType;

    #[test]
    fn test_per_field_formats() {
        let shared: Arc<dyn DocValuesFormat> = Arc::new(ColumnarDocValuesFormat::default());
        let default: Arc<dyn DocValuesFormat> = Arc::new(ColumnarDocValuesFormat::default());
        let mut formats = PerFieldFormats::new(Arc::clone(&default));
        formats.add_format("a", Arc::clone(&shared));
        formats.add_format("b", Arc::clone(&shared));

        assert!(Arc::ptr_eq(&formats.format_for_field("a"), &shared));
        assert!(Arc::ptr_eq(&formats.format_for_field("b"), &shared));
        assert!(Arc::ptr_eq(&formats.format_for_field("c"), &default));
        assert_eq!(
            instance_key(&formats.format_for_field("a")),
            instance_key(&formats.format_for_field("b"))
        );
        assert_ne!(
            instance_key(&formats.format_for_field("a")),
            instance_key(&formats.format_for_field("c"))
        );
    }

    #[test]
    fn test_suffix_assigner() {
        let mut assigner = SuffixAssigner::default();
        assert_eq!(assigner.next_suffix("Columnar10"), 0);
        assert_eq!(assigner.next_suffix("Columnar10"), 1);
        assert_eq!(assigner.next_suffix("BlockPostings10"), 0);
        assert_eq!(suffix_name("Columnar10", 1), "Columnar10_1");
    }

    #[test]
    fn test_record_and_read_format() {
        let field = FieldInfo::new("f", 0, DocValuesType::Numeric, false);
        assert_eq!(
            recorded_format(&field, PER_FIELD_DOC_VALUES_FORMAT_KEY, PER_FIELD_DOC_VALUES_SUFFIX_KEY)
                .unwrap(),
            None
        );

        record_format(
            &field,
            PER_FIELD_DOC_VALUES_FORMAT_KEY,
            PER_FIELD_DOC_VALUES_SUFFIX_KEY,
            "Columnar10",
            2,
        )
        .unwrap();
        assert_eq!(
            recorded_format(&field, PER_FIELD_DOC_VALUES_FORMAT_KEY, PER_FIELD_DOC_VALUES_SUFFIX_KEY)
                .unwrap(),
            Some(("Columnar10".to_string(), 2))
        );

        // Same values again are fine; a different suffix is not.
        record_format(
            &field,
            PER_FIELD_DOC_VALUES_FORMAT_KEY,
            PER_FIELD_DOC_VALUES_SUFFIX_KEY,
            "Columnar10",
            2,
        )
        .unwrap();
        let err = record_format(
            &field,
            PER_FIELD_DOC_VALUES_FORMAT_KEY,
            PER_FIELD_DOC_VALUES_SUFFIX_KEY,
            "Columnar10",
            3,
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Consistency);
    }

    #[test]
    fn test_bad_suffix_attribute_is_corruption() {
        let mut attributes = std::collections::BTreeMap::new();
        attributes.insert(PER_FIELD_POSTINGS_FORMAT_KEY.to_string(), "BlockPostings10".to_string());
        let missing = FieldInfo::with_attributes("f", 0, DocValuesType::None, true, attributes.clone());
        assert!(
            recorded_format(&missing, PER_FIELD_POSTINGS_FORMAT_KEY, PER_FIELD_POSTINGS_SUFFIX_KEY)
                .unwrap_err()
                .is_corruption()
        );

        attributes.insert(PER_FIELD_POSTINGS_SUFFIX_KEY.to_string(), "x1".to_string());
        let invalid = FieldInfo::with_attributes("f", 0, DocValuesType::None, true, attributes);
        assert!(
            recorded_format(&invalid, PER_FIELD_POSTINGS_FORMAT_KEY, PER_FIELD_POSTINGS_SUFFIX_KEY)
                .unwrap_err()
                .is_corruption()
        );
    }
}
