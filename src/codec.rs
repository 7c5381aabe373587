//! Codecs: the on-disk formats of a segment.
//!
//! A [`Codec`] bundles every format used to write one segment:
//!
//! - postings through a [`PerFieldPostingsFormat`]
//! - doc values through a [`PerFieldDocValuesFormat`]
//! - field metadata through a [`FieldInfosFormat`]
//! - the segment descriptor through a [`SegmentInfoFormat`]
//! - optional packing into a compound file through a [`CompoundFormat`]
//!
//! The codec name is recorded in the segment descriptor and resolved through
//! the [`registry::FormatRegistry`] when the segment is opened again.
//!
//! # Example
//!
//! ```
//! use pilum::codec::Codec;
//! use pilum::codec::doc_values::{ColumnarDocValuesConfig, ColumnarDocValuesFormat, DocValuesFormat};
//! use pilum::codec::per_field::PerFieldFormats;
//! use std::sync::Arc;
//!
//! let default: Arc<dyn DocValuesFormat> = Arc::new(ColumnarDocValuesFormat::default());
//! let mut doc_values = PerFieldFormats::new(default);
//! doc_values.add_format(
//!     "price",
//!     Arc::new(ColumnarDocValuesFormat::new(ColumnarDocValuesConfig { max_table_cardinality: 16 })),
//! );
//!
//! let codec = Codec::builder().doc_values_policy(Arc::new(doc_values)).build();
//! assert_eq!(codec.name(), "Pilum10");
//! ```

use std::sync::Arc;

pub mod bitpack;
pub mod codec_util;
pub mod compound;
pub mod doc_values;
pub mod field_infos;
pub mod per_field;
pub mod postings;
pub mod registry;
pub mod segment_info;

use crate::codec::compound::CompoundFormat;
use crate::codec::doc_values::{ColumnarDocValuesFormat, DocValuesFormat};
use crate::codec::field_infos::FieldInfosFormat;
use crate::codec::per_field::{
    DocValuesFormatPolicy, PerFieldDocValuesFormat, PerFieldFormats, PerFieldPostingsFormat,
    PostingsFormatPolicy,
};
use crate::codec::postings::{BlockPostingsFormat, PostingsFormat};
use crate::codec::segment_info::SegmentInfoFormat;

/// Name of the default codec.
pub const CODEC_NAME: &str = "Pilum10";

/// The set of formats that writes and reads a segment.
#[derive(Debug, Clone)]
pub struct Codec {
    name: String,
    postings_format: PerFieldPostingsFormat,
    doc_values_format: PerFieldDocValuesFormat,
    field_infos_format: FieldInfosFormat,
    segment_info_format: SegmentInfoFormat,
    compound_format: CompoundFormat,
}

impl Codec {
    /// Start building a codec with custom per-field policies.
    pub fn builder() -> CodecBuilder {
        CodecBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn postings_format(&self) -> &PerFieldPostingsFormat {
        &self.postings_format
    }

    pub fn doc_values_format(&self) -> &PerFieldDocValuesFormat {
        &self.doc_values_format
    }

    pub fn field_infos_format(&self) -> &FieldInfosFormat {
        &self.field_infos_format
    }

    pub fn segment_info_format(&self) -> &SegmentInfoFormat {
        &self.segment_info_format
    }

    pub fn compound_format(&self) -> &CompoundFormat {
        &self.compound_format
    }
}

impl Default for Codec {
    fn default() -> Self {
        Codec::builder().build()
    }
}

/// Builder for [`Codec`].
///
/// Fields without an explicit policy use [`BlockPostingsFormat`] and
/// [`ColumnarDocValuesFormat`], one shared instance each.
#[derive(Debug, Default)]
pub struct CodecBuilder {
    postings_policy: Option<Arc<dyn PostingsFormatPolicy>>,
    doc_values_policy: Option<Arc<dyn DocValuesFormatPolicy>>,
}

impl CodecBuilder {
    /// Choose the postings format of each field with `policy`.
    pub fn postings_policy(mut self, policy: Arc<dyn PostingsFormatPolicy>) -> Self {
        self.postings_policy = Some(policy);
        self
    }

    /// Choose the doc-values format of each field with `policy`.
    pub fn doc_values_policy(mut self, policy: Arc<dyn DocValuesFormatPolicy>) -> Self {
        self.doc_values_policy = Some(policy);
        self
    }

    pub fn build(self) -> Codec {
        let postings_policy = self.postings_policy.unwrap_or_else(|| {
            let default: Arc<dyn PostingsFormat> = Arc::new(BlockPostingsFormat::new());
            Arc::new(PerFieldFormats::new(default))
        });
        let doc_values_policy = self.doc_values_policy.unwrap_or_else(|| {
            let default: Arc<dyn DocValuesFormat> = Arc::new(ColumnarDocValuesFormat::default());
            Arc::new(PerFieldFormats::new(default))
        });

        Codec {
            name: CODEC_NAME.to_string(),
            postings_format: PerFieldPostingsFormat::new(postings_policy),
            doc_values_format: PerFieldDocValuesFormat::new(doc_values_policy),
            field_infos_format: FieldInfosFormat::new(),
            segment_info_format: SegmentInfoFormat::new(),
            compound_format: CompoundFormat::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::doc_values::COLUMNAR_FORMAT_NAME;
    use crate::codec::postings::BLOCK_POSTINGS_FORMAT_NAME;

    #[test]
    fn test_default_codec() {
        let codec = Codec::default();
        assert_eq!(codec.name(), CODEC_NAME);
        assert_eq!(
            codec.postings_format().policy().format_for_field("body").name(),
            BLOCK_POSTINGS_FORMAT_NAME
        );
        assert_eq!(
            codec.doc_values_format().policy().format_for_field("price").name(),
            COLUMNAR_FORMAT_NAME
        );
        // Every field shares the default instance.
        let policy = codec.doc_values_format().policy();
        assert!(Arc::ptr_eq(
            &policy.format_for_field("a"),
            &policy.format_for_field("b")
        ));
    }
}
