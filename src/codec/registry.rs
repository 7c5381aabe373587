//! Name-to-factory registry for codecs and formats.
//!
//! Readers only know a format by the name recorded in a segment. The registry
//! turns that name back into an instance. Nothing is discovered implicitly:
//! every entry is added by an explicit `register_*` call, and the process-wide
//! registry starts out with the formats of [`register_builtin_formats`].

use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;
use lazy_static::lazy_static;
use parking_lot::RwLock;

use crate::codec::doc_values::{COLUMNAR_FORMAT_NAME, ColumnarDocValuesFormat, DocValuesFormat};
use crate::codec::postings::{BLOCK_POSTINGS_FORMAT_NAME, BlockPostingsFormat, PostingsFormat};
use crate::codec::{CODEC_NAME, Codec};
use crate::error::{PilumError, Result};

/// Builds a codec.
pub type CodecFactory = Arc<dyn Fn() -> Arc<Codec> + Send + Sync>;

/// Builds a postings format.
pub type PostingsFormatFactory = Arc<dyn Fn() -> Arc<dyn PostingsFormat> + Send + Sync>;

/// Builds a doc-values format.
pub type DocValuesFormatFactory = Arc<dyn Fn() -> Arc<dyn DocValuesFormat> + Send + Sync>;

lazy_static! {
    static ref GLOBAL_REGISTRY: RwLock<FormatRegistry> = RwLock::new(FormatRegistry::with_builtin_formats());
}

/// Maps names to codec and format factories.
#[derive(Default)]
pub struct FormatRegistry {
    codecs: AHashMap<String, CodecFactory>,
    postings_formats: AHashMap<String, PostingsFormatFactory>,
    doc_values_formats: AHashMap<String, DocValuesFormatFactory>,
}

impl FormatRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in codec and formats.
    pub fn with_builtin_formats() -> Self {
        let mut registry = Self::new();
        if let Err(e) = register_builtin_formats(&mut registry) {
            log::warn!("Failed to register built-in formats: {e}");
        }
        registry
    }

    /// The process-wide registry.
    pub fn global() -> &'static RwLock<FormatRegistry> {
        &GLOBAL_REGISTRY
    }

    /// Register a codec factory under `name`.
    pub fn register_codec<F>(&mut self, name: &str, factory: F) -> Result<()>
    where
        F: Fn() -> Arc<Codec> + Send + Sync + 'static,
    {
        insert_unique(&mut self.codecs, "codec", name, Arc::new(factory))
    }

    /// Register a postings format factory under `name`.
    pub fn register_postings_format<F>(&mut self, name: &str, factory: F) -> Result<()>
    where
        F: Fn() -> Arc<dyn PostingsFormat> + Send + Sync + 'static,
    {
        insert_unique(&mut self.postings_formats, "postings format", name, Arc::new(factory))
    }

    /// Register a doc-values format factory under `name`.
    pub fn register_doc_values_format<F>(&mut self, name: &str, factory: F) -> Result<()>
    where
        F: Fn() -> Arc<dyn DocValuesFormat> + Send + Sync + 'static,
    {
        insert_unique(
            &mut self.doc_values_formats,
            "doc values format",
            name,
            Arc::new(factory),
        )
    }

    /// A new instance of the codec registered as `name`.
    pub fn codec(&self, name: &str) -> Option<Arc<Codec>> {
        self.codecs.get(name).map(|factory| factory())
    }

    /// A new instance of the postings format registered as `name`.
    pub fn postings_format(&self, name: &str) -> Option<Arc<dyn PostingsFormat>> {
        self.postings_formats.get(name).map(|factory| factory())
    }

    /// A new instance of the doc-values format registered as `name`.
    pub fn doc_values_format(&self, name: &str) -> Option<Arc<dyn DocValuesFormat>> {
        self.doc_values_formats.get(name).map(|factory| factory())
    }

    /// Registered codec names, sorted.
    pub fn codec_names(&self) -> Vec<String> {
        sorted_names(&self.codecs)
    }

    /// Registered postings format names, sorted.
    pub fn postings_format_names(&self) -> Vec<String> {
        sorted_names(&self.postings_formats)
    }

    /// Registered doc-values format names, sorted.
    pub fn doc_values_format_names(&self) -> Vec<String> {
        sorted_names(&self.doc_values_formats)
    }
}

impl fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatRegistry")
            .field("codecs", &self.codec_names())
            .field("postings_formats", &self.postings_format_names())
            .field("doc_values_formats", &self.doc_values_format_names())
            .finish()
    }
}

/// Register the codec and formats that ship with this crate.
pub fn register_builtin_formats(registry: &mut FormatRegistry) -> Result<()> {
    registry.register_codec(CODEC_NAME, || Arc::new(Codec::default()))?;
    registry.register_postings_format(BLOCK_POSTINGS_FORMAT_NAME, || {
        Arc::new(BlockPostingsFormat::new())
    })?;
    registry.register_doc_values_format(COLUMNAR_FORMAT_NAME, || {
        Arc::new(ColumnarDocValuesFormat::default())
    })?;
    Ok(())
}

fn insert_unique<T>(map: &mut AHashMap<String, T>, kind: &str, name: &str, value: T) -> Result<()> {
    if map.contains_key(name) {
        return Err(PilumError::consistency(format!(
            "{kind} {name:?} is already registered"
        )));
    }
    log::debug!("Registered {kind} {name}");
    map.insert(name.to_string(), value);
    Ok(())
}

fn sorted_names<T>(map: &AHashMap<String, T>) -> Vec<String> {
    let mut names: Vec<String> = map.keys().cloned().collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_builtin_formats() {
        let registry = FormatRegistry::with_builtin_formats();
        assert_eq!(registry.codec_names(), vec![CODEC_NAME]);
        assert_eq!(registry.postings_format_names(), vec![BLOCK_POSTINGS_FORMAT_NAME]);
        assert_eq!(registry.doc_values_format_names(), vec![COLUMNAR_FORMAT_NAME]);

        assert_eq!(registry.codec(CODEC_NAME).unwrap().name(), CODEC_NAME);
        assert_eq!(
            registry.postings_format(BLOCK_POSTINGS_FORMAT_NAME).unwrap().name(),
            BLOCK_POSTINGS_FORMAT_NAME
        );
        assert_eq!(
            registry.doc_values_format(COLUMNAR_FORMAT_NAME).unwrap().name(),
            COLUMNAR_FORMAT_NAME
        );
    }

    #[test]
    fn test_unknown_names() {
        let registry = FormatRegistry::with_builtin_formats();
        assert!(registry.codec("Lucene90").is_none());
        assert!(registry.postings_format("Columnar10").is_none());
        assert!(registry.doc_values_format("BlockPostings10").is_none());
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = FormatRegistry::new();
        register_builtin_formats(&mut registry).unwrap();
        let err = register_builtin_formats(&mut registry).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Consistency);

        let err = registry
            .register_doc_values_format(COLUMNAR_FORMAT_NAME, || {
                Arc::new(ColumnarDocValuesFormat::default())
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Consistency);
    }

    #[test]
    fn test_global_registry() {
        let global = FormatRegistry::global().read();
        assert!(global.codec(CODEC_NAME).is_some());
        assert!(global.postings_format(BLOCK_POSTINGS_FORMAT_NAME).is_some());
    }
}
