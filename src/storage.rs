//! Storage abstraction layer for Pilum.
//!
//! Every segment file is written and read through the [`Storage`] trait, so the
//! codecs never touch the file system directly. Backends can be swapped without
//! touching higher-level code.
//!
//! # Architecture
//!
//! - **Storage trait**: create append-only outputs, open seekable and clonable
//!   inputs, delete and list files
//! - **StorageConfig enum**: type-safe configuration for supported backends
//! - **StorageFactory**: helper for constructing concrete storage instances
//! - **Wrappers**: [`tracking::TrackingStorage`] records created files,
//!   [`slice::SliceInput`] bounds an input to a byte range
//! - **Structured I/O**: [`structured::StructWriter`] and
//!   [`structured::StructReader`] add typed, checksummed reads and writes
//!
//! # Example
//!
//! ```
//! use pilum::storage::{StorageFactory, StorageConfig};
//! use pilum::storage::memory::MemoryStorageConfig;
//!
//! # fn main() -> pilum::error::Result<()> {
//! let storage = StorageFactory::create(StorageConfig::Memory(MemoryStorageConfig::default()))?;
//! assert!(storage.list_files()?.is_empty());
//! # Ok(())
//! # }
//! ```

use std::io::{Read, Seek, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{PilumError, Result};

pub mod file;
pub mod memory;
pub mod slice;
pub mod structured;
pub mod tracking;

/// A trait for storage backends that can store and retrieve data.
///
/// Implementations must be safe to share between threads: many readers may open
/// inputs concurrently while a single writer creates the files of a new segment.
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Open an existing file for reading.
    ///
    /// The returned input is positioned at offset 0 and may be cloned to obtain
    /// further independent cursors over the same bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use pilum::storage::memory::{MemoryStorage, MemoryStorageConfig};
    /// use pilum::storage::Storage;
    /// use std::io::{Read, Write};
    ///
    /// # fn main() -> pilum::error::Result<()> {
    /// let storage = MemoryStorage::new(MemoryStorageConfig::default());
    ///
    /// let mut output = storage.create_output("_0.bin")?;
    /// output.write_all(b"test data")?;
    /// output.close()?;
    ///
    /// let mut input = storage.open_input("_0.bin")?;
    /// let mut buffer = Vec::new();
    /// input.read_to_end(&mut buffer)?;
    /// assert_eq!(buffer, b"test data");
    /// # Ok(())
    /// # }
    /// ```
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>>;

    /// Create a file for writing.
    ///
    /// The output is append-only. Its contents become visible to readers once
    /// the output is closed.
    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>>;

    /// Check if a file exists.
    fn file_exists(&self, name: &str) -> bool;

    /// Delete a file. Deleting a missing file is not an error.
    fn delete_file(&self, name: &str) -> Result<()>;

    /// List all files in the storage, sorted by name.
    fn list_files(&self) -> Result<Vec<String>>;

    /// Get the size of a file in bytes.
    fn file_size(&self, name: &str) -> Result<u64>;

    /// Rename a file.
    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()>;

    /// Sync all pending writes to storage.
    fn sync(&self) -> Result<()>;

    /// Close the storage and release resources.
    fn close(&self) -> Result<()>;
}

/// A trait for reading data from storage.
pub trait StorageInput: Read + Seek + Send + std::fmt::Debug {
    /// Get the size of the input stream.
    fn size(&self) -> Result<u64>;

    /// Duplicate this input.
    ///
    /// The clone shares the underlying immutable bytes but owns its own
    /// position, initially equal to the position of `self`.
    fn clone_input(&self) -> Result<Box<dyn StorageInput>>;

    /// Close the input stream.
    fn close(&mut self) -> Result<()>;
}

/// A trait for writing data to storage.
pub trait StorageOutput: Write + Send + std::fmt::Debug {
    /// Flush and sync the output to storage.
    fn flush_and_sync(&mut self) -> Result<()>;

    /// Number of bytes written so far.
    fn position(&self) -> Result<u64>;

    /// Close the output stream, publishing its contents.
    fn close(&mut self) -> Result<()>;
}

impl StorageOutput for Box<dyn StorageOutput> {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.as_mut().flush_and_sync()
    }

    fn position(&self) -> Result<u64> {
        self.as_ref().position()
    }

    fn close(&mut self) -> Result<()> {
        self.as_mut().close()
    }
}

impl StorageInput for Box<dyn StorageInput> {
    fn size(&self) -> Result<u64> {
        self.as_ref().size()
    }

    fn clone_input(&self) -> Result<Box<dyn StorageInput>> {
        self.as_ref().clone_input()
    }

    fn close(&mut self) -> Result<()> {
        self.as_mut().close()
    }
}

/// Configuration for storage backends.
///
/// Each variant contains the configuration specific to that storage type,
/// including the path for file-based storage.
///
/// ```
/// use pilum::storage::StorageConfig;
/// use pilum::storage::file::FileStorageConfig;
///
/// let mut file_config = FileStorageConfig::new("/data/index");
/// file_config.use_mmap = true;
/// let config = StorageConfig::File(file_config);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StorageConfig {
    /// File-based storage configuration (includes path)
    File(file::FileStorageConfig),

    /// Memory-based storage configuration
    Memory(memory::MemoryStorageConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory(memory::MemoryStorageConfig::default())
    }
}

/// A factory for creating storage instances.
pub struct StorageFactory;

impl StorageFactory {
    /// Create a new storage instance with the given configuration.
    pub fn create(config: StorageConfig) -> Result<Arc<dyn Storage>> {
        match config {
            StorageConfig::Memory(mem_config) => {
                let storage = memory::MemoryStorage::new(mem_config);
                Ok(Arc::new(storage))
            }
            StorageConfig::File(file_config) => {
                let path = file_config.path.clone();
                let storage = file::FileStorage::new(&path, file_config)?;
                Ok(Arc::new(storage))
            }
        }
    }

    /// Open an existing storage instance. Unlike [`create`](Self::create), a
    /// missing directory is an error.
    pub fn open(config: StorageConfig) -> Result<Arc<dyn Storage>> {
        if let StorageConfig::File(file_config) = &config {
            if !file_config.path.is_dir() {
                return Err(StorageError::FileNotFound(file_config.path.display().to_string()).into());
            }
        }
        Self::create(config)
    }
}

/// Error types specific to storage operations.
#[derive(Debug, Clone)]
pub enum StorageError {
    /// File not found.
    FileNotFound(String),

    /// File already exists.
    FileExists(String),

    /// I/O error.
    IoError(String),

    /// Storage is closed.
    StorageClosed,

    /// Invalid operation.
    InvalidOperation(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::FileNotFound(name) => write!(f, "File not found: {name}"),
            StorageError::FileExists(name) => write!(f, "File already exists: {name}"),
            StorageError::IoError(msg) => write!(f, "I/O error: {msg}"),
            StorageError::StorageClosed => write!(f, "Storage is closed"),
            StorageError::InvalidOperation(msg) => write!(f, "Invalid operation: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<StorageError> for PilumError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidOperation(msg) => PilumError::invalid_operation(msg),
            other => PilumError::storage(other.to_string()),
        }
    }
}

/// Read the full contents of a file.
pub fn read_all(storage: &dyn Storage, name: &str) -> Result<Vec<u8>> {
    let mut input = storage.open_input(name)?;
    let mut bytes = Vec::with_capacity(input.size()? as usize);
    input.read_to_end(&mut bytes)?;
    input.close()?;
    Ok(bytes)
}

/// Delete files, ignoring failures.
///
/// Used on error paths where the original error must be reported and cleanup
/// is only attempted.
pub fn delete_files_quietly<I, S>(storage: &dyn Storage, names: I)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    for name in names {
        if let Err(e) = storage.delete_file(name.as_ref()) {
            log::warn!("Failed to delete {} during cleanup: {e}", name.as_ref());
        }
    }
}
