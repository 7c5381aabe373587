use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::storage::{Storage, StorageInput, StorageOutput, delete_files_quietly};

/// Storage facade that records the name of every file created through it.
///
/// The segment writer hands this to every format so the set of files a segment
/// owns is known at commit time, and so partially written files can be removed
/// when a write fails.
#[derive(Debug)]
pub struct TrackingStorage {
    inner: Arc<dyn Storage>,
    created: Mutex<BTreeSet<String>>,
}

impl TrackingStorage {
    /// Wrap `inner`, starting with an empty record.
    pub fn new(inner: Arc<dyn Storage>) -> Self {
        Self {
            inner,
            created: Mutex::new(BTreeSet::new()),
        }
    }

    /// The wrapped storage.
    pub fn inner(&self) -> &Arc<dyn Storage> {
        &self.inner
    }

    /// Names of files created through this facade and not since deleted.
    pub fn created_files(&self) -> BTreeSet<String> {
        self.created.lock().clone()
    }

    /// Delete every recorded file, ignoring failures, and clear the record.
    pub fn delete_created_quietly(&self) {
        let names = std::mem::take(&mut *self.created.lock());
        delete_files_quietly(self.inner.as_ref(), names);
    }
}

impl Storage for TrackingStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        self.inner.open_input(name)
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        let output = self.inner.create_output(name)?;
        self.created.lock().insert(name.to_string());
        Ok(output)
    }

    fn file_exists(&self, name: &str) -> bool {
        self.inner.file_exists(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.inner.delete_file(name)?;
        self.created.lock().remove(name);
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        self.inner.list_files()
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        self.inner.file_size(name)
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        self.inner.rename_file(old_name, new_name)?;
        let mut created = self.created.lock();
        if created.remove(old_name) {
            created.insert(new_name.to_string());
        }
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.inner.sync()
    }

    fn close(&self) -> Result<()> {
        // The wrapped storage outlives the segment being written.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;
    use std::io::Write;

    #[test]
    fn test_records_created_files() {
        let inner: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let tracking = TrackingStorage::new(Arc::clone(&inner));

        for name in ["_0.dvd", "_0.dvm"] {
            let mut out = tracking.create_output(name).unwrap();
            out.write_all(b"x").unwrap();
            out.close().unwrap();
        }
        tracking.rename_file("_0.dvm", "_0.dvx").unwrap();

        let created: Vec<String> = tracking.created_files().into_iter().collect();
        assert_eq!(created, vec!["_0.dvd", "_0.dvx"]);

        tracking.delete_file("_0.dvd").unwrap();
        assert_eq!(tracking.created_files().len(), 1);
    }

    #[test]
    fn test_delete_created_quietly() {
        let inner: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        let mut out = inner.create_output("other").unwrap();
        out.close().unwrap();

        let tracking = TrackingStorage::new(Arc::clone(&inner));
        let mut out = tracking.create_output("_0.tim").unwrap();
        out.write_all(b"partial").unwrap();
        drop(out);

        tracking.delete_created_quietly();
        assert_eq!(inner.list_files().unwrap(), vec!["other"]);
        assert!(tracking.created_files().is_empty());
    }
}
