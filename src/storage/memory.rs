//! In-memory storage, for tests and simulations.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use crate::common::{BucketSnapshot, Id, Record};
use crate::Result;

use super::{ScanEntry, Storage};

#[derive(Debug, Default)]
/// [Storage] that keeps everything in memory and forgets it on drop.
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<Id, Record>,
    junk: Vec<ScanEntry>,
    bucket: Option<BucketSnapshot>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records stored.
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add an entry that [Storage::scan] reports as unusable, to mimic
    /// stray or corrupted files.
    pub fn add_junk(&self, path: impl Into<PathBuf>, entry: fn(PathBuf) -> ScanEntry) {
        self.lock().junk.push(entry(path.into()));
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave the maps half updated.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &Id) -> Result<Option<Record>> {
        Ok(self.lock().records.get(key).cloned())
    }

    fn put(&self, record: &Record) -> Result<()> {
        self.lock().records.insert(*record.key(), record.clone());

        Ok(())
    }

    fn delete(&self, key: &Id) -> Result<bool> {
        Ok(self.lock().records.remove(key).is_some())
    }

    fn scan(&self) -> Result<Vec<ScanEntry>> {
        let inner = self.lock();

        Ok(inner
            .records
            .values()
            .cloned()
            .map(ScanEntry::Record)
            .chain(inner.junk.iter().cloned())
            .collect())
    }

    fn load_bucket(&self) -> Option<BucketSnapshot> {
        self.lock().bucket.clone()
    }

    fn save_bucket(&self, snapshot: &BucketSnapshot) -> Result<()> {
        self.lock().bucket = Some(snapshot.clone());

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn put_get_delete() {
        let storage = MemoryStorage::new();
        let record = Record::new("Doodles", vec![9; 10]);

        storage.put(&record).unwrap();

        assert_eq!(storage.len(), 1);
        assert_eq!(storage.get(record.key()).unwrap(), Some(record.clone()));
        assert!(storage.delete(record.key()).unwrap());
        assert!(storage.is_empty());
    }

    #[test]
    fn scan_includes_junk() {
        let storage = MemoryStorage::new();

        storage.put(&Record::new("Moonbirds", vec![1])).unwrap();
        storage.add_junk("broken.rec", ScanEntry::Unparsable);

        let entries = storage.scan().unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1], ScanEntry::Unparsable("broken.rec".into()));
    }
}
