//! Local persistence of records and of the node's bucket.

mod file;
mod memory;

use std::fmt::Debug;
use std::path::PathBuf;

use crate::common::{BucketSnapshot, Id, Record};
use crate::Result;

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// An entry found while scanning a node's storage.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEntry {
    /// A valid record.
    Record(Record),
    /// Something that is not a record file at all, like the bucket file.
    NotARecord(PathBuf),
    /// A record file that could not be read.
    Unreadable(PathBuf),
    /// A record file whose content could not be decoded.
    Unparsable(PathBuf),
}

/// Storage backend of a single node.
///
/// Implementations must be safe to share between the worker threads serving
/// requests. Mutations of the same key are serialized by the caller, see
/// [crate::server::RecordLocks].
pub trait Storage: Debug + Send + Sync {
    /// Returns the record stored under `key`, if any.
    fn get(&self, key: &Id) -> Result<Option<Record>>;

    /// Store or overwrite the record under its key.
    fn put(&self, record: &Record) -> Result<()>;

    /// Delete the record under `key`, returns true if something was deleted.
    fn delete(&self, key: &Id) -> Result<bool>;

    /// Every entry of the storage, records and junk alike.
    fn scan(&self) -> Result<Vec<ScanEntry>>;

    /// Load the persisted bucket, `None` if missing or corrupt.
    fn load_bucket(&self) -> Option<BucketSnapshot>;

    /// Persist the bucket, replacing any previous snapshot.
    fn save_bucket(&self, snapshot: &BucketSnapshot) -> Result<()>;
}
