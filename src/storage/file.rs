//! Records and bucket persisted as files in a data directory.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use crate::common::{BucketSnapshot, Id, Record};
use crate::Result;

use super::{ScanEntry, Storage};

/// Name of the bucket snapshot file inside the data directory.
pub const BUCKET_FILE: &str = "kbucket.json";
/// Extension of record files, named `<hex key>.rec`.
pub const RECORD_EXTENSION: &str = "rec";

#[derive(Debug, Clone)]
/// [Storage] writing one bencoded file per record, and a JSON bucket file.
pub struct FileStorage {
    data_dir: PathBuf,
}

impl FileStorage {
    /// Open the data directory, creating it if necessary.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();

        fs::create_dir_all(&data_dir)?;

        debug!(?data_dir, "Opened file storage");

        Ok(FileStorage { data_dir })
    }

    // === Getters ===

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    // === Private Methods ===

    fn record_path(&self, key: &Id) -> PathBuf {
        self.data_dir
            .join(format!("{}.{}", key.to_hex(), RECORD_EXTENSION))
    }

    fn bucket_path(&self) -> PathBuf {
        self.data_dir.join(BUCKET_FILE)
    }

    /// Write to a sibling temporary file then rename, so readers never see
    /// a partially written file.
    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = path.with_extension("tmp");

        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;

        Ok(())
    }

    fn classify(&self, path: PathBuf) -> Option<ScanEntry> {
        let file_name = path.file_name()?.to_string_lossy().to_string();

        if file_name == BUCKET_FILE || path.extension().is_some_and(|ext| ext == "tmp") {
            return None;
        }

        let is_record = path
            .extension()
            .is_some_and(|ext| ext == RECORD_EXTENSION)
            && path
                .file_stem()
                .is_some_and(|stem| stem.to_string_lossy().parse::<Id>().is_ok());

        if !is_record {
            return Some(ScanEntry::NotARecord(path));
        }

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(?path, ?error, "Could not read record file");
                return Some(ScanEntry::Unreadable(path));
            }
        };

        match Record::from_bytes(bytes) {
            Ok(record) => Some(ScanEntry::Record(record)),
            Err(error) => {
                warn!(?path, ?error, "Could not parse record file");
                Some(ScanEntry::Unparsable(path))
            }
        }
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &Id) -> Result<Option<Record>> {
        match fs::read(self.record_path(key)) {
            Ok(bytes) => Ok(Some(Record::from_bytes(bytes)?)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    fn put(&self, record: &Record) -> Result<()> {
        let path = self.record_path(record.key());

        self.write_atomic(&path, &record.to_bytes()?)?;

        trace!(?path, name = record.name(), "Stored record");

        Ok(())
    }

    fn delete(&self, key: &Id) -> Result<bool> {
        match fs::remove_file(self.record_path(key)) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    fn scan(&self) -> Result<Vec<ScanEntry>> {
        let mut entries = Vec::new();

        for entry in fs::read_dir(&self.data_dir)? {
            let path = entry?.path();

            if !path.is_file() {
                continue;
            }

            if let Some(entry) = self.classify(path) {
                entries.push(entry);
            }
        }

        // Directory order is unspecified.
        entries.sort_by(|a, b| scan_order(a).cmp(&scan_order(b)));

        Ok(entries)
    }

    fn load_bucket(&self) -> Option<BucketSnapshot> {
        let path = self.bucket_path();

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!(?path, "No bucket file, starting with an empty bucket");
                return None;
            }
            Err(error) => {
                warn!(?path, ?error, "Could not read bucket file, starting with an empty bucket");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(snapshot) => Some(snapshot),
            Err(error) => {
                warn!(?path, ?error, "Corrupt bucket file, starting with an empty bucket");
                None
            }
        }
    }

    fn save_bucket(&self, snapshot: &BucketSnapshot) -> Result<()> {
        let json = serde_json::to_vec_pretty(snapshot)?;

        self.write_atomic(&self.bucket_path(), &json)
    }
}

fn scan_order(entry: &ScanEntry) -> PathOrKey {
    match entry {
        ScanEntry::Record(record) => PathOrKey::Key(*record.key()),
        ScanEntry::NotARecord(path) | ScanEntry::Unreadable(path) | ScanEntry::Unparsable(path) => {
            PathOrKey::Path(path.clone())
        }
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum PathOrKey {
    Key(Id),
    Path(PathBuf),
}
