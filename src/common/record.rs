//! Records stored in the DHT.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{common::Id, Error, Result};

/// Default advisory time to live of a stored record, 24 hours.
pub const DEFAULT_TTL_SECS: u32 = 24 * 3600;

#[derive(Debug, Clone, PartialEq, Eq)]
/// A payload stored under a key, with the metadata needed to place it.
pub struct Record {
    key: Id,
    payload: Bytes,
    metadata: RecordMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordMetadata {
    /// Human readable name the key was derived from, like the NFT collection name.
    pub name: String,
    /// Advisory, nothing expires records.
    pub ttl_secs: u32,
    /// Unix time in milliseconds of the last store on this node.
    pub stored_at_ms: u64,
}

impl Record {
    /// Create a record keyed by [Id::derive] of `name`.
    pub fn new(name: impl Into<String>, payload: impl Into<Bytes>) -> Record {
        let name = name.into();

        Record {
            key: Id::derive(&name),
            payload: payload.into(),
            metadata: RecordMetadata {
                name,
                ttl_secs: DEFAULT_TTL_SECS,
                stored_at_ms: now_ms(),
            },
        }
    }

    /// Create a record with an explicit key.
    pub fn with_key(key: Id, payload: impl Into<Bytes>, metadata: RecordMetadata) -> Record {
        Record {
            key,
            payload: payload.into(),
            metadata,
        }
    }

    // === Options ===

    pub fn with_ttl(mut self, ttl_secs: u32) -> Self {
        self.metadata.ttl_secs = ttl_secs;
        self
    }

    // === Getters ===

    pub fn key(&self) -> &Id {
        &self.key
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn metadata(&self) -> &RecordMetadata {
        &self.metadata
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    // === Encoding ===

    /// Bencoded at-rest form, see [crate::storage::FileStorage].
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_bencode::to_bytes(&RecordFile {
            key: self.key.to_vec(),
            name: self.metadata.name.clone(),
            ttl: self.metadata.ttl_secs,
            stored_at: self.metadata.stored_at_ms,
            payload: self.payload.to_vec(),
        })
        .map_err(Error::BencodeError)
    }

    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Record> {
        let file: RecordFile = serde_bencode::from_bytes(bytes.as_ref())?;

        Ok(Record {
            key: Id::from_bytes(&file.key)?,
            payload: file.payload.into(),
            metadata: RecordMetadata {
                name: file.name,
                ttl_secs: file.ttl,
                stored_at_ms: file.stored_at,
            },
        })
    }
}

#[derive(Serialize, Deserialize)]
struct RecordFile {
    #[serde(with = "serde_bytes")]
    key: Vec<u8>,
    name: String,
    ttl: u32,
    stored_at: u64,
    #[serde(rename = "v", with = "serde_bytes")]
    payload: Vec<u8>,
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
