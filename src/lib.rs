#![doc = include_str!("../README.md")]

mod common;
mod dht;
mod error;
pub mod rpc;
pub mod server;
pub mod storage;

pub use crate::common::messages;
pub use crate::common::{
    assign, BucketEntry, BucketSnapshot, ClosestNodes, Contact, Distance, Id, KBucket, Record,
    RecordMetadata, Touched, DEFAULT_BUCKET_CAPACITY, DEFAULT_BUCKET_SIZE_K,
    DEFAULT_REPLICATION_FACTOR, DEFAULT_TTL_SECS, ID_SIZE,
};
pub use bytes::Bytes;
pub use dht::{Dht, Info, IngestReport, Testnet};
pub use error::{Error, Result};

pub mod errors {
    pub use super::rpc::StoreError;
}
