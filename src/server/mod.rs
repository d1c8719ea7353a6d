//! Node-local state and the handlers of incoming requests.

mod locks;

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::common::{
    now_ms, Contact, ErrorSpecific, FoundRecord, Id, KBucket, LookupResponse, PingResponse,
    RebalanceResponse, Record, RequestSpecific, ResponseSpecific, Touched, DEFAULT_BUCKET_CAPACITY,
};
use crate::rpc::{self, Config, RebalanceReport, Role, Transport, DEFAULT_SUGGESTIONS};
use crate::storage::{MemoryStorage, Storage};
use crate::{Error, Result};

pub use locks::{RecordLocks, LOCK_STRIPES};

/// How long a rebalance triggered by a request may run, so the response
/// arrives before the requester gives up. A pass cut short can be resumed.
pub const DEFAULT_REBALANCE_BUDGET: Duration = Duration::from_millis(2500);

#[derive(Debug)]
/// Everything a node owns: its identity, bucket, records and, for seeders,
/// the directory of known nodes.
///
/// Shared between the worker threads serving requests.
pub struct NodeServer {
    contact: Contact,
    role: Role,
    suggestions: usize,
    rebalance_budget: Duration,
    bucket: Mutex<KBucket>,
    /// Seeders only: every node configured or seen, keyed by id.
    directory: Mutex<BTreeMap<Id, Contact>>,
    storage: Arc<dyn Storage>,
    locks: RecordLocks,
}

#[derive(Debug)]
pub struct NodeServerBuilder {
    contact: Contact,
    role: Role,
    bucket_size: NonZeroUsize,
    suggestions: usize,
    rebalance_budget: Duration,
    known_nodes: Vec<Contact>,
    storage: Option<Arc<dyn Storage>>,
}

impl NodeServerBuilder {
    pub fn role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn bucket_size(mut self, bucket_size: NonZeroUsize) -> Self {
        self.bucket_size = bucket_size;
        self
    }

    pub fn suggestions(mut self, suggestions: usize) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn rebalance_budget(mut self, budget: Duration) -> Self {
        self.rebalance_budget = budget;
        self
    }

    /// Seed the seeder directory.
    pub fn known_nodes(mut self, nodes: Vec<Contact>) -> Self {
        self.known_nodes = nodes;
        self
    }

    /// Defaults to a fresh [MemoryStorage].
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Build the server, restoring its bucket from storage if one was saved.
    pub fn build(self) -> Arc<NodeServer> {
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));

        let id = *self.contact.id();

        let bucket = match storage.load_bucket() {
            Some(snapshot) if snapshot.node_hex == id.to_hex() => {
                let bucket = KBucket::restore(id, self.bucket_size, &snapshot);
                debug!(node = %self.contact, contacts = bucket.len(), "Restored bucket");
                bucket
            }
            Some(snapshot) => {
                warn!(
                    node = %self.contact,
                    owner = %snapshot.node_id,
                    "Bucket file belongs to another node, starting with an empty bucket"
                );
                KBucket::new(id, self.bucket_size)
            }
            None => KBucket::new(id, self.bucket_size),
        };

        let directory = self
            .known_nodes
            .into_iter()
            .filter(|node| node.id() != &id)
            .map(|node| (*node.id(), node))
            .collect();

        Arc::new(NodeServer {
            contact: self.contact,
            role: self.role,
            suggestions: self.suggestions,
            rebalance_budget: self.rebalance_budget,
            bucket: Mutex::new(bucket),
            directory: Mutex::new(directory),
            storage,
            locks: RecordLocks::new(),
        })
    }
}

impl NodeServer {
    pub fn builder(contact: Contact) -> NodeServerBuilder {
        NodeServerBuilder {
            contact,
            role: Role::Peer,
            bucket_size: DEFAULT_BUCKET_CAPACITY,
            suggestions: DEFAULT_SUGGESTIONS,
            rebalance_budget: DEFAULT_REBALANCE_BUDGET,
            known_nodes: Vec::new(),
            storage: None,
        }
    }

    /// Build a server from a node [Config].
    pub fn from_config(
        config: &Config,
        contact: Contact,
        storage: Arc<dyn Storage>,
    ) -> Result<Arc<NodeServer>> {
        let bucket_size = NonZeroUsize::new(config.bucket_size)
            .ok_or_else(|| Error::Config("bucket size must be at least 1".into()))?;

        let known_nodes = if config.is_seeder() {
            config.resolve_known_nodes()?
        } else {
            Vec::new()
        };

        Ok(NodeServer::builder(contact)
            .role(config.role)
            .bucket_size(bucket_size)
            .suggestions(config.suggestions)
            .known_nodes(known_nodes)
            .storage(storage)
            .build())
    }

    // === Getters ===

    pub fn contact(&self) -> &Contact {
        &self.contact
    }

    pub fn id(&self) -> &Id {
        self.contact.id()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn locks(&self) -> &RecordLocks {
        &self.locks
    }

    /// Bucket contents, least recently seen first.
    pub fn bucket_contacts(&self) -> Vec<Contact> {
        self.bucket().contacts()
    }

    /// Nodes this node knows of, candidates for placement.
    ///
    /// Seeders answer with their directory, peers with their bucket and themselves.
    pub fn known_nodes(&self) -> Vec<Contact> {
        match self.role {
            Role::Seeder => self.directory().values().cloned().collect(),
            Role::Peer => {
                let mut nodes = self.bucket_contacts();
                nodes.push(self.contact.clone());
                nodes
            }
        }
    }

    // === Public Methods ===

    /// Record that `contact` was just seen, persisting the bucket if it changed.
    pub fn touch(&self, contact: Contact) -> Touched {
        if self.role == Role::Seeder && contact.id() != self.id() {
            self.directory().insert(*contact.id(), contact.clone());
        }

        let mut bucket = self.bucket();
        let touched = bucket.touch(contact);

        match &touched {
            Touched::Ignored => {}
            Touched::Evicted(evicted) => {
                debug!(node = %self.contact, %evicted, "Evicted contact from bucket");
                self.persist_bucket(&bucket);
            }
            Touched::Inserted | Touched::Refreshed => self.persist_bucket(&bucket),
        }

        touched
    }

    /// Forget a contact, returns it if it was in the bucket.
    pub fn remove_contact(&self, id: &Id) -> Option<Contact> {
        let mut bucket = self.bucket();
        let removed = bucket.remove(id);

        if removed.is_some() {
            self.persist_bucket(&bucket);
        }

        removed
    }

    /// Store a record on this node, stamping the time it was stored at.
    pub fn store_local(&self, record: &Record) -> Result<()> {
        let mut metadata = record.metadata().clone();
        metadata.stored_at_ms = now_ms();

        let record = Record::with_key(*record.key(), record.payload().clone(), metadata);

        let _guard = self.locks.lock(record.key());
        self.storage.put(&record)
    }

    /// The record under `key` if held here, else the closest contacts to it.
    ///
    /// A record that can't be read counts as absent.
    pub fn lookup_local(&self, key: &Id) -> LookupResponse {
        let record = self.storage.get(key).unwrap_or_else(|error| {
            warn!(node = %self.contact, %key, ?error, "Could not read record, treating it as absent");
            None
        });

        let found = record.map(|record| FoundRecord {
            holder: self.contact.clone(),
            record,
        });

        let nearest = if found.is_some() {
            Vec::new()
        } else {
            self.bucket().closest_to(key, self.suggestions)
        };

        LookupResponse {
            responder_id: *self.id(),
            found,
            nearest,
        }
    }

    /// Run a rebalance pass over this node's records, see [rpc::rebalance].
    pub fn rebalance(
        &self,
        transport: &dyn Transport,
        live_nodes: &[Contact],
        k: usize,
        deadline: Option<Instant>,
    ) -> Result<RebalanceReport> {
        rpc::rebalance(self, transport, live_nodes, k, deadline)
    }

    /// Handle an incoming request, `transport` is used by requests that
    /// reach out to other nodes themselves.
    pub fn handle_request(
        &self,
        transport: &dyn Transport,
        request: RequestSpecific,
    ) -> std::result::Result<ResponseSpecific, ErrorSpecific> {
        match request {
            RequestSpecific::Ping { from } => {
                self.touch(from);

                Ok(ResponseSpecific::Ping(PingResponse {
                    alive: true,
                    responder_id: *self.id(),
                    responder_alias: self.contact.alias().to_string(),
                    timestamp_ms: now_ms(),
                }))
            }
            RequestSpecific::Store { from, record } => {
                self.store_local(&record).map_err(|error| {
                    warn!(name = record.name(), ?error, "Failed to store record");
                    ErrorSpecific::generic(format!("Failed to store record: {error}"))
                })?;

                debug!(node = %self.contact, name = record.name(), %from, "Stored record");

                self.touch(from);

                Ok(ResponseSpecific::Store {
                    responder_id: *self.id(),
                })
            }
            RequestSpecific::LookupKey { key, .. } => {
                Ok(ResponseSpecific::LookupKey(self.lookup_local(&key)))
            }
            RequestSpecific::RoutingSnapshot { .. } => Ok(ResponseSpecific::Nodes {
                responder_id: *self.id(),
                nodes: self.bucket_contacts(),
            }),
            RequestSpecific::KnownNodes { .. } => Ok(ResponseSpecific::Nodes {
                responder_id: *self.id(),
                nodes: self.known_nodes(),
            }),
            RequestSpecific::Rebalance { target, nodes, k } => {
                if target != self.contact.alias() {
                    return Err(ErrorSpecific::protocol(format!(
                        "Rebalance target {target} is not this node ({})",
                        self.contact.alias()
                    )));
                }

                let deadline = Instant::now() + self.rebalance_budget;

                let report = self
                    .rebalance(transport, &nodes, k, Some(deadline))
                    .map_err(|error| {
                        ErrorSpecific::generic(format!("Failed to scan records: {error}"))
                    })?;

                Ok(ResponseSpecific::Rebalance(RebalanceResponse {
                    kept: report.kept,
                    moved: report.moved,
                    message: report.message(),
                }))
            }
        }
    }

    // === Private Methods ===

    fn bucket(&self) -> MutexGuard<'_, KBucket> {
        self.bucket
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn directory(&self) -> MutexGuard<'_, BTreeMap<Id, Contact>> {
        self.directory
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Called with the bucket lock held, so saves happen in mutation order.
    fn persist_bucket(&self, bucket: &KBucket) {
        if let Err(error) = self
            .storage
            .save_bucket(&bucket.snapshot(self.contact.alias()))
        {
            warn!(node = %self.contact, ?error, "Failed to persist bucket");
        }
    }
}
