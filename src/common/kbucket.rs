//! Kbucket, the bounded list of contacts a node routes with.

use std::net::SocketAddr;
use std::num::NonZeroUsize;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::common::{Contact, Id};

/// K = the default maximum size of a k-bucket.
pub const DEFAULT_BUCKET_SIZE_K: usize = 8;

/// [DEFAULT_BUCKET_SIZE_K] as a bucket capacity.
pub const DEFAULT_BUCKET_CAPACITY: NonZeroUsize = match NonZeroUsize::new(DEFAULT_BUCKET_SIZE_K) {
    Some(capacity) => capacity,
    None => NonZeroUsize::MIN,
};

/// Kbuckets are LRU caches of contacts: touching a contact moves it to the
/// most recently seen end, and a full bucket evicts its least recently seen
/// contact to make room for a new one.
///
/// Eviction does not look at distance, and does not ping the evicted contact
/// first, unlike canonical Kademlia.
#[derive(Debug)]
pub struct KBucket {
    owner: Id,
    /// Keyed by contact id, iterated from most to least recently seen.
    contacts: LruCache<Id, Contact>,
}

/// What [KBucket::touch] did with the contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Touched {
    /// New contact appended, the bucket had room.
    Inserted,
    /// Known contact moved to the most recently seen position.
    Refreshed,
    /// New contact appended after evicting the least recently seen one.
    Evicted(Contact),
    /// The owner itself is never added.
    Ignored,
}

impl KBucket {
    /// Create an empty bucket for `owner` holding at most `capacity` contacts.
    pub fn new(owner: Id, capacity: NonZeroUsize) -> Self {
        KBucket {
            owner,
            contacts: LruCache::new(capacity),
        }
    }

    /// Rebuild a bucket from its persisted [BucketSnapshot].
    ///
    /// Entries are replayed oldest first, so recency order is preserved.
    /// Invalid entries are skipped, and at most `capacity` of the most recent survive.
    pub fn restore(owner: Id, capacity: NonZeroUsize, snapshot: &BucketSnapshot) -> Self {
        let mut bucket = KBucket::new(owner, capacity);

        for entry in &snapshot.bucket {
            match entry.to_contact() {
                Some(contact) => {
                    bucket.touch(contact);
                }
                None => {
                    debug!(?entry, "Skipping invalid bucket entry");
                }
            }
        }

        bucket
    }

    // === Getters ===

    pub fn owner(&self) -> &Id {
        &self.owner
    }

    pub fn capacity(&self) -> usize {
        self.contacts.cap().get()
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.contacts.contains(id)
    }

    /// Contacts ordered from least to most recently seen.
    pub fn contacts(&self) -> Vec<Contact> {
        self.contacts.iter().rev().map(|(_, c)| c.clone()).collect()
    }

    // === Public Methods ===

    /// Record that `contact` was just seen.
    pub fn touch(&mut self, contact: Contact) -> Touched {
        let id = *contact.id();

        if id == self.owner {
            return Touched::Ignored;
        }

        if self.contacts.contains(&id) {
            // Also updates the address if the node moved.
            self.contacts.put(id, contact);
            return Touched::Refreshed;
        }

        match self.contacts.push(id, contact) {
            Some((_, evicted)) => {
                trace!(?evicted, "Evicted least recently seen contact");
                Touched::Evicted(evicted)
            }
            None => Touched::Inserted,
        }
    }

    pub fn remove(&mut self, id: &Id) -> Option<Contact> {
        self.contacts.pop(id)
    }

    /// Up to `n` contacts ordered by ascending distance to `key`.
    pub fn closest_to(&self, key: &Id, n: usize) -> Vec<Contact> {
        let mut contacts = self.contacts();

        contacts.sort_by_key(|c| (key.distance(c.id()), *c.id()));
        contacts.truncate(n);

        contacts
    }

    /// Persistable form of this bucket, `alias` names the owner.
    pub fn snapshot(&self, alias: &str) -> BucketSnapshot {
        BucketSnapshot {
            node_id: alias.to_string(),
            node_hex: self.owner.to_hex(),
            bucket: self.contacts().iter().map(BucketEntry::from).collect(),
            saved_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// On disk form of a [KBucket], see [crate::storage::Storage::save_bucket].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BucketSnapshot {
    /// Alias of the owning node.
    pub node_id: String,
    /// Hex [Id] of the owning node.
    pub node_hex: String,
    /// Contacts, least recently seen first.
    pub bucket: Vec<BucketEntry>,
    /// RFC 3339 timestamp of the save.
    pub saved_at: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BucketEntry {
    pub id: String,
    pub alias: String,
    pub address: String,
}

impl BucketEntry {
    fn to_contact(&self) -> Option<Contact> {
        let id = self.id.parse::<Id>().ok()?;
        let address = self.address.parse::<SocketAddr>().ok()?;

        Some(Contact::with_id(id, self.alias.clone(), address))
    }
}

impl From<&Contact> for BucketEntry {
    fn from(contact: &Contact) -> Self {
        BucketEntry {
            id: contact.id().to_hex(),
            alias: contact.alias().to_string(),
            address: contact.address().to_string(),
        }
    }
}
