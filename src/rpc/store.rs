//! Store a record on several holders, aggregating failures.

use std::fmt::{self, Display, Formatter};

use tracing::{debug, info};

use crate::common::{Contact, Record};

use super::Transport;

/// Send `record` to every holder, one after the other.
///
/// Returns the holders that stored it, or a [StoreError] naming every holder
/// that did not. Holders that succeeded keep the record either way.
pub fn store_to_holders(
    transport: &dyn Transport,
    from: &Contact,
    record: &Record,
    holders: &[Contact],
) -> Result<Vec<Contact>, StoreError> {
    if holders.is_empty() {
        return Err(StoreError::NoHolders);
    }

    let mut stored_at = Vec::with_capacity(holders.len());
    let mut failed = Vec::new();

    for holder in holders {
        match transport.store(from, holder, record) {
            Ok(()) => {
                debug!(name = record.name(), %holder, "Stored record");
                stored_at.push(holder.clone());
            }
            Err(error) => {
                debug!(name = record.name(), %holder, ?error, "Failed to store record");
                failed.push(StoreFailure {
                    alias: holder.alias().to_string(),
                    reason: error.to_string(),
                });
            }
        }
    }

    if failed.is_empty() {
        info!(
            name = record.name(),
            key = %record.key(),
            holders = stored_at.len(),
            "Record stored on all holders"
        );
        Ok(stored_at)
    } else {
        Err(StoreError::Partial { stored_at, failed })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreFailure {
    pub alias: String,
    pub reason: String,
}

impl Display for StoreFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.alias, self.reason)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Store fan-out errors
pub enum StoreError {
    /// Placement returned no holders, usually because no nodes are known.
    #[error("No holders to store the record at")]
    NoHolders,

    /// Some holders failed, `stored_at` lists the ones that succeeded.
    #[error("Failed to store at {}", list_failures(.failed))]
    Partial {
        stored_at: Vec<Contact>,
        failed: Vec<StoreFailure>,
    },
}

impl StoreError {
    /// Holders that stored the record despite the error.
    pub fn stored_at(&self) -> &[Contact] {
        match self {
            StoreError::NoHolders => &[],
            StoreError::Partial { stored_at, .. } => stored_at,
        }
    }
}

fn list_failures(failed: &[StoreFailure]) -> String {
    failed
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::rpc::LocalNetwork;
    use crate::server::NodeServer;
    use crate::storage::{MemoryStorage, Storage};

    #[test]
    fn partial_failure_names_failed_holders() {
        let network = LocalNetwork::new();

        let a_storage = Arc::new(MemoryStorage::new());
        let a = NodeServer::builder(Contact::unique(1))
            .storage(a_storage.clone())
            .build();
        network.add(a.clone());

        // Known but unreachable.
        let b = Contact::unique(2);

        let from = Contact::unique(0);
        let record = Record::new("CryptoKitties", vec![1, 2, 3]);

        let result = store_to_holders(&network, &from, &record, &[a.contact().clone(), b]);

        match result {
            Err(error @ StoreError::Partial { .. }) => {
                assert_eq!(error.stored_at(), &[a.contact().clone()]);
                assert!(error.to_string().contains("node2"));
                assert!(!error.to_string().contains("node1"));
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(a_storage.get(record.key()).unwrap().is_some());
    }

    #[test]
    fn no_holders() {
        let network = LocalNetwork::new();
        let record = Record::new("Pudgy Penguins", vec![]);

        assert_eq!(
            store_to_holders(&network, &Contact::unique(0), &record, &[]),
            Err(StoreError::NoHolders)
        );
    }
}
