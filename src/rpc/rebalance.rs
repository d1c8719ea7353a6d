//! Reconcile the records a node holds with where placement says they belong.

use std::fmt::{self, Display, Formatter};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::common::{assign, Contact, Record};
use crate::server::NodeServer;
use crate::storage::ScanEntry;
use crate::Result;

use super::{store_to_holders, StoreError, Transport};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Summary of a rebalance pass.
pub struct RebalanceReport {
    /// Alias of the rebalanced node.
    pub node: String,
    /// Records this node is still responsible for.
    pub kept: usize,
    /// Records replicated to all their holders and deleted here.
    pub moved: usize,
    /// Records kept here because some holder could not be repaired.
    pub failed: usize,
    /// Copies pushed to holders that were missing them.
    pub repaired: usize,
    pub skipped: Skipped,
    /// The deadline passed before every record was processed.
    pub interrupted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Entries a rebalance pass left alone.
pub struct Skipped {
    pub non_record: usize,
    pub unreadable: usize,
    pub unparsable: usize,
    /// Records with no holder, because there are no live nodes.
    pub unassigned: usize,
}

impl RebalanceReport {
    /// Human readable summary, as sent back in rebalance responses.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl Display for RebalanceReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Node {}: {} records kept, {} moved, {} failed, {} copies repaired. \
             skipped: non_record={} unreadable={} unparsable={} unassigned={}",
            self.node,
            self.kept,
            self.moved,
            self.failed,
            self.repaired,
            self.skipped.non_record,
            self.skipped.unreadable,
            self.skipped.unparsable,
            self.skipped.unassigned,
        )?;

        if self.interrupted {
            write!(f, " (interrupted)")?;
        }

        Ok(())
    }
}

/// Make the records held by `server` consistent with placement over `live_nodes`.
///
/// For each record: every holder other than this node is checked for a copy,
/// missing copies are pushed, and the local copy is deleted only if this node
/// is not a holder and every holder has it. Failures leave the local copy in
/// place, so running the pass again resumes where it failed. The `deadline`
/// is checked between records.
///
/// The record's key lock is held to read it and to delete it, never while
/// waiting on other nodes.
pub fn rebalance(
    server: &NodeServer,
    transport: &dyn Transport,
    live_nodes: &[Contact],
    k: usize,
    deadline: Option<Instant>,
) -> Result<RebalanceReport> {
    let mut report = RebalanceReport {
        node: server.contact().alias().to_string(),
        ..Default::default()
    };

    let entries = server.storage().scan()?;

    debug!(node = %server.contact(), entries = entries.len(), live = live_nodes.len(), k, "Rebalancing");

    for entry in entries {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            report.interrupted = true;
            break;
        }

        match entry {
            ScanEntry::Record(record) => {
                rebalance_record(server, transport, live_nodes, k, record, &mut report)
            }
            ScanEntry::NotARecord(_) => report.skipped.non_record += 1,
            ScanEntry::Unreadable(_) => report.skipped.unreadable += 1,
            ScanEntry::Unparsable(_) => report.skipped.unparsable += 1,
        }
    }

    info!(node = %server.contact(), "{report}");

    Ok(report)
}

fn rebalance_record(
    server: &NodeServer,
    transport: &dyn Transport,
    live_nodes: &[Contact],
    k: usize,
    scanned: Record,
    report: &mut RebalanceReport,
) {
    let key = *scanned.key();

    // Re-read under the lock, a concurrent store or rebalance may have won.
    // The lock is not held across requests, the holders take their own
    // locks to store.
    let record = {
        let _guard = server.locks().lock(&key);

        match server.storage().get(&key) {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(error) => {
                warn!(%key, ?error, "Could not read record while rebalancing");
                report.skipped.unreadable += 1;
                return;
            }
        }
    };

    let holders = assign(&key, live_nodes, k);

    if holders.is_empty() {
        debug!(name = record.name(), "No live holder, keeping record");
        report.skipped.unassigned += 1;
        return;
    }

    let is_holder = holders.iter().any(|holder| holder.id() == server.id());

    let missing: Vec<Contact> = holders
        .into_iter()
        .filter(|holder| holder.id() != server.id())
        .filter(|holder| match transport.lookup_key(server.id(), holder, &key) {
            Ok(response) => !response.is_found(),
            Err(error) => {
                debug!(%holder, ?error, "Existence check failed, assuming missing");
                true
            }
        })
        .collect();

    if !missing.is_empty() {
        match store_to_holders(transport, server.contact(), &record, &missing) {
            Ok(stored_at) => report.repaired += stored_at.len(),
            Err(error @ StoreError::Partial { .. }) => {
                report.repaired += error.stored_at().len();
                warn!(name = record.name(), %error, "Replication incomplete, keeping local copy");
                report.failed += 1;
                return;
            }
            Err(StoreError::NoHolders) => {}
        }
    }

    if is_holder {
        report.kept += 1;
        return;
    }

    let _guard = server.locks().lock(&key);

    // Only delete the copy that was replicated.
    match server.storage().get(&key) {
        Ok(Some(current)) if current.payload() == record.payload() => {}
        Ok(Some(_)) => {
            debug!(name = record.name(), "Record changed while rebalancing, keeping it");
            report.failed += 1;
            return;
        }
        Ok(None) => return,
        Err(error) => {
            warn!(%key, ?error, "Could not read record before deleting it");
            report.failed += 1;
            return;
        }
    }

    match server.storage().delete(&key) {
        Ok(_) => {
            debug!(name = record.name(), "Moved record off this node");
            report.moved += 1;
        }
        Err(error) => {
            warn!(name = record.name(), ?error, "Could not delete moved record");
            report.failed += 1;
        }
    }
}
