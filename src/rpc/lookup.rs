//! Iterative, sequential, hop bounded search for a key or a node.

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::common::{ClosestNodes, Contact, Distance, Id, Record};

use super::Transport;

/// Number of consecutive hops without getting closer after which a lookup gives up.
pub const MAX_STAGNANT_HOPS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// What a lookup is looking for.
pub enum LookupTarget {
    /// A record: found when a contacted node holds it.
    Key(Id),
    /// A node: found when the contacted node is the target.
    Node(Id),
}

impl LookupTarget {
    pub fn id(&self) -> &Id {
        match self {
            LookupTarget::Key(id) | LookupTarget::Node(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Terminal state of a lookup, all carry the number of hops taken and the
/// contacts visited in order.
pub enum LookupOutcome {
    /// `record` is set for key lookups.
    Found {
        holder: Contact,
        record: Option<Record>,
        hops: usize,
        path: Vec<Contact>,
    },
    /// No unvisited candidates left.
    NotFound { hops: usize, path: Vec<Contact> },
    /// Took the maximum number of hops without finding the target.
    HopLimitExceeded { hops: usize, path: Vec<Contact> },
    /// Did not get any closer to the target for [MAX_STAGNANT_HOPS] hops.
    Stalled { hops: usize, path: Vec<Contact> },
}

impl LookupOutcome {
    pub fn hops(&self) -> usize {
        match self {
            LookupOutcome::Found { hops, .. }
            | LookupOutcome::NotFound { hops, .. }
            | LookupOutcome::HopLimitExceeded { hops, .. }
            | LookupOutcome::Stalled { hops, .. } => *hops,
        }
    }

    pub fn path(&self) -> &[Contact] {
        match self {
            LookupOutcome::Found { path, .. }
            | LookupOutcome::NotFound { path, .. }
            | LookupOutcome::HopLimitExceeded { path, .. }
            | LookupOutcome::Stalled { path, .. } => path,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, LookupOutcome::Found { .. })
    }

    pub fn holder(&self) -> Option<&Contact> {
        match self {
            LookupOutcome::Found { holder, .. } => Some(holder),
            _ => None,
        }
    }

    pub fn record(&self) -> Option<&Record> {
        match self {
            LookupOutcome::Found { record, .. } => record.as_ref(),
            _ => None,
        }
    }
}

/// Walk the network from `start` towards `target`, one contact at a time.
///
/// Each hop contacts the closest candidate not visited yet, and merges the
/// contacts it suggests into the candidates. Unreachable contacts still count
/// as hops. Never fails: every way a lookup can end is a [LookupOutcome].
pub fn lookup(
    transport: &dyn Transport,
    requester: &Id,
    target: LookupTarget,
    start: &Contact,
    max_hops: usize,
) -> LookupOutcome {
    let mut session = LookupSession::new(target, start.clone());

    if max_hops == 0 {
        return session.finish(Terminal::HopLimitExceeded);
    }

    loop {
        let Some(contact) = session.next_candidate() else {
            return session.finish(Terminal::NotFound);
        };

        match session.visit(transport, requester, &contact) {
            Some(found) => return session.finish(found),
            None => {
                if session.stagnation >= MAX_STAGNANT_HOPS {
                    return session.finish(Terminal::Stalled);
                }
                if session.candidates.is_empty() {
                    return session.finish(Terminal::NotFound);
                }
                if session.hops >= max_hops {
                    return session.finish(Terminal::HopLimitExceeded);
                }
            }
        }
    }
}

enum Terminal {
    Found(Contact, Option<Record>),
    NotFound,
    HopLimitExceeded,
    Stalled,
}

/// State of a single lookup, discarded when it ends.
struct LookupSession {
    target: LookupTarget,
    /// Unvisited candidates, closest first.
    candidates: ClosestNodes,
    visited: HashSet<Id>,
    path: Vec<Contact>,
    hops: usize,
    best: Option<Distance>,
    stagnation: usize,
}

impl LookupSession {
    fn new(target: LookupTarget, start: Contact) -> Self {
        let mut candidates = ClosestNodes::new(*target.id());
        candidates.add(start);

        trace!(?target, "New lookup");

        Self {
            target,
            candidates,
            visited: HashSet::new(),
            path: Vec::new(),
            hops: 0,
            best: None,
            stagnation: 0,
        }
    }

    /// Pop the closest candidate, mark it visited and count the hop.
    fn next_candidate(&mut self) -> Option<Contact> {
        let contact = self.candidates.pop_closest()?;

        self.visited.insert(*contact.id());
        self.path.push(contact.clone());
        self.hops += 1;

        let distance = self.target.id().distance(contact.id());

        if self.best.map_or(true, |best| distance < best) {
            self.best = Some(distance);
            self.stagnation = 0;
        } else {
            self.stagnation += 1;
        }

        Some(contact)
    }

    /// Contact a candidate, returns [Terminal::Found] or merges its suggestions.
    fn visit(
        &mut self,
        transport: &dyn Transport,
        requester: &Id,
        contact: &Contact,
    ) -> Option<Terminal> {
        let suggestions = match self.target {
            LookupTarget::Key(key) => match transport.lookup_key(requester, contact, &key) {
                Ok(response) => match response.found {
                    Some(found) => return Some(Terminal::Found(found.holder, Some(found.record))),
                    None => response.nearest,
                },
                Err(error) => {
                    debug!(%contact, ?error, hop = self.hops, "Lookup hop failed");
                    return None;
                }
            },
            LookupTarget::Node(id) => {
                if id.distance(contact.id()).is_zero() {
                    return Some(Terminal::Found(contact.clone(), None));
                }

                match transport.routing_snapshot(requester, contact) {
                    Ok(nodes) => nodes,
                    Err(error) => {
                        debug!(%contact, ?error, hop = self.hops, "Lookup hop failed");
                        return None;
                    }
                }
            }
        };

        trace!(%contact, suggestions = suggestions.len(), hop = self.hops, "Lookup hop");

        for suggestion in suggestions {
            if !self.visited.contains(suggestion.id()) {
                self.candidates.add(suggestion);
            }
        }

        None
    }

    fn finish(self, terminal: Terminal) -> LookupOutcome {
        let hops = self.hops;
        let path = self.path;

        let outcome = match terminal {
            Terminal::Found(holder, record) => LookupOutcome::Found {
                holder,
                record,
                hops,
                path,
            },
            Terminal::NotFound => LookupOutcome::NotFound { hops, path },
            Terminal::HopLimitExceeded => LookupOutcome::HopLimitExceeded { hops, path },
            Terminal::Stalled => LookupOutcome::Stalled { hops, path },
        };

        debug!(lookup_target = ?self.target, hops, found = outcome.is_found(), "Lookup done");

        outcome
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::rpc::LocalNetwork;
    use crate::server::NodeServer;
    use crate::storage::MemoryStorage;

    fn node(network: &LocalNetwork, contact: Contact) -> Arc<NodeServer> {
        let server = NodeServer::builder(contact)
            .storage(Arc::new(MemoryStorage::new()))
            .build();
        network.add(server.clone());
        server
    }

    /// A node with a chosen Id, so tests control distances.
    fn positioned(network: &LocalNetwork, first_byte: u8, port: u16) -> Arc<NodeServer> {
        let mut bytes = [0_u8; 20];
        bytes[0] = first_byte;

        node(
            network,
            Contact::with_id(
                Id::from(bytes),
                format!("n{first_byte}"),
                ([127, 0, 0, 1], port).into(),
            ),
        )
    }

    #[test]
    fn single_node_holding_key() {
        let network = LocalNetwork::new();
        let a = node(&network, Contact::unique(1));

        let record = Record::new("CryptoPunks", vec![1, 2, 3]);
        a.store_local(&record).unwrap();

        let outcome = lookup(
            &network,
            &Id::random(),
            LookupTarget::Key(*record.key()),
            a.contact(),
            30,
        );

        assert!(outcome.is_found());
        assert_eq!(outcome.hops(), 1);
        assert_eq!(outcome.holder(), Some(a.contact()));
        assert_eq!(outcome.record().map(|r| r.payload().to_vec()), Some(vec![1, 2, 3]));
    }

    #[test]
    fn lonely_node_not_found_in_one_hop() {
        let network = LocalNetwork::new();
        let a = node(&network, Contact::unique(1));

        let outcome = lookup(
            &network,
            &Id::random(),
            LookupTarget::Key(Id::derive("missing")),
            a.contact(),
            30,
        );

        assert!(matches!(outcome, LookupOutcome::NotFound { hops: 1, .. }));
    }

    #[test]
    fn unreachable_start_is_a_failed_hop() {
        let network = LocalNetwork::new();

        let outcome = lookup(
            &network,
            &Id::random(),
            LookupTarget::Key(Id::random()),
            &Contact::unique(1),
            30,
        );

        assert!(matches!(outcome, LookupOutcome::NotFound { hops: 1, .. }));
    }

    #[test]
    fn follows_suggestions_to_holder() {
        let network = LocalNetwork::new();

        let key = Id::from([0_u8; 20]);

        // Each node only knows the next one, closer to the key.
        let far = positioned(&network, 0x80, 9001);
        let mid = positioned(&network, 0x40, 9002);
        let near = positioned(&network, 0x01, 9003);

        far.touch(mid.contact().clone());
        mid.touch(near.contact().clone());

        let record = Record::with_key(key, vec![7], Default::default());
        near.store_local(&record).unwrap();

        let outcome = lookup(&network, &Id::random(), LookupTarget::Key(key), far.contact(), 30);

        assert_eq!(outcome.holder(), Some(near.contact()));
        assert_eq!(outcome.hops(), 3);
        assert_eq!(
            outcome.path(),
            &[far.contact().clone(), mid.contact().clone(), near.contact().clone()]
        );
    }

    #[test]
    fn hop_limit() {
        let network = LocalNetwork::new();
        let key = Id::from([0_u8; 20]);

        // A chain always getting closer, longer than the hop limit.
        let chain: Vec<_> = (0..8_u8)
            .map(|i| positioned(&network, 0x80 >> i, 9100 + i as u16))
            .collect();

        for pair in chain.windows(2) {
            pair[0].touch(pair[1].contact().clone());
        }

        let outcome = lookup(&network, &Id::random(), LookupTarget::Key(key), chain[0].contact(), 4);

        assert!(matches!(
            outcome,
            LookupOutcome::HopLimitExceeded { hops: 4, .. }
        ));
    }

    #[test]
    fn stalls_without_progress() {
        let network = LocalNetwork::new();
        let key = Id::from([0_u8; 20]);

        // The start is the closest node, and only knows farther ones.
        let start = positioned(&network, 0x01, 9201);
        for (i, byte) in [0x10_u8, 0x20, 0x30, 0x40].into_iter().enumerate() {
            let other = positioned(&network, byte, 9202 + i as u16);
            start.touch(other.contact().clone());
        }

        let outcome = lookup(&network, &Id::random(), LookupTarget::Key(key), start.contact(), 30);

        assert!(matches!(outcome, LookupOutcome::Stalled { hops: 3, .. }));
    }

    #[test]
    fn node_lookup() {
        let network = LocalNetwork::new();

        let a = node(&network, Contact::unique(1));
        let b = node(&network, Contact::unique(2));

        a.touch(b.contact().clone());

        let outcome = lookup(
            &network,
            a.id(),
            LookupTarget::Node(*b.id()),
            a.contact(),
            30,
        );

        assert_eq!(outcome.holder(), Some(b.contact()));
        assert_eq!(outcome.record(), None);
    }

    #[test]
    fn zero_max_hops() {
        let network = LocalNetwork::new();
        let a = node(&network, Contact::unique(1));

        let outcome = lookup(&network, &Id::random(), LookupTarget::Key(Id::random()), a.contact(), 0);

        assert!(matches!(outcome, LookupOutcome::HopLimitExceeded { hops: 0, .. }));
    }
}
