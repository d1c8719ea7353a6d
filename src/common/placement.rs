//! Replica placement: which nodes are responsible for a key.

use std::vec::IntoIter;

use crate::common::{Contact, Id};

/// Default replication factor, the number of nodes holding each record.
pub const DEFAULT_REPLICATION_FACTOR: usize = 2;

/// Contacts kept sorted by ascending distance to a target, without duplicates.
///
/// Ties on distance can only happen between equal ids, which are deduplicated,
/// so the order depends only on the set of contacts added, never on the
/// order they were added in.
#[derive(Debug, Clone)]
pub struct ClosestNodes {
    target: Id,
    nodes: Vec<Contact>,
}

impl ClosestNodes {
    pub fn new(target: Id) -> Self {
        Self {
            target,
            nodes: Vec::new(),
        }
    }

    // === Getters ===

    pub fn nodes(&self) -> &[Contact] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // === Public Methods ===

    /// Insert a contact at its sorted position, returns false if its id is already present.
    pub fn add(&mut self, contact: Contact) -> bool {
        let seek = (self.target.distance(contact.id()), *contact.id());

        match self
            .nodes
            .binary_search_by(|probe| (self.target.distance(probe.id()), *probe.id()).cmp(&seek))
        {
            Err(pos) => {
                self.nodes.insert(pos, contact);
                true
            }
            Ok(_) => false,
        }
    }

    /// Remove and return the closest contact.
    pub fn pop_closest(&mut self) -> Option<Contact> {
        if self.nodes.is_empty() {
            None
        } else {
            Some(self.nodes.remove(0))
        }
    }

    /// The `k` closest contacts.
    pub fn take(mut self, k: usize) -> Vec<Contact> {
        self.nodes.truncate(k);
        self.nodes
    }
}

impl IntoIterator for ClosestNodes {
    type Item = Contact;
    type IntoIter = IntoIter<Contact>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.into_iter()
    }
}

impl<'a> IntoIterator for &'a ClosestNodes {
    type Item = &'a Contact;
    type IntoIter = std::slice::Iter<'a, Contact>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}

/// The `k` nodes responsible for `key` among `candidates`, closest first.
///
/// Returns every candidate if there are fewer than `k`, and nothing if `k == 0`.
/// Pure: the result only depends on the set of candidates.
pub fn assign<'a, I>(key: &Id, candidates: I, k: usize) -> Vec<Contact>
where
    I: IntoIterator<Item = &'a Contact>,
{
    let mut closest = ClosestNodes::new(*key);

    for contact in candidates {
        closest.add(contact.clone());
    }

    closest.take(k)
}


#[cfg(test)]
mod test {
    use std::net::SocketAddr;

    use rand::seq::SliceRandom;

    use super::*;

    fn addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 8000))
    }

    fn with_first_byte(byte: u8, alias: &str) -> Contact {
        let mut bytes = [0_u8; 20];
        bytes[0] = byte;
        Contact::with_id(Id::from(bytes), alias, addr())
    }

    #[test]
    fn add_keeps_sorted_and_unique() {
        let target = Id::random();

        let mut closest = ClosestNodes::new(target);

        for i in 0..10 {
            let contact = Contact::unique(i);
            closest.add(contact.clone());
            assert!(!closest.add(contact));
        }

        assert_eq!(closest.len(), 10);

        let distances = closest
            .nodes()
            .iter()
            .map(|n| n.id().distance(&target))
            .collect::<Vec<_>>();

        let mut sorted = distances.clone();
        sorted.sort();

        assert_eq!(sorted, distances);
    }

    #[test]
    fn three_nodes_two_replicas() {
        let key = Id::from([0_u8; 20]);

        let a = with_first_byte(1, "A");
        let b = with_first_byte(2, "B");
        let c = with_first_byte(3, "C");

        let assigned = assign(&key, &[c.clone(), a.clone(), b.clone()], 2);

        assert_eq!(assigned, vec![a, b]);
    }

    #[test]
    fn returns_k_closest() {
        let nodes: Vec<Contact> = (0..50).map(Contact::unique).collect();

        for _ in 0..20 {
            let key = Id::random();
            let k = 5;

            let assigned = assign(&key, &nodes, k);
            assert_eq!(assigned.len(), k);

            for pair in assigned.windows(2) {
                assert!(key.distance(pair[0].id()) < key.distance(pair[1].id()));
            }

            let kth = key.distance(assigned[k - 1].id());
            for node in &nodes {
                assert!(assigned.contains(node) || key.distance(node.id()) >= kth);
            }
        }
    }

    #[test]
    fn permutation_invariant() {
        let mut nodes: Vec<Contact> = (0..30).map(Contact::unique).collect();
        let key = Id::derive("Bored Ape Yacht Club");

        let expected = assign(&key, &nodes, 4);

        let mut rng = rand::thread_rng();
        for _ in 0..10 {
            nodes.shuffle(&mut rng);
            assert_eq!(assign(&key, &nodes, 4), expected);
        }
    }

    #[test]
    fn insufficient_population() {
        let nodes: Vec<Contact> = (0..3).map(Contact::unique).collect();
        let key = Id::random();

        assert_eq!(assign(&key, &nodes, 10).len(), 3);
        assert!(assign(&key, &nodes, 0).is_empty());
        assert!(assign(&key, &[], 2).is_empty());
    }

    #[test]
    fn duplicates_count_once() {
        let node = Contact::unique(1);
        let key = Id::random();

        let assigned = assign(&key, &[node.clone(), node.clone(), Contact::unique(2)], 3);

        assert_eq!(assigned.len(), 2);
    }
}
