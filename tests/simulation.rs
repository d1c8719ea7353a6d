//! Membership changes on an in-process network of many nodes.
//!
//! Run with: cargo test --test simulation

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;

use kadnft::{
    assign,
    rpc::{lookup, store_to_holders, LocalNetwork, LookupTarget},
    server::NodeServer,
    storage::{MemoryStorage, Storage},
    Contact, Id, Record,
};

const K: usize = 3;

struct Node {
    server: Arc<NodeServer>,
    storage: Arc<MemoryStorage>,
}

fn network(count: usize) -> (LocalNetwork, Vec<Node>) {
    let network = LocalNetwork::new();

    let nodes: Vec<Node> = (0..count)
        .map(|i| {
            let storage = Arc::new(MemoryStorage::new());
            let server = NodeServer::builder(Contact::new(
                format!("node{i}"),
                SocketAddr::from(([10, 0, 0, 1], 8000 + i as u16)),
            ))
            .bucket_size(NonZeroUsize::new(16).unwrap())
            .storage(storage.clone())
            .build();

            network.add(server.clone());

            Node { server, storage }
        })
        .collect();

    // Everyone knows everyone, like after bootstrapping through a seeder.
    for a in &nodes {
        for b in &nodes {
            a.server.touch(b.server.contact().clone());
        }
    }

    (network, nodes)
}

fn contacts(nodes: &[Node]) -> Vec<Contact> {
    nodes.iter().map(|n| n.server.contact().clone()).collect()
}

fn names() -> Vec<String> {
    (0..40).map(|i| format!("Collection #{i}")).collect()
}

#[test]
fn records_land_on_k_closest() {
    let (network, nodes) = network(12);
    let live = contacts(&nodes);
    let from = Contact::new("seeder", SocketAddr::from(([10, 0, 0, 2], 8000)));

    for name in names() {
        let record = Record::new(name.as_str(), name.clone().into_bytes());
        let holders = assign(record.key(), &live, K);

        store_to_holders(&network, &from, &record, &holders).unwrap();
    }

    for name in names() {
        let key = Id::derive(&name);
        let holders = assign(&key, &live, K);

        for node in &nodes {
            let holds = node.storage.get(&key).unwrap().is_some();
            assert_eq!(holds, holders.contains(node.server.contact()));
        }

        // Any node can find it.
        let outcome = lookup(
            &network,
            nodes[0].server.id(),
            LookupTarget::Key(key),
            nodes[7].server.contact(),
            30,
        );
        assert!(outcome.is_found(), "{name}: {outcome:?}");
    }
}

#[test]
fn rebalance_restores_placement_after_departures() {
    let (network, nodes) = network(12);
    let live = contacts(&nodes);
    let from = Contact::new("seeder", SocketAddr::from(([10, 0, 0, 2], 8000)));

    for name in names() {
        let record = Record::new(name.as_str(), name.clone().into_bytes());
        store_to_holders(&network, &from, &record, &assign(record.key(), &live, K)).unwrap();
    }

    // Three nodes leave for good.
    let (gone, survivors) = nodes.split_at(3);
    for node in gone {
        network.set_down(node.server.contact().address(), true);
    }
    let live = contacts(survivors);

    for node in survivors {
        node.server.rebalance(&network, &live, K, None).unwrap();
    }

    for name in names() {
        let key = Id::derive(&name);
        let holders = assign(&key, &live, K);

        let copies = survivors
            .iter()
            .filter(|n| n.storage.get(&key).unwrap().is_some())
            .count();

        // Every record that survived on at least one node is fully replicated.
        if copies > 0 {
            for holder in &holders {
                let node = survivors
                    .iter()
                    .find(|n| n.server.contact() == holder)
                    .unwrap();
                assert!(node.storage.get(&key).unwrap().is_some(), "{name} missing on {holder}");
            }
            assert_eq!(copies, K, "{name}");
        }
    }

    // A second pass changes nothing.
    for node in survivors {
        let report = node.server.rebalance(&network, &live, K, None).unwrap();

        assert_eq!(report.moved, 0);
        assert_eq!(report.repaired, 0);
        assert_eq!(report.failed, 0);
    }
}
