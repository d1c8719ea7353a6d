//! End to end tests over UDP, on a loopback testnet.
//!
//! Run with: cargo test --test testnet

use std::time::Duration;

use kadnft::{
    rpc::{Config, LookupTarget},
    Dht, Id, Testnet,
};

#[test]
fn ingest_on_seeder_lookup_from_peer() {
    let testnet = Testnet::new(6).unwrap();

    let names = ["Art Blocks", "Azuki", "Doodles", "Moonbirds"];

    for name in names {
        let report = testnet.nodes[0]
            .ingest(name, format!("{{\"name\":\"{name}\"}}").into_bytes())
            .unwrap();

        assert_eq!(report.key, Id::derive(name));
        assert_eq!(report.stored_at.len(), 2);
    }

    let reader = &testnet.nodes[5];

    for name in names {
        let outcome = reader.get(name);

        assert!(outcome.is_found(), "{name}: {outcome:?}");
        assert!(outcome.hops() <= reader.config().max_hops);

        let record = outcome.record().unwrap();
        assert_eq!(record.name(), name);
        assert_eq!(
            record.payload().as_ref(),
            format!("{{\"name\":\"{name}\"}}").as_bytes()
        );
    }
}

#[test]
fn missing_record_is_not_found() {
    let testnet = Testnet::new(4).unwrap();

    let outcome = testnet.nodes[1].get("Never Ingested");

    assert!(!outcome.is_found());
    assert!(outcome.hops() >= 1);
}

#[test]
fn find_node() {
    let testnet = Testnet::new(4).unwrap();

    let target = testnet.nodes[3].contact().clone();
    let outcome = testnet.nodes[1].lookup(LookupTarget::Node(*target.id()));

    assert_eq!(outcome.holder(), Some(&target));
}

#[test]
fn rebalance_after_join() {
    let testnet = Testnet::new(4).unwrap();
    let seeder = &testnet.nodes[0];

    seeder.ingest("Bored Ape Yacht Club", &b"{}"[..]).unwrap();

    // More nodes join, the responsible nodes may change.
    let late: Vec<Dht> = (0..4)
        .map(|i| {
            Dht::new(Config::new(format!("late{i}")).with_bootstrap(testnet.bootstrap.clone()))
                .unwrap()
        })
        .collect();

    let live = seeder.live_nodes();
    assert_eq!(live.len(), 7);

    for node in testnet.peers().iter().chain(late.iter()) {
        let response = seeder.rebalance_remote(node.contact(), &live).unwrap();
        assert!(response.message.contains(node.contact().alias()));
    }

    let holders = kadnft::assign(&Id::derive("Bored Ape Yacht Club"), &live, 2);

    for node in testnet.peers().iter().chain(late.iter()) {
        let holds = node.info().records == 1;
        assert_eq!(holds, holders.contains(node.contact()), "{}", node.contact());
    }

    for node in &late {
        node.shutdown();
    }
}

#[test]
fn bucket_survives_restart() {
    let dir = std::env::temp_dir().join(format!("kadnft-restart-{}", Id::random()));

    let testnet = Testnet::new(3).unwrap();

    let node = Dht::new(
        Config::new("persistent")
            .with_bootstrap(testnet.bootstrap.clone())
            .with_data_dir(&dir),
    )
    .unwrap();

    let before = node.info().bucket;
    assert_eq!(before.len(), 3);

    node.shutdown();
    drop(node);

    let restarted = Dht::new(
        Config::new("persistent")
            .with_data_dir(&dir)
            .with_request_timeout(Duration::from_millis(500)),
    )
    .unwrap();

    assert_eq!(restarted.info().bucket, before);

    restarted.shutdown();
    std::fs::remove_dir_all(dir).unwrap();
}
