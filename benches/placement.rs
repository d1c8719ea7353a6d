//! Micro-benchmarks for placement and bucket operations: assign, bucket
//! touch and closest_to, at varying population sizes. Reports
//! nanoseconds-per-operation.
//!
//! Run: `cargo bench --bench placement`

use kadnft::{assign, Contact, Id, KBucket, DEFAULT_BUCKET_CAPACITY, DEFAULT_BUCKET_SIZE_K};
use std::net::SocketAddr;
use std::time::Instant;

fn main() {
    println!("placement\n");

    bench_assign();
    bench_touch();
    bench_closest_to();
}

fn contacts(count: usize) -> Vec<Contact> {
    (0..count)
        .map(|i| {
            Contact::new(
                format!("node{i}"),
                SocketAddr::from(([127, 0, 0, 1], 8000 + (i % 50000) as u16)),
            )
        })
        .collect()
}

fn bench_assign() {
    println!("assign (k=2)");

    for population in [10, 100, 1000] {
        let nodes = contacts(population);
        // Pre-generate keys outside the timed section
        let keys: Vec<_> = (0..1000).map(|_| Id::random()).collect();

        let start = Instant::now();
        for key in &keys {
            std::hint::black_box(assign(key, &nodes, 2));
        }
        let per_op = start.elapsed().as_nanos() / keys.len() as u128;

        println!("{population:>5} nodes: {per_op}ns/op");
    }

    println!();
}

fn bench_touch() {
    println!("touch");

    let nodes = contacts(1000);

    // Mostly evictions
    {
        let mut bucket = KBucket::new(Id::random(), DEFAULT_BUCKET_CAPACITY);
        let start = Instant::now();
        for node in nodes.iter().cloned() {
            bucket.touch(node);
        }
        let per_op = start.elapsed().as_nanos() / nodes.len() as u128;
        println!("new contacts:    {per_op}ns/op");
    }

    // Only refreshes
    {
        let mut bucket = KBucket::new(Id::random(), DEFAULT_BUCKET_CAPACITY);
        let known = &nodes[..DEFAULT_BUCKET_SIZE_K];
        for node in known.iter().cloned() {
            bucket.touch(node);
        }

        let start = Instant::now();
        for i in 0..1000 {
            bucket.touch(known[i % known.len()].clone());
        }
        let per_op = start.elapsed().as_nanos() / 1000;
        println!("known contacts:  {per_op}ns/op");
    }

    println!();
}

fn bench_closest_to() {
    println!("closest_to");

    let mut bucket = KBucket::new(Id::random(), DEFAULT_BUCKET_CAPACITY);
    for node in contacts(DEFAULT_BUCKET_SIZE_K) {
        bucket.touch(node);
    }

    let keys: Vec<_> = (0..1000).map(|_| Id::random()).collect();

    let start = Instant::now();
    for key in &keys {
        std::hint::black_box(bucket.closest_to(key, 5));
    }
    let per_op = start.elapsed().as_nanos() / keys.len() as u128;

    println!("full bucket:     {per_op}ns/op");
}
