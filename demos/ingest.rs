use kadnft::{rpc::Config, Dht};

use clap::Parser;

#[derive(Parser)]
#[command(author, version, about = "Place records on a running network", long_about = None)]
struct Cli {
    /// Seeder to join through, host:port
    bootstrap: String,
    /// Records as name=payload pairs
    #[arg(required = true)]
    records: Vec<String>,
    /// Replication factor
    #[arg(short, default_value_t = 2)]
    k: usize,
}

fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    // Not joining, so this client is never picked as a holder.
    let dht = Dht::new(Config::new("ingest").with_replication_factor(cli.k))
        .expect("Failed to start the client");

    let live = dht
        .known_nodes_at(&cli.bootstrap)
        .expect("Failed to fetch known nodes from the seeder");

    println!("Placing records on {} nodes with k={}", live.len(), cli.k);

    for entry in cli.records {
        let Some((name, payload)) = entry.split_once('=') else {
            println!("Skipping {entry:?}, expected name=payload");
            continue;
        };

        match dht.ingest_on(name, payload.as_bytes().to_vec(), &live) {
            Ok(report) => {
                let holders: Vec<_> = report.holders.iter().map(|h| h.alias()).collect();
                println!("{name} ({}) stored at {holders:?}", report.key);
            }
            Err(err) => println!("{name}: {err}"),
        }
    }

    dht.shutdown();
}
