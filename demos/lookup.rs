use std::{str::FromStr, time::Instant};

use kadnft::{
    rpc::{Config, LookupOutcome, LookupTarget},
    Dht, Id,
};

use clap::Parser;

#[derive(Parser)]
#[command(author, version, about = "Find a record or a node", long_about = None)]
struct Cli {
    /// Seeder to join through, host:port
    bootstrap: String,
    /// Record name, or node id in hex with --node
    target: String,
    /// Look a node up instead of a record
    #[arg(long)]
    node: bool,
}

fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let target = if cli.node {
        match Id::from_str(&cli.target) {
            Ok(id) => LookupTarget::Node(id),
            Err(err) => {
                println!("Error: {err}");
                return;
            }
        }
    } else {
        LookupTarget::Key(Id::derive(&cli.target))
    };

    let dht = Dht::new(Config::new("lookup")).expect("Failed to start the client");

    let known = dht
        .known_nodes_at(&cli.bootstrap)
        .expect("Failed to fetch known nodes from the seeder");

    // Start from the known node farthest from the target, to show the walk.
    let Some(start_node) = known
        .iter()
        .max_by_key(|node| target.id().distance(node.id()))
    else {
        println!("The seeder knows no nodes");
        return;
    };

    println!("\nLooking up {:?} from {} ...\n", target, start_node);

    let start = Instant::now();
    let outcome = dht.lookup_from(target, start_node);

    match &outcome {
        LookupOutcome::Found { holder, record, .. } => {
            println!("Found at {holder}");
            if let Some(record) = record {
                println!(
                    "{}: {}",
                    record.name(),
                    String::from_utf8_lossy(record.payload())
                );
            }
        }
        LookupOutcome::NotFound { .. } => println!("Not found"),
        LookupOutcome::HopLimitExceeded { .. } => println!("Gave up after the hop limit"),
        LookupOutcome::Stalled { .. } => println!("Stopped getting closer"),
    }

    let path: Vec<_> = outcome.path().iter().map(|c| c.alias()).collect();
    println!(
        "\n{} hops in {:?} seconds: {:?}",
        outcome.hops(),
        start.elapsed().as_secs_f32(),
        path
    );

    dht.shutdown();
}
