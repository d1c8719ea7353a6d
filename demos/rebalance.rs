use kadnft::{rpc::Config, Dht};

use clap::Parser;

#[derive(Parser)]
#[command(author, version, about = "Rebalance every node of a network", long_about = None)]
struct Cli {
    /// Seeder to join through, host:port
    bootstrap: String,
    /// Replication factor
    #[arg(short, default_value_t = 2)]
    k: usize,
}

fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let dht = Dht::new(Config::new("rebalance").with_replication_factor(cli.k))
        .expect("Failed to start the client");

    let live = dht
        .known_nodes_at(&cli.bootstrap)
        .expect("Failed to fetch known nodes from the seeder");

    println!("Rebalancing {} nodes with k={}", live.len(), cli.k);

    for node in &live {
        match dht.rebalance_remote(node, &live) {
            Ok(response) => println!("{}", response.message),
            Err(err) => println!("{}: {err}", node.alias()),
        }
    }

    dht.shutdown();
}
