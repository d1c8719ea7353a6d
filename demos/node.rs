use std::sync::mpsc::channel;

use kadnft::{
    rpc::{Config, Role},
    Dht,
};

use clap::Parser;
use tracing::{error, info, Level};

#[derive(Parser)]
#[command(author, version, about = "Run a node until interrupted", long_about = None)]
struct Cli {
    /// Read the configuration from NODE_ID, SEED, K, PORT, BOOTSTRAP, NODES, DATA_DIR...
    #[arg(long)]
    env: bool,
    /// Alias of the node, its id is derived from it
    #[arg(long, default_value = "node1")]
    alias: String,
    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,
    /// Run as the seeder
    #[arg(long)]
    seed: bool,
    /// Seeder to join through, host:port
    #[arg(long)]
    bootstrap: Option<String>,
    /// Directory to persist records and the bucket in
    #[arg(long)]
    data_dir: Option<String>,
    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_thread_names(true)
        .init();

    let config = if cli.env {
        match Config::from_env() {
            Ok(config) => config,
            Err(err) => {
                error!("Invalid configuration: {err}");
                std::process::exit(1);
            }
        }
    } else {
        let mut config = Config::new(cli.alias);

        config.port = cli.port;
        config.bootstrap = cli.bootstrap;
        config.data_dir = cli.data_dir.map(Into::into);
        if cli.seed {
            config.role = Role::Seeder;
        }

        config
    };

    let dht = match Dht::new(config) {
        Ok(dht) => dht,
        Err(err) => {
            error!("Could not start node: {err}");
            std::process::exit(1);
        }
    };

    let info = dht.info();
    info!(
        "Node {} ({}) listening on {}, reachable at {}",
        info.alias, info.id, info.local_addr, info.advertised
    );

    let (tx, rx) = channel();

    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("Error setting Ctrl-C handler");

    let _ = rx.recv();

    let info = dht.info();
    info!(
        "Shutting down with {} contacts and {} records",
        info.bucket.len(),
        info.records
    );

    dht.shutdown();
}
