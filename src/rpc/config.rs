use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use crate::common::{Contact, DEFAULT_BUCKET_SIZE_K, DEFAULT_REPLICATION_FACTOR, DEFAULT_TTL_SECS};
use crate::{Error, Result};

use super::{DEFAULT_MAX_HOPS, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SUGGESTIONS};

/// Port nodes listen on when none is configured from the environment.
pub const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// Keeps the directory of known nodes and ingests records.
    Seeder,
    #[default]
    Peer,
}

#[derive(Debug, Clone)]
/// Node configuration
pub struct Config {
    /// Human readable name of this node, its [crate::Id] is derived from it.
    ///
    /// Defaults to `"default"`
    pub alias: String,
    /// Defaults to [Role::Peer]
    pub role: Role,
    /// Number of nodes each record is placed on.
    ///
    /// Defaults to [DEFAULT_REPLICATION_FACTOR]
    pub replication_factor: usize,
    /// Capacity of the node's bucket.
    ///
    /// Defaults to [DEFAULT_BUCKET_SIZE_K]
    pub bucket_size: usize,
    /// Explicit port to listen on.
    ///
    /// Defaults to None, where the OS picks a free port.
    pub port: Option<u16>,
    /// Address other nodes should use to reach this node.
    ///
    /// Defaults to None, where the loopback address with the bound port is used.
    pub advertise: Option<String>,
    /// Address of the seeder to join through, `host:port`.
    ///
    /// Defaults to None, where the node starts alone.
    pub bootstrap: Option<String>,
    /// Nodes a seeder knows of before any of them pings it.
    /// Entries are `alias@host:port`, or a bare `alias` reachable at `alias:`[DEFAULT_PORT].
    ///
    /// Defaults to empty
    pub known_nodes: Vec<String>,
    /// UDP request timeout duration.
    ///
    /// Defaults to [DEFAULT_REQUEST_TIMEOUT]
    pub request_timeout: Duration,
    /// Defaults to [DEFAULT_MAX_HOPS]
    pub max_hops: usize,
    /// Number of closest contacts suggested in lookup responses.
    ///
    /// Defaults to [DEFAULT_SUGGESTIONS]
    pub suggestions: usize,
    /// Advisory time to live of ingested records, in seconds.
    ///
    /// Defaults to [DEFAULT_TTL_SECS]
    pub default_ttl_secs: u32,
    /// Directory to persist records and the bucket in.
    ///
    /// Defaults to None, where everything is kept in memory.
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            alias: "default".to_string(),
            role: Role::Peer,
            replication_factor: DEFAULT_REPLICATION_FACTOR,
            bucket_size: DEFAULT_BUCKET_SIZE_K,
            port: None,
            advertise: None,
            bootstrap: None,
            known_nodes: Vec::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_hops: DEFAULT_MAX_HOPS,
            suggestions: DEFAULT_SUGGESTIONS,
            default_ttl_secs: DEFAULT_TTL_SECS,
            data_dir: None,
        }
    }
}

impl Config {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            ..Default::default()
        }
    }

    /// Read the configuration from environment variables.
    ///
    /// | Variable      | Field                 |
    /// |---------------|-----------------------|
    /// | `NODE_ID`     | alias                 |
    /// | `SEED`        | role, seeder if `true`|
    /// | `K`           | replication_factor    |
    /// | `BUCKET_SIZE` | bucket_size           |
    /// | `PORT`        | port, else [DEFAULT_PORT] |
    /// | `ADVERTISE`   | advertise             |
    /// | `BOOTSTRAP`   | bootstrap             |
    /// | `NODES`       | known_nodes, comma separated |
    /// | `DATA_DIR`    | data_dir              |
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Same as [Config::from_env] reading variables through `var`.
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            var(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Config {
            port: Some(DEFAULT_PORT),
            ..Default::default()
        };

        if let Some(alias) = var("NODE_ID") {
            config.alias = alias;
        }
        if var("SEED").is_some_and(|seed| seed.eq_ignore_ascii_case("true")) {
            config.role = Role::Seeder;
        }
        if let Some(k) = var("K") {
            config.replication_factor = parse_number("K", &k)?;
        }
        if let Some(size) = var("BUCKET_SIZE") {
            config.bucket_size = parse_number("BUCKET_SIZE", &size)?;
        }
        if let Some(port) = var("PORT") {
            config.port = Some(parse_number("PORT", &port)?);
        }

        config.advertise = var("ADVERTISE");
        config.bootstrap = var("BOOTSTRAP");
        config.known_nodes = var("NODES")
            .map(|nodes| {
                nodes
                    .split(',')
                    .map(|node| node.trim().to_string())
                    .filter(|node| !node.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        config.data_dir = var("DATA_DIR").map(PathBuf::from);

        config.validate()?;

        Ok(config)
    }

    /// Reject settings no node can run with.
    pub fn validate(&self) -> Result<()> {
        if self.replication_factor == 0 {
            return Err(Error::Config("K must be at least 1".into()));
        }
        if self.bucket_size == 0 {
            return Err(Error::Config("BUCKET_SIZE must be at least 1".into()));
        }

        Ok(())
    }

    // === Options ===

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_replication_factor(mut self, k: usize) -> Self {
        self.replication_factor = k;
        self
    }

    pub fn with_bucket_size(mut self, size: usize) -> Self {
        self.bucket_size = size;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_bootstrap(mut self, bootstrap: impl Into<String>) -> Self {
        self.bootstrap = Some(bootstrap.into());
        self
    }

    pub fn with_known_nodes(mut self, nodes: Vec<String>) -> Self {
        self.known_nodes = nodes;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    // === Public Methods ===

    pub fn is_seeder(&self) -> bool {
        self.role == Role::Seeder
    }

    /// Resolve [Config::known_nodes] into contacts, skipping nothing.
    pub fn resolve_known_nodes(&self) -> Result<Vec<Contact>> {
        self.known_nodes.iter().map(|n| parse_node(n)).collect()
    }
}

/// Parse `alias@host:port`, or a bare `alias` reachable at `alias:`[DEFAULT_PORT].
pub fn parse_node(entry: &str) -> Result<Contact> {
    let (alias, host) = match entry.split_once('@') {
        Some((alias, host)) => (alias.to_string(), host.to_string()),
        None => (entry.to_string(), format!("{entry}:{DEFAULT_PORT}")),
    };

    if alias.is_empty() {
        return Err(Error::Config(format!("missing alias in node entry {entry:?}")));
    }

    Ok(Contact::new(alias, resolve(&host)?))
}

/// Resolve `host:port` to its first socket address.
pub fn resolve(host: &str) -> Result<SocketAddr> {
    host.to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| Error::InvalidAddress(host.to_string()))
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("{key} is not a valid number: {value:?}")))
}
