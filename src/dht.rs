//! Dht node.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use bytes::Bytes;
use flume::{Receiver, Sender, TryRecvError};
use tracing::{debug, info, warn};

use crate::common::{assign, Contact, Id, PingResponse, RebalanceResponse, Record};
use crate::rpc::{
    config::resolve, lookup, store_to_holders, Config, KrpcSocket, LookupOutcome, LookupTarget,
    RebalanceReport, Role, StoreError, Transport, UdpTransport,
};
use crate::server::NodeServer;
use crate::storage::{FileStorage, MemoryStorage, Storage};
use crate::{Error, Result};

#[derive(Debug)]
/// A running node: listens for requests on its own thread and offers a
/// blocking client API.
///
/// Clones share the same node, dropping every clone shuts it down.
pub struct Dht {
    config: Arc<Config>,
    server: Arc<NodeServer>,
    transport: UdpTransport,
    local_addr: SocketAddr,
    sender: Sender<ActorMessage>,
    handle: Option<JoinHandle<()>>,
}

impl Clone for Dht {
    fn clone(&self) -> Self {
        Dht {
            config: self.config.clone(),
            server: self.server.clone(),
            transport: self.transport.clone(),
            local_addr: self.local_addr,
            sender: self.sender.clone(),
            handle: None,
        }
    }
}

impl Dht {
    /// Bind the listener, start serving requests and join the network
    /// through [Config::bootstrap] if set.
    ///
    /// Fails if the socket can't be bound, or the bootstrap node can't be reached.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let socket = Arc::new(KrpcSocket::bind(config.port)?);
        let local_addr = socket.local_addr();

        let advertised = match &config.advertise {
            Some(advertise) => resolve(advertise)?,
            None => SocketAddr::from(([127, 0, 0, 1], local_addr.port())),
        };
        let contact = Contact::new(config.alias.clone(), advertised);

        let storage: Arc<dyn Storage> = match &config.data_dir {
            Some(data_dir) => Arc::new(FileStorage::open(data_dir)?),
            None => Arc::new(MemoryStorage::new()),
        };

        let server = NodeServer::from_config(&config, contact, storage)?;
        let transport = UdpTransport::new(config.request_timeout);

        let (sender, receiver) = flume::unbounded();

        let handle = {
            let server = server.clone();
            let transport = transport.clone();

            thread::Builder::new()
                .name(format!("kadnft-{}", config.alias))
                .spawn(move || run(socket, server, transport, receiver))?
        };

        info!(node = %server.contact(), ?local_addr, role = ?config.role, "Node started");

        let dht = Dht {
            config: Arc::new(config),
            server,
            transport,
            local_addr,
            sender,
            handle: Some(handle),
        };

        if let Some(bootstrap) = dht.config.bootstrap.clone() {
            if let Err(error) = dht.bootstrap(&bootstrap) {
                dht.shutdown();
                return Err(error);
            }
        }

        Ok(dht)
    }

    // === Getters ===

    /// Local UDP socket address that this node is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// This node as other nodes see it.
    pub fn contact(&self) -> &Contact {
        self.server.contact()
    }

    pub fn id(&self) -> &Id {
        self.server.id()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn server(&self) -> &Arc<NodeServer> {
        &self.server
    }

    /// Information about this node.
    pub fn info(&self) -> Info {
        let records = self
            .server
            .storage()
            .scan()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| matches!(e, crate::storage::ScanEntry::Record(_)))
                    .count()
            })
            .unwrap_or_default();

        Info {
            id: *self.id(),
            alias: self.contact().alias().to_string(),
            local_addr: self.local_addr,
            advertised: self.contact().address(),
            role: self.config.role,
            bucket: self.server.bucket_contacts(),
            records,
        }
    }

    // === Public Methods ===

    /// Shutdown the listener thread.
    pub fn shutdown(&self) {
        let (sender, receiver) = flume::bounded::<()>(1);

        if self.sender.send(ActorMessage::Shutdown(sender)).is_ok() {
            let _ = receiver.recv();
        }
    }

    /// Block until the listener thread stops, see [Dht::shutdown].
    pub fn block_until_shutdown(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Ping a node, adding it to the bucket if it answers and dropping it
    /// from the bucket if it doesn't.
    pub fn ping(&self, address: SocketAddr) -> Result<PingResponse> {
        let response = match self.transport.ping(self.contact(), address) {
            Ok(response) => response,
            Err(error) => {
                let stale = self
                    .server
                    .bucket_contacts()
                    .into_iter()
                    .find(|contact| contact.address() == address);

                if let Some(stale) = stale {
                    debug!(%stale, ?error, "Dropping unresponsive contact");
                    self.server.remove_contact(stale.id());
                }

                return Err(error);
            }
        };

        self.server
            .touch(Contact::new(response.responder_alias.clone(), address));

        Ok(response)
    }

    /// Join the network through a seeder at `address` (`host:port`): ping it,
    /// then ping every node it knows of.
    ///
    /// Returns the number of nodes that answered, the seeder excluded.
    pub fn bootstrap(&self, address: &str) -> Result<usize> {
        let seeder = resolve(address)?;

        self.ping(seeder).map_err(|error| {
            warn!(?seeder, ?error, "Bootstrap node unreachable");
            Error::Bootstrap(address.to_string())
        })?;

        let nodes = self.transport.known_nodes(self.id(), seeder)?;

        let mut reached = 0;

        for node in nodes {
            if node.id() == self.id() || node.address() == seeder {
                continue;
            }

            match self.ping(node.address()) {
                Ok(_) => reached += 1,
                Err(error) => debug!(%node, ?error, "Known node did not answer"),
            }
        }

        info!(node = %self.contact(), reached, "Bootstrapped");

        Ok(reached)
    }

    /// Nodes records are placed on: the seeder's directory if this node
    /// bootstrapped through one, otherwise what this node knows.
    pub fn live_nodes(&self) -> Vec<Contact> {
        if let Some(bootstrap) = &self.config.bootstrap {
            match self.known_nodes_at(bootstrap) {
                Ok(nodes) => return nodes,
                Err(error) => {
                    warn!(?error, "Could not fetch known nodes, using own view");
                }
            }
        }

        self.server.known_nodes()
    }

    /// Nodes known by the node at `address` (`host:port`), without joining it.
    pub fn known_nodes_at(&self, address: &str) -> Result<Vec<Contact>> {
        self.transport.known_nodes(self.id(), resolve(address)?)
    }

    /// Look a record up by the name its key is derived from.
    pub fn get(&self, name: &str) -> LookupOutcome {
        self.lookup(LookupTarget::Key(Id::derive(name)))
    }

    /// Look a key or a node up, starting from this node.
    pub fn lookup(&self, target: LookupTarget) -> LookupOutcome {
        self.lookup_from(target, self.contact())
    }

    /// Look a key or a node up, starting from `start`.
    pub fn lookup_from(&self, target: LookupTarget, start: &Contact) -> LookupOutcome {
        lookup(
            &self.transport,
            self.id(),
            target,
            start,
            self.config.max_hops,
        )
    }

    /// Place a new record on the nodes responsible for it among [Dht::live_nodes].
    pub fn ingest(&self, name: &str, payload: impl Into<Bytes>) -> Result<IngestReport, StoreError> {
        self.ingest_on(name, payload, &self.live_nodes())
    }

    /// Place a new record on the nodes responsible for it among `live_nodes`.
    pub fn ingest_on(
        &self,
        name: &str,
        payload: impl Into<Bytes>,
        live_nodes: &[Contact],
    ) -> Result<IngestReport, StoreError> {
        let record = Record::new(name, payload).with_ttl(self.config.default_ttl_secs);

        let holders = assign(record.key(), live_nodes, self.config.replication_factor);

        debug!(name, key = %record.key(), ?holders, "Ingesting record");

        let stored_at = store_to_holders(&self.transport, self.contact(), &record, &holders)?;

        Ok(IngestReport {
            key: *record.key(),
            holders,
            stored_at,
        })
    }

    /// Rebalance the records of this node over `live_nodes`.
    pub fn rebalance(
        &self,
        live_nodes: &[Contact],
        deadline: Option<Instant>,
    ) -> Result<RebalanceReport> {
        self.server.rebalance(
            &self.transport,
            live_nodes,
            self.config.replication_factor,
            deadline,
        )
    }

    /// Ask `node` to rebalance its records over `live_nodes`.
    pub fn rebalance_remote(
        &self,
        node: &Contact,
        live_nodes: &[Contact],
    ) -> Result<RebalanceResponse> {
        self.transport
            .rebalance(node, live_nodes, self.config.replication_factor)
    }
}

/// Serve requests until told to shut down, or every [Dht] clone is dropped.
fn run(
    socket: Arc<KrpcSocket>,
    server: Arc<NodeServer>,
    transport: UdpTransport,
    receiver: Receiver<ActorMessage>,
) {
    loop {
        match receiver.try_recv() {
            Ok(ActorMessage::Shutdown(sender)) => {
                debug!(node = %server.contact(), "Shutting down");
                let _ = sender.send(());
                break;
            }
            Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        if let Some((transaction_id, request, from)) = socket.recv_request() {
            let socket = socket.clone();
            let server = server.clone();
            let transport = transport.clone();

            // Slow requests like rebalance must not delay pings.
            let spawned = thread::Builder::new().spawn(move || {
                let result = server.handle_request(&transport, request);
                socket.respond(from, transaction_id, result);
            });

            if let Err(error) = spawned {
                warn!(?error, "Could not spawn request worker");
            }
        }
    }
}

enum ActorMessage {
    Shutdown(Sender<()>),
}

#[derive(Debug, Clone)]
/// Information about a [Dht] node.
pub struct Info {
    pub id: Id,
    pub alias: String,
    /// Local UDP socket address that this node is listening on.
    pub local_addr: SocketAddr,
    /// Address other nodes reach this node at.
    pub advertised: SocketAddr,
    pub role: Role,
    pub bucket: Vec<Contact>,
    /// Number of records held.
    pub records: usize,
}

#[derive(Debug, Clone, PartialEq)]
/// Result of [Dht::ingest].
pub struct IngestReport {
    pub key: Id,
    /// Nodes responsible for the record.
    pub holders: Vec<Contact>,
    /// Nodes that stored it, all of the holders.
    pub stored_at: Vec<Contact>,
}

/// Create a testnet of Dht nodes on the loopback interface, to run tests
/// against instead of real nodes.
#[derive(Debug)]
pub struct Testnet {
    /// Address of the seeder, to bootstrap more nodes with.
    pub bootstrap: String,
    /// The seeder first, then the peers.
    pub nodes: Vec<Dht>,
}

impl Testnet {
    /// A seeder and `count - 1` peers bootstrapped through it.
    pub fn new(count: usize) -> Result<Testnet> {
        let seeder = Dht::new(Config::new("seeder").with_role(Role::Seeder))?;
        let bootstrap = seeder.contact().address().to_string();

        let mut nodes = vec![seeder];

        for i in 1..count {
            nodes.push(Dht::new(
                Config::new(format!("node{i}")).with_bootstrap(bootstrap.clone()),
            )?);
        }

        Ok(Testnet { bootstrap, nodes })
    }

    /// Every node but the seeder.
    pub fn peers(&self) -> &[Dht] {
        self.nodes.get(1..).unwrap_or_default()
    }
}

impl Drop for Testnet {
    fn drop(&mut self) {
        for node in &self.nodes {
            node.shutdown();
        }
    }
}
