//! In-process network of [NodeServer]s, for tests and simulations.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::trace;

use crate::common::{RequestSpecific, ResponseSpecific};
use crate::server::NodeServer;
use crate::{Error, Result};

use super::Transport;

#[derive(Debug, Clone, Default)]
/// [Transport] delivering requests straight to the handlers of registered
/// servers, keyed by their advertised address.
///
/// Clones share the same network.
pub struct LocalNetwork {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    servers: HashMap<SocketAddr, Arc<NodeServer>>,
    down: HashSet<SocketAddr>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a server at its contact's address, replacing any previous one.
    pub fn add(&self, server: Arc<NodeServer>) {
        let address = server.contact().address();

        self.lock().servers.insert(address, server);
    }

    /// Mark a server unreachable, or reachable again.
    pub fn set_down(&self, address: SocketAddr, down: bool) {
        let mut inner = self.lock();

        if down {
            inner.down.insert(address);
        } else {
            inner.down.remove(&address);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Transport for LocalNetwork {
    fn request(&self, to: SocketAddr, request: RequestSpecific) -> Result<ResponseSpecific> {
        let server = {
            let inner = self.lock();

            if inner.down.contains(&to) {
                None
            } else {
                inner.servers.get(&to).cloned()
            }
        };

        let Some(server) = server else {
            trace!(?to, ?request, "Dropping request to unreachable node");
            return Err(Error::Unreachable(to.to_string()));
        };

        // The lock is released, handlers may send requests of their own.
        server
            .handle_request(self, request)
            .map_err(|error| Error::Remote {
                code: error.code,
                description: error.description,
            })
    }
}
