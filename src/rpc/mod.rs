//! K-RPC implementation: the transport contract and the protocols built on it.

pub mod config;
mod local;
pub mod lookup;
pub mod rebalance;
mod socket;
mod store;

use std::fmt::Debug;
use std::net::SocketAddr;
use std::time::Duration;

use crate::common::{
    Contact, Id, LookupResponse, MessageType, PingResponse, RebalanceResponse, Record,
    RequestSpecific, ResponseSpecific,
};
use crate::{Error, Result};

pub use config::{Config, Role};
pub use local::LocalNetwork;
pub use lookup::{lookup, LookupOutcome, LookupTarget};
pub use rebalance::{rebalance, RebalanceReport, Skipped};
pub use socket::{KrpcSocket, UdpTransport};
pub use store::{store_to_holders, StoreError};

/// Default request timeout before giving up on a non-responding node.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);
/// Default number of hops a lookup may take before giving up.
pub const DEFAULT_MAX_HOPS: usize = 30;
/// Default number of closest contacts suggested in a lookup response.
pub const DEFAULT_SUGGESTIONS: usize = 5;

/// How a node reaches other nodes.
///
/// Implementors only provide [Transport::request], every other method is a
/// typed wrapper around it. Every call must return within a bounded time.
pub trait Transport: Debug + Send + Sync {
    /// Send a request to `to` and wait for its response.
    ///
    /// An error message from the remote node is returned as [Error::Remote].
    fn request(&self, to: SocketAddr, request: RequestSpecific) -> Result<ResponseSpecific>;

    /// Liveness probe, the responder touches `from` in its bucket.
    fn ping(&self, from: &Contact, to: SocketAddr) -> Result<PingResponse> {
        match self.request(to, RequestSpecific::Ping { from: from.clone() })? {
            ResponseSpecific::Ping(response) => Ok(response),
            _ => Err(Error::UnexpectedResponse("expected ping response")),
        }
    }

    /// Ask `to` to persist `record`.
    fn store(&self, from: &Contact, to: &Contact, record: &Record) -> Result<()> {
        let request = RequestSpecific::Store {
            from: from.clone(),
            record: record.clone(),
        };

        match self.request(to.address(), request)? {
            ResponseSpecific::Store { .. } => Ok(()),
            _ => Err(Error::UnexpectedResponse("expected store response")),
        }
    }

    /// Ask `to` for the record under `key`, or its closest contacts to it.
    fn lookup_key(&self, requester: &Id, to: &Contact, key: &Id) -> Result<LookupResponse> {
        let request = RequestSpecific::LookupKey {
            requester_id: *requester,
            key: *key,
        };

        match self.request(to.address(), request)? {
            ResponseSpecific::LookupKey(response) => Ok(response),
            _ => Err(Error::UnexpectedResponse("expected lookup response")),
        }
    }

    /// Contents of the bucket of `to`.
    fn routing_snapshot(&self, requester: &Id, to: &Contact) -> Result<Vec<Contact>> {
        let request = RequestSpecific::RoutingSnapshot {
            requester_id: *requester,
        };

        match self.request(to.address(), request)? {
            ResponseSpecific::Nodes { nodes, .. } => Ok(nodes),
            _ => Err(Error::UnexpectedResponse("expected nodes response")),
        }
    }

    /// Every node `to` knows of, the full membership if `to` is a seeder.
    fn known_nodes(&self, requester: &Id, to: SocketAddr) -> Result<Vec<Contact>> {
        let request = RequestSpecific::KnownNodes {
            requester_id: *requester,
        };

        match self.request(to, request)? {
            ResponseSpecific::Nodes { nodes, .. } => Ok(nodes),
            _ => Err(Error::UnexpectedResponse("expected nodes response")),
        }
    }

    /// Trigger a rebalance pass on `to`.
    fn rebalance(&self, to: &Contact, nodes: &[Contact], k: usize) -> Result<RebalanceResponse> {
        let request = RequestSpecific::Rebalance {
            target: to.alias().to_string(),
            nodes: nodes.to_vec(),
            k,
        };

        match self.request(to.address(), request)? {
            ResponseSpecific::Rebalance(response) => Ok(response),
            _ => Err(Error::UnexpectedResponse("expected rebalance response")),
        }
    }
}

/// Turn a received message into the result of a request.
pub(crate) fn into_response(message_type: MessageType) -> Result<ResponseSpecific> {
    match message_type {
        MessageType::Response(response) => Ok(response),
        MessageType::Error(error) => Err(Error::Remote {
            code: error.code,
            description: error.description,
        }),
        MessageType::Request(_) => Err(Error::UnexpectedResponse("got a request")),
    }
}
