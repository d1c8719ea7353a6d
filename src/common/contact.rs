//! Struct and implementation of the Contact entry in a k-bucket
use std::net::SocketAddr;

use crate::common::Id;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// A known node: its [Id], a human readable alias and where to reach it.
///
/// The [Id] is always derived from the alias, so two contacts with the same
/// alias are the same node.
pub struct Contact {
    id: Id,
    alias: String,
    address: SocketAddr,
}

impl Contact {
    /// Creates a new Contact from an alias and a socket address.
    pub fn new(alias: impl Into<String>, address: SocketAddr) -> Contact {
        let alias = alias.into();

        Contact {
            id: Id::derive(&alias),
            alias,
            address,
        }
    }

    /// Creates a Contact with an explicit [Id] instead of the derived one.
    ///
    /// Used for simulations that need to control positions in the Id space.
    pub fn with_id(id: Id, alias: impl Into<String>, address: SocketAddr) -> Contact {
        Contact {
            id,
            alias: alias.into(),
            address,
        }
    }

    // === Getters ===

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    #[cfg(test)]
    pub(crate) fn unique(i: usize) -> Contact {
        Contact::new(
            format!("node{i}"),
            SocketAddr::from(([127, 0, 0, 1], 8000 + i as u16)),
        )
    }
}

impl std::fmt::Display for Contact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.alias, self.address)
    }
}
