use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KrpcMessage {
    #[serde(rename = "t", with = "serde_bytes")]
    pub transaction_id: Vec<u8>,

    #[serde(default)]
    #[serde(rename = "v", with = "serde_bytes")]
    pub version: Option<Vec<u8>>,

    #[serde(flatten)]
    pub variant: KrpcMessageVariant,
}

impl KrpcMessage {
    pub fn from_bytes(bytes: &[u8]) -> Result<KrpcMessage, serde_bencode::Error> {
        let obj = serde_bencode::from_bytes(bytes)?;
        Ok(obj)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_bencode::Error> {
        serde_bencode::to_bytes(self)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "y")]
pub enum KrpcMessageVariant {
    #[serde(rename = "q")]
    Request(KrpcRequestSpecific),

    #[serde(rename = "r")]
    Response(KrpcResponseSpecific),

    #[serde(rename = "e")]
    Error(KrpcErrorSpecific),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "q")]
pub enum KrpcRequestSpecific {
    #[serde(rename = "ping")]
    Ping {
        #[serde(rename = "a")]
        arguments: KrpcContact,
    },

    #[serde(rename = "store")]
    Store {
        #[serde(rename = "a")]
        arguments: KrpcStoreRequestArguments,
    },

    #[serde(rename = "lookup")]
    Lookup {
        #[serde(rename = "a")]
        arguments: KrpcLookupRequestArguments,
    },

    #[serde(rename = "bucket")]
    RoutingSnapshot {
        #[serde(rename = "a")]
        arguments: KrpcRequesterArguments,
    },

    #[serde(rename = "known")]
    KnownNodes {
        #[serde(rename = "a")]
        arguments: KrpcRequesterArguments,
    },

    #[serde(rename = "rebalance")]
    Rebalance {
        #[serde(rename = "a")]
        arguments: KrpcRebalanceRequestArguments,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "k")]
pub enum KrpcResponseSpecific {
    #[serde(rename = "ping")]
    Ping {
        #[serde(rename = "r")]
        arguments: KrpcPingResponseArguments,
    },

    #[serde(rename = "store")]
    Store {
        #[serde(rename = "r")]
        arguments: KrpcRequesterArguments,
    },

    #[serde(rename = "lookup")]
    Lookup {
        #[serde(rename = "r")]
        arguments: KrpcLookupResponseArguments,
    },

    #[serde(rename = "nodes")]
    Nodes {
        #[serde(rename = "r")]
        arguments: KrpcNodesResponseArguments,
    },

    #[serde(rename = "rebalance")]
    Rebalance {
        #[serde(rename = "r")]
        arguments: KrpcRebalanceResponseArguments,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KrpcErrorSpecific {
    #[serde(rename = "e")]
    pub code: i32,
    #[serde(rename = "d")]
    pub description: String,
}

// === Contacts ===

/// Only the alias and address travel, the Id is derived from the alias.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KrpcContact {
    pub alias: String,
    pub addr: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KrpcRequesterArguments {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,
}

// === Store ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KrpcStoreRequestArguments {
    pub alias: String,
    pub addr: String,

    #[serde(with = "serde_bytes")]
    pub key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub v: Vec<u8>,

    pub name: String,
    pub ttl: u32,
}

// === Lookup ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KrpcLookupRequestArguments {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub key: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KrpcLookupResponseArguments {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub key: Vec<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder: Option<KrpcContact>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub v: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,

    pub nodes: Vec<KrpcContact>,
}

// === Ping ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KrpcPingResponseArguments {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,
    pub alias: String,
    pub ts: u64,
}

// === Routing snapshot and known nodes ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KrpcNodesResponseArguments {
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,
    pub nodes: Vec<KrpcContact>,
}

// === Rebalance ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KrpcRebalanceRequestArguments {
    pub target: String,
    pub nodes: Vec<KrpcContact>,
    pub k: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KrpcRebalanceResponseArguments {
    pub kept: u32,
    pub moved: u32,
    pub msg: String,
}
