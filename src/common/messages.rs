//! Serialize and deserialize Krpc messages.

mod internal;

use std::net::SocketAddr;

use crate::common::{Contact, Id, Record, RecordMetadata};
use crate::{Error, Result};

const VERSION: [u8; 4] = [75, 78, 0, 3]; // "KN" version 03

#[derive(Debug, PartialEq, Clone)]
pub struct Message {
    pub transaction_id: u16,

    pub message_type: MessageType,
}

#[derive(Debug, PartialEq, Clone)]
pub enum MessageType {
    Request(RequestSpecific),

    Response(ResponseSpecific),

    Error(ErrorSpecific),
}

#[derive(Debug, PartialEq, Clone)]
pub struct ErrorSpecific {
    pub code: i32,
    pub description: String,
}

impl ErrorSpecific {
    pub fn generic(description: impl Into<String>) -> Self {
        ErrorSpecific {
            code: 201,
            description: description.into(),
        }
    }

    pub fn protocol(description: impl Into<String>) -> Self {
        ErrorSpecific {
            code: 203,
            description: description.into(),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum RequestSpecific {
    /// Liveness probe, the responder touches `from` in its bucket.
    Ping { from: Contact },
    /// Persist a record at the responder. The record's ttl is advisory.
    Store { from: Contact, record: Record },
    /// Return the record if held locally, and the responder's closest contacts to `key`.
    LookupKey { requester_id: Id, key: Id },
    /// Return the responder's bucket contents.
    RoutingSnapshot { requester_id: Id },
    /// Return every node the responder knows of, the seeder's directory.
    KnownNodes { requester_id: Id },
    /// Reconcile the responder's records with the placement over `nodes`.
    Rebalance {
        target: String,
        nodes: Vec<Contact>,
        k: usize,
    },
}

#[derive(Debug, PartialEq, Clone)]
pub enum ResponseSpecific {
    Ping(PingResponse),
    Store { responder_id: Id },
    LookupKey(LookupResponse),
    Nodes { responder_id: Id, nodes: Vec<Contact> },
    Rebalance(RebalanceResponse),
}

// === PING ===

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PingResponse {
    /// Always true for a received response, unreachable nodes yield an Err instead.
    pub alive: bool,
    pub responder_id: Id,
    pub responder_alias: String,
    pub timestamp_ms: u64,
}

// === LOOKUP ===

#[derive(Debug, PartialEq, Clone)]
pub struct LookupResponse {
    pub responder_id: Id,
    /// Set if the responder holds the record.
    pub found: Option<FoundRecord>,
    /// Responder's closest known contacts to the key, empty when found.
    pub nearest: Vec<Contact>,
}

impl LookupResponse {
    pub fn is_found(&self) -> bool {
        self.found.is_some()
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct FoundRecord {
    pub holder: Contact,
    pub record: Record,
}

// === REBALANCE ===

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RebalanceResponse {
    pub kept: usize,
    pub moved: usize,
    pub message: String,
}

impl Message {
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Message> {
        Message::from_serde_message(internal::KrpcMessage::from_bytes(bytes.as_ref())?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.clone()
            .into_serde_message()
            .to_bytes()
            .map_err(Error::BencodeError)
    }

    fn into_serde_message(self) -> internal::KrpcMessage {
        internal::KrpcMessage {
            transaction_id: self.transaction_id.to_be_bytes().to_vec(),
            version: Some(VERSION.to_vec()),
            variant: match self.message_type {
                MessageType::Request(request) => {
                    internal::KrpcMessageVariant::Request(match request {
                        RequestSpecific::Ping { from } => internal::KrpcRequestSpecific::Ping {
                            arguments: contact_to_krpc(&from),
                        },
                        RequestSpecific::Store { from, record } => {
                            internal::KrpcRequestSpecific::Store {
                                arguments: internal::KrpcStoreRequestArguments {
                                    alias: from.alias().to_string(),
                                    addr: from.address().to_string(),
                                    key: record.key().to_vec(),
                                    v: record.payload().to_vec(),
                                    name: record.name().to_string(),
                                    ttl: record.metadata().ttl_secs,
                                },
                            }
                        }
                        RequestSpecific::LookupKey { requester_id, key } => {
                            internal::KrpcRequestSpecific::Lookup {
                                arguments: internal::KrpcLookupRequestArguments {
                                    id: requester_id.to_vec(),
                                    key: key.to_vec(),
                                },
                            }
                        }
                        RequestSpecific::RoutingSnapshot { requester_id } => {
                            internal::KrpcRequestSpecific::RoutingSnapshot {
                                arguments: internal::KrpcRequesterArguments {
                                    id: requester_id.to_vec(),
                                },
                            }
                        }
                        RequestSpecific::KnownNodes { requester_id } => {
                            internal::KrpcRequestSpecific::KnownNodes {
                                arguments: internal::KrpcRequesterArguments {
                                    id: requester_id.to_vec(),
                                },
                            }
                        }
                        RequestSpecific::Rebalance { target, nodes, k } => {
                            internal::KrpcRequestSpecific::Rebalance {
                                arguments: internal::KrpcRebalanceRequestArguments {
                                    target,
                                    nodes: nodes.iter().map(contact_to_krpc).collect(),
                                    k: k as u32,
                                },
                            }
                        }
                    })
                }

                MessageType::Response(response) => {
                    internal::KrpcMessageVariant::Response(match response {
                        ResponseSpecific::Ping(ping) => internal::KrpcResponseSpecific::Ping {
                            arguments: internal::KrpcPingResponseArguments {
                                id: ping.responder_id.to_vec(),
                                alias: ping.responder_alias,
                                ts: ping.timestamp_ms,
                            },
                        },
                        ResponseSpecific::Store { responder_id } => {
                            internal::KrpcResponseSpecific::Store {
                                arguments: internal::KrpcRequesterArguments {
                                    id: responder_id.to_vec(),
                                },
                            }
                        }
                        ResponseSpecific::LookupKey(lookup) => {
                            let (key, holder, v, name, ttl) = match &lookup.found {
                                Some(FoundRecord { holder, record }) => (
                                    record.key().to_vec(),
                                    Some(contact_to_krpc(holder)),
                                    Some(record.payload().to_vec()),
                                    Some(record.name().to_string()),
                                    Some(record.metadata().ttl_secs),
                                ),
                                None => (Vec::new(), None, None, None, None),
                            };

                            internal::KrpcResponseSpecific::Lookup {
                                arguments: internal::KrpcLookupResponseArguments {
                                    id: lookup.responder_id.to_vec(),
                                    key,
                                    holder,
                                    v,
                                    name,
                                    ttl,
                                    nodes: lookup.nearest.iter().map(contact_to_krpc).collect(),
                                },
                            }
                        }
                        ResponseSpecific::Nodes {
                            responder_id,
                            nodes,
                        } => internal::KrpcResponseSpecific::Nodes {
                            arguments: internal::KrpcNodesResponseArguments {
                                id: responder_id.to_vec(),
                                nodes: nodes.iter().map(contact_to_krpc).collect(),
                            },
                        },
                        ResponseSpecific::Rebalance(rebalance) => {
                            internal::KrpcResponseSpecific::Rebalance {
                                arguments: internal::KrpcRebalanceResponseArguments {
                                    kept: rebalance.kept as u32,
                                    moved: rebalance.moved as u32,
                                    msg: rebalance.message,
                                },
                            }
                        }
                    })
                }

                MessageType::Error(err) => {
                    internal::KrpcMessageVariant::Error(internal::KrpcErrorSpecific {
                        code: err.code,
                        description: err.description,
                    })
                }
            },
        }
    }

    fn from_serde_message(msg: internal::KrpcMessage) -> Result<Message> {
        Ok(Message {
            transaction_id: transaction_id(msg.transaction_id)?,
            message_type: match msg.variant {
                internal::KrpcMessageVariant::Request(request) => {
                    MessageType::Request(match request {
                        internal::KrpcRequestSpecific::Ping { arguments } => {
                            RequestSpecific::Ping {
                                from: contact_from_krpc(arguments)?,
                            }
                        }
                        internal::KrpcRequestSpecific::Store { arguments } => {
                            RequestSpecific::Store {
                                from: contact_from_krpc(internal::KrpcContact {
                                    alias: arguments.alias,
                                    addr: arguments.addr,
                                })?,
                                record: Record::with_key(
                                    Id::from_bytes(arguments.key)?,
                                    arguments.v,
                                    RecordMetadata {
                                        name: arguments.name,
                                        ttl_secs: arguments.ttl,
                                        stored_at_ms: 0,
                                    },
                                ),
                            }
                        }
                        internal::KrpcRequestSpecific::Lookup { arguments } => {
                            RequestSpecific::LookupKey {
                                requester_id: Id::from_bytes(arguments.id)?,
                                key: Id::from_bytes(arguments.key)?,
                            }
                        }
                        internal::KrpcRequestSpecific::RoutingSnapshot { arguments } => {
                            RequestSpecific::RoutingSnapshot {
                                requester_id: Id::from_bytes(arguments.id)?,
                            }
                        }
                        internal::KrpcRequestSpecific::KnownNodes { arguments } => {
                            RequestSpecific::KnownNodes {
                                requester_id: Id::from_bytes(arguments.id)?,
                            }
                        }
                        internal::KrpcRequestSpecific::Rebalance { arguments } => {
                            RequestSpecific::Rebalance {
                                target: arguments.target,
                                nodes: contacts_from_krpc(arguments.nodes)?,
                                k: arguments.k as usize,
                            }
                        }
                    })
                }

                internal::KrpcMessageVariant::Response(response) => {
                    MessageType::Response(match response {
                        internal::KrpcResponseSpecific::Ping { arguments } => {
                            ResponseSpecific::Ping(PingResponse {
                                alive: true,
                                responder_id: Id::from_bytes(arguments.id)?,
                                responder_alias: arguments.alias,
                                timestamp_ms: arguments.ts,
                            })
                        }
                        internal::KrpcResponseSpecific::Store { arguments } => {
                            ResponseSpecific::Store {
                                responder_id: Id::from_bytes(arguments.id)?,
                            }
                        }
                        internal::KrpcResponseSpecific::Lookup { arguments } => {
                            let found = match (arguments.holder, arguments.v) {
                                (Some(holder), Some(v)) => Some(FoundRecord {
                                    holder: contact_from_krpc(holder)?,
                                    record: Record::with_key(
                                        Id::from_bytes(arguments.key)?,
                                        v,
                                        RecordMetadata {
                                            name: arguments.name.unwrap_or_default(),
                                            ttl_secs: arguments.ttl.unwrap_or_default(),
                                            stored_at_ms: 0,
                                        },
                                    ),
                                }),
                                _ => None,
                            };

                            ResponseSpecific::LookupKey(LookupResponse {
                                responder_id: Id::from_bytes(arguments.id)?,
                                found,
                                nearest: contacts_from_krpc(arguments.nodes)?,
                            })
                        }
                        internal::KrpcResponseSpecific::Nodes { arguments } => {
                            ResponseSpecific::Nodes {
                                responder_id: Id::from_bytes(arguments.id)?,
                                nodes: contacts_from_krpc(arguments.nodes)?,
                            }
                        }
                        internal::KrpcResponseSpecific::Rebalance { arguments } => {
                            ResponseSpecific::Rebalance(RebalanceResponse {
                                kept: arguments.kept as usize,
                                moved: arguments.moved as usize,
                                message: arguments.msg,
                            })
                        }
                    })
                }

                internal::KrpcMessageVariant::Error(err) => MessageType::Error(ErrorSpecific {
                    code: err.code,
                    description: err.description,
                }),
            },
        })
    }
}

fn transaction_id(bytes: Vec<u8>) -> Result<u16> {
    if bytes.len() == 2 {
        return Ok(((bytes[0] as u16) << 8) + (bytes[1] as u16));
    }

    Err(Error::InvalidTransactionId(bytes))
}

fn contact_to_krpc(contact: &Contact) -> internal::KrpcContact {
    internal::KrpcContact {
        alias: contact.alias().to_string(),
        addr: contact.address().to_string(),
    }
}

fn contact_from_krpc(contact: internal::KrpcContact) -> Result<Contact> {
    let address: SocketAddr = contact
        .addr
        .parse()
        .map_err(|_| Error::InvalidAddress(contact.addr.clone()))?;

    Ok(Contact::new(contact.alias, address))
}

fn contacts_from_krpc(contacts: Vec<internal::KrpcContact>) -> Result<Vec<Contact>> {
    contacts.into_iter().map(contact_from_krpc).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact() -> Contact {
        Contact::new("node3", "127.0.0.1:8003".parse().unwrap())
    }

    fn round_trip(message: Message) {
        let bytes = message.to_bytes().unwrap();
        let parsed = Message::from_bytes(bytes).unwrap();

        assert_eq!(parsed, message);
    }

    #[test]
    fn ping_request() {
        round_trip(Message {
            transaction_id: 258,
            message_type: MessageType::Request(RequestSpecific::Ping { from: contact() }),
        });
    }

    #[test]
    fn store_request() {
        let record = Record::with_key(
            Id::derive("CryptoPunks"),
            vec![7; 64],
            RecordMetadata {
                name: "CryptoPunks".into(),
                ttl_secs: 86400,
                stored_at_ms: 0,
            },
        );

        round_trip(Message {
            transaction_id: 1,
            message_type: MessageType::Request(RequestSpecific::Store {
                from: contact(),
                record,
            }),
        });
    }

    #[test]
    fn lookup_response_not_found() {
        round_trip(Message {
            transaction_id: 9,
            message_type: MessageType::Response(ResponseSpecific::LookupKey(LookupResponse {
                responder_id: Id::derive("node3"),
                found: None,
                nearest: vec![contact(), Contact::new("node4", "127.0.0.1:8004".parse().unwrap())],
            })),
        });
    }

    #[test]
    fn lookup_response_found() {
        round_trip(Message {
            transaction_id: 9,
            message_type: MessageType::Response(ResponseSpecific::LookupKey(LookupResponse {
                responder_id: Id::derive("node3"),
                found: Some(FoundRecord {
                    holder: contact(),
                    record: Record::with_key(
                        Id::derive("Azuki"),
                        &b"metadata"[..],
                        RecordMetadata {
                            name: "Azuki".into(),
                            ttl_secs: 10,
                            stored_at_ms: 0,
                        },
                    ),
                }),
                nearest: vec![],
            })),
        });
    }

    #[test]
    fn rebalance_request() {
        round_trip(Message {
            transaction_id: 77,
            message_type: MessageType::Request(RequestSpecific::Rebalance {
                target: "node3".into(),
                nodes: vec![contact()],
                k: 2,
            }),
        });
    }

    #[test]
    fn error_message() {
        round_trip(Message {
            transaction_id: 3,
            message_type: MessageType::Error(ErrorSpecific {
                code: 204,
                description: "Method Unknown".into(),
            }),
        });
    }

    #[test]
    fn receiver_derives_contact_id() {
        let bytes = Message {
            transaction_id: 0,
            message_type: MessageType::Request(RequestSpecific::Ping { from: contact() }),
        }
        .to_bytes()
        .unwrap();

        match Message::from_bytes(bytes).unwrap().message_type {
            MessageType::Request(RequestSpecific::Ping { from }) => {
                assert_eq!(from.id(), &Id::derive("node3"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn invalid_bytes() {
        assert!(Message::from_bytes(b"not bencode").is_err());
    }
}
