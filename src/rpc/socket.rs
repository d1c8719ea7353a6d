//! UDP socket layer: the listening socket of a node, and the client transport.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, trace};

use crate::common::{ErrorSpecific, Message, MessageType, RequestSpecific, ResponseSpecific};
use crate::{Error, Result};

use super::{into_response, Transport, DEFAULT_REQUEST_TIMEOUT};

/// Largest payload of a UDP datagram over IPv4.
pub const MAX_PACKET_SIZE: usize = 65_507;
/// How long the listening socket blocks before checking for shutdown.
pub const MAX_THREAD_BLOCK_DURATION: Duration = Duration::from_millis(50);

const METHODS: [&str; 6] = ["ping", "store", "lookup", "bucket", "known", "rebalance"];

/// The listening socket of a node: receives requests and sends responses.
#[derive(Debug)]
pub struct KrpcSocket {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl KrpcSocket {
    /// Bind on all interfaces, on `port` or on a port picked by the OS.
    pub fn bind(port: Option<u16>) -> Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(0))))?;
        let local_addr = socket.local_addr()?;

        socket.set_read_timeout(Some(MAX_THREAD_BLOCK_DURATION))?;

        Ok(Self { socket, local_addr })
    }

    // === Getters ===

    /// Returns the address the server is listening to.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    // === Public Methods ===

    /// Receives a single request on the socket, blocking for at most
    /// [MAX_THREAD_BLOCK_DURATION].
    ///
    /// Malformed requests are answered with an error and never returned.
    pub fn recv_request(&self) -> Option<(u16, RequestSpecific, SocketAddr)> {
        let mut buf = vec![0_u8; MAX_PACKET_SIZE];

        let (amt, from) = match self.socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return None;
            }
            Err(e) => {
                trace!(context = "socket_error", ?e, "recv_from failed unexpectedly");
                return None;
            }
        };

        let bytes = &buf[..amt];

        match Message::from_bytes(bytes) {
            Ok(Message {
                transaction_id,
                message_type: MessageType::Request(request),
            }) => {
                trace!(context = "socket_message_receiving", ?request, ?from, "Received request");
                Some((transaction_id, request, from))
            }
            Ok(message) => {
                trace!(
                    context = "socket_validation",
                    ?message,
                    ?from,
                    "Unexpected response on the listening socket"
                );
                None
            }
            Err(error) => {
                trace!(
                    context = "socket_error",
                    ?error,
                    ?from,
                    message = ?String::from_utf8_lossy(bytes),
                    "Received invalid Bencode message."
                );

                self.reject(bytes, from);
                None
            }
        }
    }

    /// Send the result of handling a request back to its sender.
    pub fn respond(
        &self,
        to: SocketAddr,
        transaction_id: u16,
        result: std::result::Result<ResponseSpecific, ErrorSpecific>,
    ) {
        let message_type = match result {
            Ok(response) => MessageType::Response(response),
            Err(error) => MessageType::Error(error),
        };

        let message = Message {
            transaction_id,
            message_type,
        };

        let bytes = match message.to_bytes() {
            Ok(bytes) if bytes.len() <= MAX_PACKET_SIZE => bytes,
            Ok(bytes) => {
                debug!(size = bytes.len(), ?to, "Response too big to send");
                return self.send_error(to, transaction_id, too_big());
            }
            Err(error) => {
                debug!(?error, "Error encoding response message");
                return;
            }
        };

        trace!(context = "socket_message_sending", ?message, ?to);

        let _ = self.socket.send_to(&bytes, to).map_err(|e| {
            debug!(?e, "Error sending response message");
        });
    }

    // === Private Methods ===

    fn send_error(&self, to: SocketAddr, transaction_id: u16, error: ErrorSpecific) {
        let message = Message {
            transaction_id,
            message_type: MessageType::Error(error),
        };

        if let Ok(bytes) = message.to_bytes() {
            let _ = self.socket.send_to(&bytes, to).map_err(|e| {
                debug!(?e, "Error sending error message");
            });
        }
    }

    /// Answer an unparsable request with a protocol error, if it has a
    /// transaction id to answer to.
    fn reject(&self, bytes: &[u8], from: SocketAddr) {
        let Ok(envelope) = serde_bencode::from_bytes::<Envelope>(bytes) else {
            return;
        };

        if envelope.y.as_deref() != Some("q") || envelope.t.len() != 2 {
            return;
        }

        let transaction_id = u16::from_be_bytes([envelope.t[0], envelope.t[1]]);

        let error = match envelope.q {
            Some(method) if !METHODS.contains(&method.as_str()) => ErrorSpecific {
                code: 204,
                description: format!("Method Unknown: {method}"),
            },
            _ => ErrorSpecific::protocol("Protocol Error"),
        };

        self.send_error(from, transaction_id, error);
    }
}

/// The bare minimum of a message, to answer requests that failed to parse.
#[derive(Deserialize)]
struct Envelope {
    #[serde(with = "serde_bytes")]
    t: Vec<u8>,
    #[serde(default)]
    y: Option<String>,
    #[serde(default)]
    q: Option<String>,
}

fn too_big() -> ErrorSpecific {
    ErrorSpecific {
        code: 205,
        description: "Message too big".to_string(),
    }
}

/// [Transport] over UDP: every request uses its own ephemeral socket and
/// waits for the matching response up to the request timeout.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    request_timeout: Duration,
}

impl Default for UdpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl UdpTransport {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

impl Transport for UdpTransport {
    fn request(&self, to: SocketAddr, request: RequestSpecific) -> Result<ResponseSpecific> {
        let transaction_id: u16 = rand::random();

        let message = Message {
            transaction_id,
            message_type: MessageType::Request(request),
        };
        let bytes = message.to_bytes()?;

        if bytes.len() > MAX_PACKET_SIZE {
            return Err(Error::Remote {
                code: too_big().code,
                description: too_big().description,
            });
        }

        let bind_addr = match to {
            SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
            SocketAddr::V6(_) => SocketAddr::from(([0_u16; 8], 0)),
        };
        let socket = UdpSocket::bind(bind_addr)?;

        trace!(context = "socket_message_sending", ?message, ?to);
        socket.send_to(&bytes, to)?;

        let deadline = Instant::now() + self.request_timeout;
        let mut buf = vec![0_u8; MAX_PACKET_SIZE];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout(to.to_string()));
            }
            socket.set_read_timeout(Some(remaining))?;

            let (amt, from) = match socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(Error::Timeout(to.to_string()));
                }
                // Windows reports ICMP port unreachable as a reset.
                Err(ref e) if e.kind() == ErrorKind::ConnectionReset => {
                    return Err(Error::Unreachable(to.to_string()));
                }
                Err(e) => return Err(e.into()),
            };

            if !compare_socket_addr(&to, &from) {
                trace!(context = "socket_validation", ?from, "Response from wrong address");
                continue;
            }

            match Message::from_bytes(&buf[..amt]) {
                Ok(message) if message.transaction_id == transaction_id => {
                    trace!(context = "socket_message_receiving", ?message, ?from);
                    return into_response(message.message_type);
                }
                Ok(_) => {
                    trace!(context = "socket_validation", "Unexpected response id");
                }
                Err(error) => {
                    trace!(context = "socket_error", ?error, ?from, "Received invalid message");
                }
            }
        }
    }
}

// Same as SocketAddr::eq but ignores the ip if it is unspecified for testing reasons.
fn compare_socket_addr(a: &SocketAddr, b: &SocketAddr) -> bool {
    if a.port() != b.port() {
        return false;
    }

    if a.ip().is_unspecified() {
        return true;
    }

    a.ip() == b.ip()
}

#[cfg(test)]
mod test {
    use std::thread;

    use super::*;
    use crate::common::{Contact, Id, PingResponse};

    fn loopback(socket: &KrpcSocket) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], socket.local_addr().port()))
    }

    #[test]
    fn request_response() {
        let server = KrpcSocket::bind(None).unwrap();
        let address = loopback(&server);

        let server_thread = thread::spawn(move || loop {
            if let Some((tid, request, from)) = server.recv_request() {
                assert!(matches!(request, RequestSpecific::Ping { .. }));

                server.respond(
                    from,
                    tid,
                    Ok(ResponseSpecific::Ping(PingResponse {
                        alive: true,
                        responder_id: Id::derive("server"),
                        responder_alias: "server".into(),
                        timestamp_ms: 1,
                    })),
                );
                break;
            }
        });

        let transport = UdpTransport::default();
        let from = Contact::new("client", "127.0.0.1:1".parse().unwrap());

        let response = transport.ping(&from, address).unwrap();

        assert!(response.alive);
        assert_eq!(response.responder_id, Id::derive("server"));

        server_thread.join().unwrap();
    }

    #[test]
    fn remote_error() {
        let server = KrpcSocket::bind(None).unwrap();
        let address = loopback(&server);

        let server_thread = thread::spawn(move || loop {
            if let Some((tid, _, from)) = server.recv_request() {
                server.respond(from, tid, Err(ErrorSpecific::generic("nope")));
                break;
            }
        });

        let result = UdpTransport::default().known_nodes(&Id::random(), address);

        assert!(matches!(result, Err(Error::Remote { code: 201, .. })));

        server_thread.join().unwrap();
    }

    #[test]
    fn timeout() {
        // Bound but never answering.
        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let address = silent.local_addr().unwrap();

        let transport = UdpTransport::new(Duration::from_millis(100));
        let from = Contact::new("client", "127.0.0.1:1".parse().unwrap());

        let started = Instant::now();
        let result = transport.ping(&from, address);

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn unknown_method() {
        let server = KrpcSocket::bind(None).unwrap();
        let address = loopback(&server);

        let server_thread = thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(2);
            while Instant::now() < deadline {
                assert!(server.recv_request().is_none());
            }
        });

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        client
            .send_to(b"d1:ad2:id20:aaaaaaaaaaaaaaaaaaaae1:q4:vote1:t2:ab1:y1:qe", address)
            .unwrap();

        let mut buf = [0_u8; 1024];
        let (amt, _) = client.recv_from(&mut buf).unwrap();
        let message = Message::from_bytes(&buf[..amt]).unwrap();

        assert_eq!(message.transaction_id, u16::from_be_bytes(*b"ab"));
        assert!(matches!(
            message.message_type,
            MessageType::Error(ErrorSpecific { code: 204, .. })
        ));

        server_thread.join().unwrap();
    }
}
