//! Main Crate Error

#[derive(thiserror::Error, Debug)]
/// kadnft crate error enum.
pub enum Error {
    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),

    #[error("Failed to parse packet bytes: {0}")]
    BencodeError(#[from] serde_bencode::Error),

    #[error("Failed to parse bucket file: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Transaction id is not 2 bytes.
    #[error("Invalid transaction id: {0:?}")]
    InvalidTransactionId(Vec<u8>),

    /// Id bytes are not exactly [crate::common::ID_SIZE] long.
    #[error("Invalid Id size, expected 20, got {0}")]
    InvalidIdSize(usize),

    /// Id string is not 40 hex characters.
    #[error("Invalid Id encoding: {0}")]
    InvalidIdEncoding(String),

    /// Could not resolve or parse a socket address.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// No response arrived before the request timeout.
    #[error("Request to {0} timed out")]
    Timeout(String),

    /// The remote node answered with an error message.
    #[error("Remote error {code}: {description}")]
    Remote { code: i32, description: String },

    /// The remote node answered with a response of the wrong kind.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(&'static str),

    /// The destination is unknown to the transport, or marked down.
    #[error("Node unreachable: {0}")]
    Unreachable(String),

    /// The bootstrap node could not be reached at startup.
    #[error("Could not reach bootstrap node {0}")]
    Bootstrap(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Alias for `std::result::Result<T, kadnft::Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;
