//! FileMesh Error Types

use thiserror::Error;

/// Result type alias for FileMesh operations
pub type Result<T> = std::result::Result<T, Error>;

/// FileMesh error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Configuration serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    // Wire protocol errors
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Unexpected response from {address}: expected {expected}, got {got}")]
    UnexpectedResponse {
        address: String,
        expected: &'static str,
        got: String,
    },

    // Peer errors
    #[error("Peer unreachable at {address}: {reason}")]
    PeerUnreachable { address: String, reason: String },

    #[error("Request to peer {0} timed out")]
    PeerTimeout(String),

    #[error("Discovery service unreachable at {address}: {reason}")]
    DiscoveryUnreachable { address: String, reason: String },

    // Fetch errors
    #[error("Fetch of {filename} from {address} timed out")]
    FetchTimeout { address: String, filename: String },

    #[error("Fetch of {filename} from {address} failed: {reason}")]
    FetchFailed {
        address: String,
        filename: String,
        reason: String,
    },

    // Storage errors
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid filename: {0:?}")]
    InvalidFilename(String),

    #[error("File {filename} is {size} bytes, over the {limit} byte transfer limit")]
    FileTooLarge {
        filename: String,
        size: usize,
        limit: usize,
    },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is retryable by a later client request
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::PeerUnreachable { .. }
                | Error::PeerTimeout(_)
                | Error::DiscoveryUnreachable { .. }
                | Error::FetchTimeout { .. }
                | Error::FetchFailed { .. }
                | Error::Network(_)
        )
    }

    /// Check if this error is local to a single peer exchange
    pub fn is_peer_failure(&self) -> bool {
        matches!(
            self,
            Error::PeerUnreachable { .. }
                | Error::PeerTimeout(_)
                | Error::MalformedFrame(_)
                | Error::UnexpectedResponse { .. }
                | Error::Serialization(_)
        )
    }
}
