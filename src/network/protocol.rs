//! Peer Protocol
//!
//! Defines the messages exchanged between file-service nodes and the
//! discovery service.

use serde::{Deserialize, Serialize};

use crate::types::{NodeAddress, Timestamp};

/// Protocol messages for node communication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    // ========== Peer Synchronization ==========
    /// Ask a peer for its modification time of a file
    FreshnessCheck { filename: String },

    /// Peer holds the file with this modification time
    FreshnessClaim {
        filename: String,
        modified: Timestamp,
        owner: NodeAddress,
    },

    /// Ask a peer for the contents of a file
    FetchRequest { filename: String },

    /// File contents with the owner's modification time
    FileData {
        filename: String,
        modified: Timestamp,
        data: Vec<u8>,
    },

    /// Ask a peer for the names of all files it stores
    IndexListingRequest,

    /// Names of all files a peer stores
    IndexListing { filenames: Vec<String> },

    /// Peer does not hold the requested file
    NotFound { filename: String },

    // ========== Cluster Membership ==========
    /// Register with the discovery service
    Join { address: NodeAddress },

    /// Full membership snapshot
    MembershipPush { members: Vec<NodeAddress> },

    /// Liveness acknowledgment of a membership push
    HeartbeatAck { address: NodeAddress },

    // ========== Error ==========
    /// Error response
    Error { code: ErrorCode, message: String },
}

/// Error codes for protocol errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Receiver does not handle this message type
    Unsupported,
    /// Receiver is at its connection limit
    Busy,
    /// Request arguments were rejected
    InvalidRequest,
    /// Internal error
    Internal,
}

impl Message {
    /// Serialize message to bytes
    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize message from bytes
    pub fn deserialize(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// Build an error response
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Message::Error {
            code,
            message: message.into(),
        }
    }

    /// Get the message type name (for logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::FreshnessCheck { .. } => "FreshnessCheck",
            Message::FreshnessClaim { .. } => "FreshnessClaim",
            Message::FetchRequest { .. } => "FetchRequest",
            Message::FileData { .. } => "FileData",
            Message::IndexListingRequest => "IndexListingRequest",
            Message::IndexListing { .. } => "IndexListing",
            Message::NotFound { .. } => "NotFound",
            Message::Join { .. } => "Join",
            Message::MembershipPush { .. } => "MembershipPush",
            Message::HeartbeatAck { .. } => "HeartbeatAck",
            Message::Error { .. } => "Error",
        }
    }
}

/// Frame header for length-prefixed messages
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// Message length
    pub length: u32,
    /// Message checksum
    pub checksum: u32,
}

impl FrameHeader {
    /// Header size in bytes
    pub const SIZE: usize = 8;

    /// Create a new frame header
    pub fn new(data: &[u8]) -> Self {
        Self {
            length: data.len() as u32,
            checksum: crc32fast::hash(data),
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let mut length = [0u8; 4];
        let mut checksum = [0u8; 4];
        length.copy_from_slice(&bytes[0..4]);
        checksum.copy_from_slice(&bytes[4..8]);
        Self {
            length: u32::from_le_bytes(length),
            checksum: u32::from_le_bytes(checksum),
        }
    }

    /// Check a body against this header's checksum
    pub fn verify(&self, body: &[u8]) -> bool {
        crc32fast::hash(body) == self.checksum
    }
}
