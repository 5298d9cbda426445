//! Shared Types
//!
//! Node identity and the freshness claim compared during resolution.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Modification time in milliseconds since the Unix epoch. `0` means absent.
pub type Timestamp = u64;

/// Timestamp used for files that do not exist
pub const ABSENT: Timestamp = 0;

/// Network identity of a file-service node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress {
    /// Hostname or IP address
    pub host: String,
    /// Client-facing (HTTP) port
    pub client_port: u16,
    /// Peer-facing (wire protocol) port
    pub peer_port: u16,
}

impl NodeAddress {
    /// Create a new node address
    pub fn new(host: impl Into<String>, client_port: u16, peer_port: u16) -> Self {
        Self {
            host: host.into(),
            client_port,
            peer_port,
        }
    }

    /// Address other nodes connect to for peer traffic
    pub fn peer_endpoint(&self) -> String {
        format!("{}:{}", self.host, self.peer_port)
    }

    /// Address clients connect to
    pub fn client_endpoint(&self) -> String {
        format!("{}:{}", self.host, self.client_port)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.host, self.client_port, self.peer_port)
    }
}

impl FromStr for NodeAddress {
    type Err = Error;

    /// Parse `host:client_port:peer_port`
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.rsplitn(3, ':');
        let peer = parts.next();
        let client = parts.next();
        let host = parts.next();

        match (host, client, peer) {
            (Some(host), Some(client), Some(peer)) if !host.is_empty() => {
                let client_port = client
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid client port in {:?}", s)))?;
                let peer_port = peer
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid peer port in {:?}", s)))?;
                Ok(Self::new(host, client_port, peer_port))
            }
            _ => Err(Error::Config(format!(
                "node address must be host:client_port:peer_port, got {:?}",
                s
            ))),
        }
    }
}

/// A node's statement about its copy of a file at the instant it was read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTimestampClaim {
    pub filename: String,
    pub modified: Timestamp,
    pub owner: NodeAddress,
}

impl FileTimestampClaim {
    /// Whether no node holds the file
    pub fn is_absent(&self) -> bool {
        self.modified == ABSENT
    }

    /// Whether the claimed owner is `local`
    pub fn is_local(&self, local: &NodeAddress) -> bool {
        &self.owner == local
    }
}

/// Convert a system time into a protocol timestamp
pub fn timestamp_from_system_time(time: SystemTime) -> Timestamp {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(ABSENT)
}

/// Convert a protocol timestamp into a system time
pub fn system_time_from_timestamp(ts: Timestamp) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ts)
}
