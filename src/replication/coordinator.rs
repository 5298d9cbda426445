//! Replication Coordinator
//!
//! Finds the freshest copy of a file across the cluster and materializes
//! it locally before a read is served. Nothing is cached between calls.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;

use crate::config::FileMeshConfig;
use crate::error::{Error, Result};
use crate::membership::PeerDirectory;
use crate::network::{max_file_size, Message, PeerClient};
use crate::storage::{validate_filename, FileStore};
use crate::types::{FileTimestampClaim, NodeAddress, Timestamp, ABSENT};

/// Replication timeouts
#[derive(Debug, Clone)]
pub struct ReplicationSettings {
    /// Shared deadline for a freshness round
    pub freshness_timeout: Duration,
    /// Timeout for a single fetch
    pub fetch_timeout: Duration,
}

impl ReplicationSettings {
    pub fn from_config(config: &FileMeshConfig) -> Self {
        Self {
            freshness_timeout: config.freshness_timeout(),
            fetch_timeout: config.fetch_timeout(),
        }
    }
}

/// File contents pulled from a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    pub data: Vec<u8>,
    /// Owner's modification time
    pub modified: Timestamp,
}

/// Resolves and pulls the newest copy of a file
pub struct ReplicationCoordinator {
    store: Arc<dyn FileStore>,
    directory: Arc<PeerDirectory>,
    client: PeerClient,
    settings: ReplicationSettings,
}

impl ReplicationCoordinator {
    pub fn new(
        store: Arc<dyn FileStore>,
        directory: Arc<PeerDirectory>,
        client: PeerClient,
        settings: ReplicationSettings,
    ) -> Self {
        Self {
            store,
            directory,
            client,
            settings,
        }
    }

    fn local(&self) -> &NodeAddress {
        self.directory.local()
    }

    /// Run a freshness round for `filename`.
    ///
    /// Starts from the local claim (timestamp 0 when absent) and asks every
    /// known peer concurrently under one deadline. A peer claim replaces the
    /// current best only when strictly newer, so ties stay local. Failed or
    /// slow peers are left out of the comparison.
    pub async fn resolve(&self, filename: &str) -> Result<FileTimestampClaim> {
        validate_filename(filename)?;

        let local_modified = self.store.mod_time(filename).await?.unwrap_or(ABSENT);
        let mut best = FileTimestampClaim {
            filename: filename.to_string(),
            modified: local_modified,
            owner: self.local().clone(),
        };

        let peers = self.directory.addresses().await;
        if peers.is_empty() {
            return Ok(best);
        }

        let deadline = Instant::now() + self.settings.freshness_timeout;
        let checks = peers.iter().map(|peer| async move {
            (peer, self.check_freshness(peer, filename, deadline).await)
        });

        for (peer, result) in join_all(checks).await {
            match result {
                Ok(Some(modified)) if modified > best.modified => {
                    best = FileTimestampClaim {
                        filename: filename.to_string(),
                        modified,
                        owner: peer.clone(),
                    };
                }
                Ok(_) => {}
                Err(e) if e.is_peer_failure() => {
                    tracing::warn!("Freshness check for {} on {} failed: {}", filename, peer, e);
                }
                Err(e) => {
                    tracing::error!("Freshness check for {} on {} failed: {}", filename, peer, e);
                }
            }
        }

        tracing::debug!(
            "Resolved {} to {} (modified {})",
            filename,
            best.owner,
            best.modified
        );
        Ok(best)
    }

    /// Ask one peer for its modification time of `filename`
    async fn check_freshness(
        &self,
        peer: &NodeAddress,
        filename: &str,
        deadline: Instant,
    ) -> Result<Option<Timestamp>> {
        let endpoint = peer.peer_endpoint();
        let request = Message::FreshnessCheck {
            filename: filename.to_string(),
        };

        match self.client.request_until(&endpoint, request, deadline).await? {
            Message::FreshnessClaim { modified, .. } => Ok(Some(modified)),
            Message::NotFound { .. } => Ok(None),
            other => Err(unexpected(&endpoint, "FreshnessClaim", &other)),
        }
    }

    /// Pull `filename` from `owner`. No retry on failure.
    pub async fn fetch(&self, owner: &NodeAddress, filename: &str) -> Result<FetchedFile> {
        let endpoint = owner.peer_endpoint();
        let request = Message::FetchRequest {
            filename: filename.to_string(),
        };

        let response = self
            .client
            .request(&endpoint, request, self.settings.fetch_timeout)
            .await
            .map_err(|e| match e {
                Error::PeerTimeout(_) => Error::FetchTimeout {
                    address: endpoint.clone(),
                    filename: filename.to_string(),
                },
                e @ Error::PeerUnreachable { .. } => e,
                e => Error::FetchFailed {
                    address: endpoint.clone(),
                    filename: filename.to_string(),
                    reason: e.to_string(),
                },
            })?;

        match response {
            Message::FileData { data, modified, .. } => Ok(FetchedFile { data, modified }),
            other => Err(Error::FetchFailed {
                address: endpoint,
                filename: filename.to_string(),
                reason: format!("peer replied {}", describe(&other)),
            }),
        }
    }

    /// Serve a read: resolve, pull from a newer owner, then return the
    /// bytes now held locally
    pub async fn get_file(&self, filename: &str) -> Result<Vec<u8>> {
        let claim = self.resolve(filename).await?;

        if claim.is_absent() {
            return Err(Error::NotFound(filename.to_string()));
        }
        if claim.is_local(self.local()) {
            return self.store.read(filename).await;
        }

        let fetched = self.fetch(&claim.owner, filename).await?;
        self.store
            .write(filename, &fetched.data, Some(fetched.modified))
            .await?;

        tracing::info!(
            "Fetched {} from {} ({} bytes, modified {})",
            filename,
            claim.owner,
            fetched.data.len(),
            fetched.modified
        );
        Ok(fetched.data)
    }

    /// Store an upload locally. Peers pick it up on their next read.
    pub async fn put_file(&self, filename: &str, data: &[u8]) -> Result<()> {
        validate_filename(filename)?;

        // Peers could never fetch a file that does not fit in one frame
        let limit = max_file_size(self.client.max_frame());
        if data.len() > limit {
            return Err(Error::FileTooLarge {
                filename: filename.to_string(),
                size: data.len(),
                limit,
            });
        }

        self.store.write(filename, data, None).await?;
        tracing::info!("Stored {} ({} bytes)", filename, data.len());
        Ok(())
    }

    /// Names of every file held anywhere in the reachable cluster
    pub async fn cluster_index(&self) -> Result<BTreeSet<String>> {
        let mut names: BTreeSet<String> = self.store.list().await?.into_iter().collect();

        let peers = self.directory.addresses().await;
        let deadline = Instant::now() + self.settings.freshness_timeout;
        let listings = peers.iter().map(|peer| async move {
            let endpoint = peer.peer_endpoint();
            let result = self
                .client
                .request_until(&endpoint, Message::IndexListingRequest, deadline)
                .await;
            (peer, result)
        });

        for (peer, result) in join_all(listings).await {
            match result {
                Ok(Message::IndexListing { filenames }) => names.extend(filenames),
                Ok(other) => {
                    tracing::warn!("Index listing from {} failed: {}", peer, describe(&other));
                }
                Err(e) => tracing::warn!("Index listing from {} failed: {}", peer, e),
            }
        }

        Ok(names)
    }
}

fn describe(message: &Message) -> String {
    match message {
        Message::Error { code, message } => format!("{:?} error: {}", code, message),
        other => other.type_name().to_string(),
    }
}

fn unexpected(address: &str, expected: &'static str, got: &Message) -> Error {
    Error::UnexpectedResponse {
        address: address.to_string(),
        expected,
        got: describe(got),
    }
}
