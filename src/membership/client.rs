//! Membership Client
//!
//! Runs on every file-service node. Joins the discovery service, applies
//! membership pushes to the peer directory and re-joins when pushes stop
//! arriving.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, RwLock};

use super::backoff::RejoinBackoff;
use super::directory::PeerDirectory;
use crate::config::FileMeshConfig;
use crate::error::{Error, Result};
use crate::network::{Message, PeerClient};
use crate::types::NodeAddress;

/// Membership lifecycle of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipState {
    /// Not registered with the discovery service
    Unjoined,
    /// Registered and receiving membership pushes
    Joined,
    /// No push within the expected window
    Stale,
}

impl fmt::Display for MembershipState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MembershipState::Unjoined => write!(f, "UNJOINED"),
            MembershipState::Joined => write!(f, "JOINED"),
            MembershipState::Stale => write!(f, "STALE"),
        }
    }
}

/// Timing settings for the membership client
#[derive(Debug, Clone)]
pub struct MembershipSettings {
    /// Discovery service address (host:port)
    pub discovery_address: String,
    /// JOIN round-trip timeout
    pub join_timeout: Duration,
    /// Expected interval between membership pushes
    pub push_interval: Duration,
    /// Push intervals without a push before the node is stale
    pub stale_factor: u32,
    /// Initial re-join backoff
    pub rejoin_min: Duration,
    /// Maximum re-join backoff
    pub rejoin_max: Duration,
}

impl MembershipSettings {
    /// Build settings from the node configuration
    pub fn from_config(config: &FileMeshConfig) -> Self {
        Self {
            discovery_address: config.discovery.address.clone(),
            join_timeout: config.join_timeout(),
            push_interval: config.push_interval(),
            stale_factor: config.sync.stale_factor,
            rejoin_min: Duration::from_millis(config.sync.rejoin_min_ms),
            rejoin_max: Duration::from_millis(config.sync.rejoin_max_ms),
        }
    }

    /// Longest gap between pushes before re-joining
    pub fn stale_window(&self) -> Duration {
        self.push_interval * self.stale_factor.max(1)
    }

    /// How often the supervision loop checks state
    fn check_interval(&self) -> Duration {
        (self.push_interval / 2).max(Duration::from_millis(50))
    }
}

/// Keeps the peer directory current and the discovery service informed
pub struct MembershipClient {
    /// This node's address
    local: NodeAddress,
    /// Peer directory owned by this client
    directory: Arc<PeerDirectory>,
    /// Client for the discovery service
    client: PeerClient,
    /// Timing settings
    settings: MembershipSettings,
    /// Current lifecycle state
    state: RwLock<MembershipState>,
    /// When the last snapshot was applied
    last_push: RwLock<Option<Instant>>,
    /// Delay between failed joins
    backoff: Mutex<RejoinBackoff>,
}

impl MembershipClient {
    /// Create a new membership client
    pub fn new(
        directory: Arc<PeerDirectory>,
        client: PeerClient,
        settings: MembershipSettings,
    ) -> Self {
        let backoff = RejoinBackoff::new(settings.rejoin_min, settings.rejoin_max);
        Self {
            local: directory.local().clone(),
            directory,
            client,
            settings,
            state: RwLock::new(MembershipState::Unjoined),
            last_push: RwLock::new(None),
            backoff: Mutex::new(backoff),
        }
    }

    /// Current lifecycle state
    pub async fn state(&self) -> MembershipState {
        *self.state.read().await
    }

    /// The directory this client maintains
    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.directory
    }

    /// Register with the discovery service and adopt its snapshot
    pub async fn join(&self) -> Result<usize> {
        let address = &self.settings.discovery_address;
        let request = Message::Join {
            address: self.local.clone(),
        };

        let response = self
            .client
            .request(address, request, self.settings.join_timeout)
            .await
            .map_err(|e| Error::DiscoveryUnreachable {
                address: address.clone(),
                reason: e.to_string(),
            })?;

        match response {
            Message::MembershipPush { members } => {
                let count = self.apply_snapshot(&members).await;
                tracing::info!("Joined discovery service at {} with {} peers", address, count);
                Ok(count)
            }
            other => Err(Error::DiscoveryUnreachable {
                address: address.clone(),
                reason: format!("unexpected {} in reply to Join", other.type_name()),
            }),
        }
    }

    /// Apply an unsolicited membership push and acknowledge it
    pub async fn handle_push(&self, members: &[NodeAddress]) -> Message {
        let count = self.apply_snapshot(members).await;
        tracing::debug!("Membership push applied: {} peers", count);
        Message::HeartbeatAck {
            address: self.local.clone(),
        }
    }

    /// The single path through which the directory changes
    async fn apply_snapshot(&self, members: &[NodeAddress]) -> usize {
        let count = self.directory.replace(members).await;
        *self.last_push.write().await = Some(Instant::now());
        *self.state.write().await = MembershipState::Joined;
        self.backoff.lock().await.reset();
        count
    }

    /// Whether the push window has lapsed
    pub async fn is_stale(&self) -> bool {
        match *self.last_push.read().await {
            Some(last) => last.elapsed() > self.settings.stale_window(),
            None => true,
        }
    }

    /// Run one supervision step and return the resulting state
    pub async fn tick(&self) -> MembershipState {
        let state = self.state().await;

        match state {
            MembershipState::Joined => {
                if self.is_stale().await {
                    tracing::warn!(
                        "No membership push within {:?}; marking membership stale",
                        self.settings.stale_window()
                    );
                    *self.state.write().await = MembershipState::Stale;
                    MembershipState::Stale
                } else {
                    MembershipState::Joined
                }
            }
            MembershipState::Stale | MembershipState::Unjoined => {
                if state == MembershipState::Stale {
                    tracing::info!("Re-joining discovery service");
                    *self.state.write().await = MembershipState::Unjoined;
                }

                match self.join().await {
                    Ok(_) => MembershipState::Joined,
                    Err(e) if e.is_retryable() => {
                        tracing::warn!("Join failed, will retry: {}", e);
                        MembershipState::Unjoined
                    }
                    Err(e) => {
                        tracing::error!("Join failed: {}", e);
                        MembershipState::Unjoined
                    }
                }
            }
        }
    }

    /// Supervise membership until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Membership supervision started for {} (discovery at {})",
            self.local,
            self.settings.discovery_address
        );

        loop {
            let state = self.tick().await;
            let delay = match state {
                MembershipState::Unjoined => self.backoff.lock().await.next_delay(),
                _ => self.settings.check_interval(),
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Membership supervision stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{DiscoveryService, DiscoverySettings};
    use crate::network::{PeerServer, ServerLimits, StopHandle, DEFAULT_MAX_FRAME};

    fn addr(host: &str) -> NodeAddress {
        NodeAddress::new(host, 8080, 7070)
    }

    fn settings(discovery_address: String, push_interval: Duration) -> MembershipSettings {
        MembershipSettings {
            discovery_address,
            join_timeout: Duration::from_millis(500),
            push_interval,
            stale_factor: 3,
            rejoin_min: Duration::from_millis(20),
            rejoin_max: Duration::from_millis(100),
        }
    }

    fn membership(local: NodeAddress, settings: MembershipSettings) -> MembershipClient {
        MembershipClient::new(
            Arc::new(PeerDirectory::new(local)),
            PeerClient::new(Duration::from_millis(300), DEFAULT_MAX_FRAME),
            settings,
        )
    }

    async fn start_discovery() -> (Arc<DiscoveryService>, String, StopHandle) {
        let service = Arc::new(DiscoveryService::new(
            DiscoverySettings {
                push_interval: Duration::from_secs(60),
                ack_timeout: Duration::from_millis(200),
                max_missed: 3,
            },
            PeerClient::new(Duration::from_millis(200), DEFAULT_MAX_FRAME),
        ));
        let server = PeerServer::bind("127.0.0.1:0", service.clone(), ServerLimits::default())
            .await
            .unwrap();
        let address = server.local_addr().unwrap().to_string();
        let stop = server.stop_handle();
        tokio::spawn(server.run());
        (service, address, stop)
    }

    async fn unused_address() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_join_adopts_snapshot_without_self() {
        let (service, discovery, stop) = start_discovery().await;
        service.registry().upsert(addr("node-b")).await;
        service.registry().upsert(addr("node-c")).await;

        let client = membership(addr("node-a"), settings(discovery, Duration::from_secs(10)));
        assert_eq!(client.join().await.unwrap(), 2);
        assert_eq!(client.state().await, MembershipState::Joined);
        assert_eq!(
            client.directory().addresses().await,
            vec![addr("node-b"), addr("node-c")]
        );
        assert!(service.registry().contains(&addr("node-a")).await);
        stop.stop();
    }

    #[tokio::test]
    async fn test_join_without_discovery_fails() {
        let client = membership(
            addr("node-a"),
            settings(unused_address().await, Duration::from_secs(10)),
        );

        let result = client.join().await;
        assert!(matches!(result, Err(Error::DiscoveryUnreachable { .. })));
        assert_eq!(client.state().await, MembershipState::Unjoined);
        assert_eq!(client.tick().await, MembershipState::Unjoined);
    }

    #[tokio::test]
    async fn test_rejoin_leaves_no_stale_entries() {
        let dead = unused_address().await;
        let client = membership(addr("node-a"), settings(dead, Duration::from_secs(10)));

        // Earlier view of the cluster, then the discovery service goes away
        client.handle_push(&[addr("node-old-1"), addr("node-old-2")]).await;
        assert!(client.join().await.is_err());

        let (service, discovery, stop) = start_discovery().await;
        service.registry().upsert(addr("node-new")).await;

        let client = MembershipClient {
            settings: settings(discovery, Duration::from_secs(10)),
            ..client
        };
        client.join().await.unwrap();
        assert_eq!(client.directory().addresses().await, vec![addr("node-new")]);
        stop.stop();
    }

    #[tokio::test]
    async fn test_push_is_acknowledged_and_replaces() {
        let client = membership(addr("node-a"), settings(unused_address().await, Duration::from_secs(10)));
        client.handle_push(&[addr("node-b"), addr("node-c")]).await;

        let ack = client.handle_push(&[addr("node-a"), addr("node-d")]).await;
        assert_eq!(ack, Message::HeartbeatAck { address: addr("node-a") });
        assert_eq!(client.directory().addresses().await, vec![addr("node-d")]);
        assert_eq!(client.state().await, MembershipState::Joined);
    }

    #[tokio::test]
    async fn test_missed_push_window_triggers_rejoin() {
        let (service, discovery, stop) = start_discovery().await;
        let client = membership(addr("node-a"), settings(discovery, Duration::from_millis(20)));

        assert_eq!(client.tick().await, MembershipState::Joined);
        assert_eq!(client.tick().await, MembershipState::Joined);

        // 3 x 20ms without a push
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(client.tick().await, MembershipState::Stale);

        service.registry().upsert(addr("node-b")).await;
        assert_eq!(client.tick().await, MembershipState::Joined);
        assert_eq!(client.directory().addresses().await, vec![addr("node-b")]);
        stop.stop();
    }

    #[tokio::test]
    async fn test_run_joins_and_stops() {
        let (service, discovery, stop) = start_discovery().await;
        let client = Arc::new(membership(addr("node-a"), settings(discovery, Duration::from_secs(10))));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(Arc::clone(&client).run(shutdown_rx));
        for _ in 0..50 {
            if client.state().await == MembershipState::Joined {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(client.state().await, MembershipState::Joined);
        assert!(service.registry().contains(&addr("node-a")).await);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        stop.stop();
    }
}
