//! Discovery Service
//!
//! Registers joining nodes, pushes membership snapshots on an interval
//! and evicts nodes that stop acknowledging them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::registry::{DiscoveryRegistry, PushOutcome, RoundReport};
use crate::config::FileMeshConfig;
use crate::network::{ErrorCode, Message, MessageHandler, PeerClient};
use crate::types::NodeAddress;

/// Discovery service timing
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    /// Interval between broadcast rounds
    pub push_interval: Duration,
    /// Per-node acknowledgment timeout
    pub ack_timeout: Duration,
    /// Consecutive misses before eviction
    pub max_missed: u32,
}

impl DiscoverySettings {
    pub fn from_config(config: &FileMeshConfig) -> Self {
        Self {
            push_interval: config.push_interval(),
            ack_timeout: config.ack_timeout(),
            max_missed: config.discovery.max_missed,
        }
    }
}

/// Membership authority for the cluster
pub struct DiscoveryService {
    registry: DiscoveryRegistry,
    client: PeerClient,
    settings: DiscoverySettings,
}

impl DiscoveryService {
    /// Create a service with an empty registry
    pub fn new(settings: DiscoverySettings, client: PeerClient) -> Self {
        Self {
            registry: DiscoveryRegistry::new(settings.max_missed),
            client,
            settings,
        }
    }

    /// The registry backing this service
    pub fn registry(&self) -> &DiscoveryRegistry {
        &self.registry
    }

    /// Register `address` and reply with every other member
    pub async fn handle_join(&self, address: NodeAddress) -> Message {
        self.registry.upsert(address.clone()).await;
        let members = self.registry.members_excluding(&address).await;
        Message::MembershipPush { members }
    }

    /// Push the current membership to every registered node and record
    /// who acknowledged
    pub async fn broadcast_round(&self) -> RoundReport {
        let entries = self.registry.snapshot().await;
        if entries.is_empty() {
            return RoundReport::default();
        }

        let all: Vec<NodeAddress> = entries.iter().map(|e| e.address.clone()).collect();

        let pushes = entries.into_iter().map(|entry| {
            let members: Vec<NodeAddress> = all
                .iter()
                .filter(|addr| **addr != entry.address)
                .cloned()
                .collect();

            async move {
                let acked = self.push_to(&entry.address, members).await;
                PushOutcome {
                    address: entry.address,
                    epoch: entry.epoch,
                    acked,
                }
            }
        });

        let outcomes = join_all(pushes).await;
        let report = self.registry.apply_round(&outcomes).await;

        tracing::debug!(
            "Broadcast round: {} acked, {} missed, {} evicted",
            report.acked,
            report.missed,
            report.evicted.len()
        );
        report
    }

    /// Deliver one snapshot; true when the node acknowledged it
    async fn push_to(&self, address: &NodeAddress, members: Vec<NodeAddress>) -> bool {
        let endpoint = address.peer_endpoint();
        let push = Message::MembershipPush { members };

        match self
            .client
            .request(&endpoint, push, self.settings.ack_timeout)
            .await
        {
            Ok(Message::HeartbeatAck { address: acked }) if &acked == address => true,
            Ok(other) => {
                tracing::debug!(
                    "Unexpected {} from {} in reply to push",
                    other.type_name(),
                    address
                );
                false
            }
            Err(e) => {
                tracing::debug!("Push to {} failed: {}", address, e);
                false
            }
        }
    }

    /// Broadcast every `push_interval` until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = self.settings.push_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!("Discovery broadcast loop started (every {:?})", period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.broadcast_round().await;
                    for evicted in &report.evicted {
                        tracing::info!("Node {} removed from membership", evicted);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Discovery broadcast loop stopped");
    }
}

#[async_trait::async_trait]
impl MessageHandler for DiscoveryService {
    async fn handle(&self, peer: SocketAddr, message: Message) -> Option<Message> {
        match message {
            Message::Join { address } => {
                tracing::debug!("Join from {} ({})", address, peer);
                Some(self.handle_join(address).await)
            }
            other => {
                tracing::debug!("Unsupported {} from {}", other.type_name(), peer);
                Some(Message::error(
                    ErrorCode::Unsupported,
                    format!("discovery service does not handle {}", other.type_name()),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{PeerServer, ServerLimits, StopHandle, DEFAULT_MAX_FRAME};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;

    fn addr(host: &str) -> NodeAddress {
        NodeAddress::new(host, 8080, 7070)
    }

    fn service() -> DiscoveryService {
        DiscoveryService::new(
            DiscoverySettings {
                push_interval: Duration::from_secs(60),
                ack_timeout: Duration::from_millis(200),
                max_missed: 3,
            },
            PeerClient::new(Duration::from_millis(200), DEFAULT_MAX_FRAME),
        )
    }

    /// Stand-in for a file node that records pushes
    struct FakeNode {
        address: Mutex<Option<NodeAddress>>,
        responsive: AtomicBool,
        pushes: Mutex<Vec<Vec<NodeAddress>>>,
    }

    #[async_trait::async_trait]
    impl MessageHandler for FakeNode {
        async fn handle(&self, _peer: SocketAddr, message: Message) -> Option<Message> {
            let Message::MembershipPush { members } = message else {
                return None;
            };
            self.pushes.lock().await.push(members);
            if !self.responsive.load(Ordering::SeqCst) {
                return None;
            }
            let address = self.address.lock().await.clone()?;
            Some(Message::HeartbeatAck { address })
        }
    }

    async fn fake_node() -> (Arc<FakeNode>, NodeAddress, StopHandle) {
        let node = Arc::new(FakeNode {
            address: Mutex::new(None),
            responsive: AtomicBool::new(true),
            pushes: Mutex::new(Vec::new()),
        });
        let server = PeerServer::bind("127.0.0.1:0", node.clone(), ServerLimits::default())
            .await
            .unwrap();
        let port = server.local_addr().unwrap().port();
        let address = NodeAddress::new("127.0.0.1", 8080, port);
        *node.address.lock().await = Some(address.clone());
        let stop = server.stop_handle();
        tokio::spawn(server.run());
        (node, address, stop)
    }

    async fn dead_node() -> NodeAddress {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        NodeAddress::new("127.0.0.1", 8080, port)
    }

    #[tokio::test]
    async fn test_join_reply_excludes_joiner() {
        let service = service();
        service.handle_join(addr("node-b")).await;

        let reply = service.handle_join(addr("node-a")).await;
        assert_eq!(reply, Message::MembershipPush { members: vec![addr("node-b")] });
    }

    #[tokio::test]
    async fn test_rejoin_does_not_duplicate() {
        let service = service();
        service.handle_join(addr("node-a")).await;
        service.handle_join(addr("node-b")).await;
        service.handle_join(addr("node-a")).await;

        assert_eq!(service.registry().len().await, 2);
    }

    #[tokio::test]
    async fn test_three_missed_acks_evict() {
        let service = service();
        let (live, live_addr, stop) = fake_node().await;
        let dead_addr = dead_node().await;
        service.handle_join(live_addr.clone()).await;
        service.handle_join(dead_addr.clone()).await;

        for _ in 0..2 {
            let report = service.broadcast_round().await;
            assert!(report.evicted.is_empty());
        }
        let report = service.broadcast_round().await;
        assert_eq!(report.evicted, vec![dead_addr.clone()]);
        assert!(!service.registry().contains(&dead_addr).await);

        // Later pushes neither target nor mention the evicted node
        let report = service.broadcast_round().await;
        assert_eq!(report.acked, 1);
        assert_eq!(report.missed, 0);
        let pushes = live.pushes.lock().await;
        assert_eq!(pushes.last().unwrap(), &Vec::<NodeAddress>::new());
        assert_eq!(pushes.len(), 4);
        stop.stop();
    }

    async fn missed(service: &DiscoveryService, address: &NodeAddress) -> u32 {
        service
            .registry()
            .snapshot()
            .await
            .into_iter()
            .find(|e| &e.address == address)
            .map(|e| e.missed_heartbeats)
            .unwrap()
    }

    #[tokio::test]
    async fn test_ack_resets_missed_count() {
        let service = service();
        let (node, address, stop) = fake_node().await;
        service.handle_join(address.clone()).await;

        node.responsive.store(false, Ordering::SeqCst);
        service.broadcast_round().await;
        service.broadcast_round().await;
        assert_eq!(
            missed(&service, &address).await,
            2
        );

        node.responsive.store(true, Ordering::SeqCst);
        let report = service.broadcast_round().await;
        assert_eq!(report.acked, 1);
        assert_eq!(
            missed(&service, &address).await,
            0
        );

        // Two more misses no longer reach the threshold
        node.responsive.store(false, Ordering::SeqCst);
        service.broadcast_round().await;
        service.broadcast_round().await;
        assert!(service.registry().contains(&address).await);
        stop.stop();
    }

    #[tokio::test]
    async fn test_push_excludes_recipient() {
        let service = service();
        let (first, first_addr, stop_first) = fake_node().await;
        let (second, second_addr, stop_second) = fake_node().await;
        service.handle_join(first_addr.clone()).await;
        service.handle_join(second_addr.clone()).await;

        let report = service.broadcast_round().await;
        assert_eq!(report.acked, 2);
        assert_eq!(first.pushes.lock().await[0], vec![second_addr.clone()]);
        assert_eq!(second.pushes.lock().await[0], vec![first_addr.clone()]);
        stop_first.stop();
        stop_second.stop();
    }

    #[tokio::test]
    async fn test_join_over_the_wire() {
        let service = Arc::new(service());
        service.handle_join(addr("node-b")).await;
        let server = PeerServer::bind("127.0.0.1:0", service.clone(), ServerLimits::default())
            .await
            .unwrap();
        let endpoint = server.local_addr().unwrap().to_string();
        let stop = server.stop_handle();
        tokio::spawn(server.run());

        let client = PeerClient::new(Duration::from_millis(200), DEFAULT_MAX_FRAME);
        let reply = client
            .request(
                &endpoint,
                Message::Join { address: addr("node-a") },
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(reply, Message::MembershipPush { members: vec![addr("node-b")] });

        let reply = client
            .request(&endpoint, Message::IndexListingRequest, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(matches!(
            reply,
            Message::Error { code: ErrorCode::Unsupported, .. }
        ));
        stop.stop();
    }
}
