//! Node wiring
//!
//! Assembles the running processes: a file-service node (peer server,
//! membership supervision, HTTP API) and the discovery service.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;

use crate::api::{AppState, HttpServer};
use crate::config::FileMeshConfig;
use crate::discovery::{DiscoveryService, DiscoverySettings};
use crate::error::Result;
use crate::membership::{MembershipClient, MembershipSettings, PeerDirectory};
use crate::network::{ErrorCode, Message, MessageHandler, PeerClient, PeerServer, ServerLimits};
use crate::replication::{FileRequestHandler, ReplicationCoordinator, ReplicationSettings};
use crate::storage::DiskStore;

/// Dispatches inbound peer messages on a file-service node
pub struct NodeHandler {
    files: FileRequestHandler,
    membership: Arc<MembershipClient>,
}

impl NodeHandler {
    pub fn new(files: FileRequestHandler, membership: Arc<MembershipClient>) -> Self {
        Self { files, membership }
    }
}

#[async_trait::async_trait]
impl MessageHandler for NodeHandler {
    async fn handle(&self, peer: SocketAddr, message: Message) -> Option<Message> {
        match message {
            Message::MembershipPush { members } => {
                Some(self.membership.handle_push(&members).await)
            }
            message if FileRequestHandler::accepts(&message) => {
                Some(self.files.respond(message).await)
            }
            other => {
                tracing::debug!("Unsupported {} from {}", other.type_name(), peer);
                Some(Message::error(
                    ErrorCode::Unsupported,
                    format!("file node does not handle {}", other.type_name()),
                ))
            }
        }
    }
}

fn server_limits(config: &FileMeshConfig) -> ServerLimits {
    ServerLimits {
        max_connections: config.sync.max_peer_connections,
        max_frame: config.max_frame_bytes(),
        ..ServerLimits::default()
    }
}

/// A file-service node
pub struct FileNode {
    config: FileMeshConfig,
    coordinator: Arc<ReplicationCoordinator>,
    membership: Arc<MembershipClient>,
    handler: Arc<NodeHandler>,
}

impl FileNode {
    /// Build a node from configuration; opens the data directory
    pub fn new(config: FileMeshConfig) -> Result<Self> {
        let local = config.node_address();
        let store = Arc::new(DiskStore::open(config.data_dir())?);
        let directory = Arc::new(PeerDirectory::new(local.clone()));
        let client = PeerClient::new(config.freshness_timeout(), config.max_frame_bytes());

        let coordinator = Arc::new(ReplicationCoordinator::new(
            store.clone(),
            Arc::clone(&directory),
            client.clone(),
            ReplicationSettings::from_config(&config),
        ));
        let membership = Arc::new(MembershipClient::new(
            directory,
            client,
            MembershipSettings::from_config(&config),
        ));
        let handler = Arc::new(NodeHandler::new(
            FileRequestHandler::new(store, local).with_max_frame(config.max_frame_bytes()),
            Arc::clone(&membership),
        ));

        Ok(Self {
            config,
            coordinator,
            membership,
            handler,
        })
    }

    pub fn coordinator(&self) -> &Arc<ReplicationCoordinator> {
        &self.coordinator
    }

    pub fn membership(&self) -> &Arc<MembershipClient> {
        &self.membership
    }

    /// Run until Ctrl+C
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received shutdown signal");
        })
        .await
    }

    /// Run until `shutdown` completes. Failing to bind the peer port or an
    /// enabled HTTP API is fatal; nothing later is.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let local = self.config.node_address();
        tracing::info!("Starting file node {}", local);
        tracing::info!("Data directory: {:?}", self.config.data_dir());
        tracing::info!("Discovery service: {}", self.config.discovery.address);

        let server = PeerServer::bind(
            &self.config.peer_bind_address(),
            self.handler.clone(),
            server_limits(&self.config),
        )
        .await?;
        let stop = server.stop_handle();

        let http = HttpServer::new(
            &self.config,
            Arc::new(AppState {
                coordinator: Arc::clone(&self.coordinator),
                membership: Arc::clone(&self.membership),
            }),
        );
        let http_listener = http.bind().await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let membership_task = tokio::spawn(Arc::clone(&self.membership).run(shutdown_rx));

        let http_task = http_listener.map(|listener| {
            tokio::spawn(async move {
                if let Err(e) = http.serve(listener).await {
                    tracing::error!("HTTP API failed: {}", e);
                }
            })
        });

        tokio::select! {
            result = server.run() => {
                if let Err(e) = result {
                    tracing::error!("Peer server error: {}", e);
                }
            }
            _ = shutdown => {}
        }

        tracing::info!("Shutting down file node {}", local);
        stop.stop();
        let _ = shutdown_tx.send(true);
        let _ = membership_task.await;
        if let Some(task) = http_task {
            task.abort();
        }

        Ok(())
    }
}

/// The discovery service process
pub struct DiscoveryNode {
    config: FileMeshConfig,
    service: Arc<DiscoveryService>,
}

impl DiscoveryNode {
    pub fn new(config: FileMeshConfig) -> Self {
        let client = PeerClient::new(config.ack_timeout(), config.max_frame_bytes());
        let service = Arc::new(DiscoveryService::new(
            DiscoverySettings::from_config(&config),
            client,
        ));
        Self { config, service }
    }

    pub fn service(&self) -> &Arc<DiscoveryService> {
        &self.service
    }

    /// Run until Ctrl+C
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received shutdown signal");
        })
        .await
    }

    /// Run until `shutdown` completes
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tracing::info!(
            "Starting discovery service on {}",
            self.config.discovery.bind_address
        );

        let server = PeerServer::bind(
            &self.config.discovery.bind_address,
            self.service.clone(),
            server_limits(&self.config),
        )
        .await?;
        let stop = server.stop_handle();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let broadcast_task = tokio::spawn(Arc::clone(&self.service).run(shutdown_rx));

        tokio::select! {
            result = server.run() => {
                if let Err(e) = result {
                    tracing::error!("Discovery server error: {}", e);
                }
            }
            _ = shutdown => {}
        }

        tracing::info!("Shutting down discovery service");
        stop.stop();
        let _ = shutdown_tx.send(true);
        let _ = broadcast_task.await;

        Ok(())
    }
}
