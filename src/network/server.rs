//! Network Server
//!
//! TCP server for accepting connections from peers and the discovery
//! service. Inbound connections are bounded by a semaphore; beyond the
//! limit a connection is answered with a `Busy` error and closed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio_util::codec::Framed;

use super::codec::{WireCodec, DEFAULT_MAX_FRAME};
use super::protocol::{ErrorCode, Message};
use crate::error::{Error, Result};

/// Handles one decoded request and optionally produces a response
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, peer: SocketAddr, message: Message) -> Option<Message>;
}

/// Connection limits for a [`PeerServer`]
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Maximum concurrently served connections
    pub max_connections: usize,
    /// Maximum frame body size
    pub max_frame: usize,
    /// Close a connection after this long without a request
    pub idle_timeout: Duration,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: 64,
            max_frame: DEFAULT_MAX_FRAME,
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Stops a running [`PeerServer`]
#[derive(Clone)]
pub struct StopHandle {
    shutdown: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Stop accepting connections
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Network server for peer communication
pub struct PeerServer {
    /// Bound listener
    listener: TcpListener,
    /// Request handler
    handler: Arc<dyn MessageHandler>,
    /// Connection limits
    limits: ServerLimits,
    /// Permits for concurrently served connections
    permits: Arc<Semaphore>,
    /// Shutdown signal
    shutdown: Arc<watch::Sender<bool>>,
}

impl PeerServer {
    /// Bind the listener. Failing to bind is fatal for the caller.
    pub async fn bind(
        bind_address: &str,
        handler: Arc<dyn MessageHandler>,
        limits: ServerLimits,
    ) -> Result<Self> {
        let listener = TcpListener::bind(bind_address).await.map_err(|e| {
            Error::Network(format!("failed to bind {}: {}", bind_address, e))
        })?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            listener,
            handler,
            permits: Arc::new(Semaphore::new(limits.max_connections.max(1))),
            limits,
            shutdown: Arc::new(shutdown_tx),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle that stops [`PeerServer::run`]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Accept connections until stopped
    pub async fn run(self) -> Result<()> {
        let local = self.local_addr()?;
        tracing::info!("Peer server listening on {}", local);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((socket, peer)) => self.dispatch(socket, peer),
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Peer server on {} stopped", local);
        Ok(())
    }

    /// Serve an accepted connection, or reject it when at capacity
    fn dispatch(&self, socket: TcpStream, peer: SocketAddr) {
        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!(
                    "Rejecting connection from {}: {} connections in flight",
                    peer,
                    self.limits.max_connections
                );
                let codec = WireCodec::new(self.limits.max_frame);
                tokio::spawn(reject_busy(socket, codec));
                return;
            }
        };

        let handler = Arc::clone(&self.handler);
        let limits = self.limits.clone();

        tokio::spawn(async move {
            let _permit = permit;
            match handle_connection(socket, peer, handler, &limits).await {
                Ok(()) => {}
                Err(e @ Error::MalformedFrame(_)) => {
                    tracing::warn!("Closing connection from {}: {}", peer, e);
                }
                Err(e) => {
                    tracing::debug!("Connection from {} ended: {}", peer, e);
                }
            }
        });
    }
}

/// Serve request/response frames on a single connection until EOF
async fn handle_connection(
    socket: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn MessageHandler>,
    limits: &ServerLimits,
) -> Result<()> {
    socket.set_nodelay(true)?;
    let mut framed = Framed::new(socket, WireCodec::new(limits.max_frame));

    loop {
        let next = match tokio::time::timeout(limits.idle_timeout, framed.next()).await {
            Ok(next) => next,
            Err(_) => {
                tracing::trace!("Idle connection from {} closed", peer);
                break;
            }
        };

        match next {
            Some(Ok(message)) => {
                tracing::trace!("Received {} from {}", message.type_name(), peer);
                if let Some(response) = handler.handle(peer, message).await {
                    framed.send(response).await?;
                }
            }
            Some(Err(e)) => return Err(e),
            None => break,
        }
    }

    Ok(())
}

/// Tell an over-limit peer to back off
async fn reject_busy(socket: TcpStream, codec: WireCodec) {
    let mut framed = Framed::new(socket, codec);
    // Drain the pending request so closing sends FIN rather than RST
    let _ = tokio::time::timeout(Duration::from_millis(500), framed.next()).await;
    let busy = Message::error(ErrorCode::Busy, "connection limit reached");
    let _ = tokio::time::timeout(Duration::from_secs(1), framed.send(busy)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::FrameHeader;
    use crate::network::PeerClient;
    use tokio::io::AsyncWriteExt;

    struct Echo;

    #[async_trait::async_trait]
    impl MessageHandler for Echo {
        async fn handle(&self, _peer: SocketAddr, message: Message) -> Option<Message> {
            match message {
                Message::FreshnessCheck { filename } => Some(Message::NotFound { filename }),
                _ => None,
            }
        }
    }

    /// Accepts requests but never answers them
    struct Stall;

    #[async_trait::async_trait]
    impl MessageHandler for Stall {
        async fn handle(&self, _peer: SocketAddr, _message: Message) -> Option<Message> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            None
        }
    }

    async fn start(handler: Arc<dyn MessageHandler>, limits: ServerLimits) -> (String, StopHandle) {
        let server = PeerServer::bind("127.0.0.1:0", handler, limits).await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let stop = server.stop_handle();
        tokio::spawn(server.run());
        (addr, stop)
    }

    #[tokio::test]
    async fn test_request_response() {
        let (addr, stop) = start(Arc::new(Echo), ServerLimits::default()).await;
        let client = PeerClient::new(Duration::from_secs(1), DEFAULT_MAX_FRAME);

        let response = client
            .request(&addr, Message::FreshnessCheck { filename: "a.txt".into() }, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(response, Message::NotFound { filename: "a.txt".into() });
        stop.stop();
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_stop_listener() {
        let (addr, stop) = start(Arc::new(Echo), ServerLimits::default()).await;

        // Declare 1000 bytes, send 10, then close the write side
        let mut raw = TcpStream::connect(&addr).await.unwrap();
        raw.write_all(&FrameHeader { length: 1000, checksum: 0 }.to_bytes()).await.unwrap();
        raw.write_all(b"0123456789").await.unwrap();
        raw.shutdown().await.unwrap();
        drop(raw);

        // The next connection is accepted and served normally
        let client = PeerClient::new(Duration::from_secs(1), DEFAULT_MAX_FRAME);
        let response = client
            .request(&addr, Message::FreshnessCheck { filename: "b.txt".into() }, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(response, Message::NotFound { filename: "b.txt".into() });
        stop.stop();
    }

    #[tokio::test]
    async fn test_over_limit_connection_gets_busy() {
        let limits = ServerLimits {
            max_connections: 1,
            ..ServerLimits::default()
        };
        let (addr, stop) = start(Arc::new(Stall), limits).await;
        let client = PeerClient::new(Duration::from_secs(1), DEFAULT_MAX_FRAME);

        // First request occupies the only permit
        let busy_addr = addr.clone();
        let occupying = tokio::spawn(async move {
            PeerClient::new(Duration::from_secs(1), DEFAULT_MAX_FRAME)
                .request(&busy_addr, Message::IndexListingRequest, Duration::from_secs(5))
                .await
        });
        tokio::time::sleep(Duration::from_millis(200)).await;

        let response = client
            .request(&addr, Message::IndexListingRequest, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(matches!(response, Message::Error { code: ErrorCode::Busy, .. }));

        occupying.abort();
        stop.stop();
    }
}
