//! Network Client
//!
//! One-shot request/response exchanges with peer nodes and the discovery
//! service. Every call opens a fresh connection so a failed peer never
//! poisons later requests.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::codec::Framed;

use super::codec::WireCodec;
use super::protocol::Message;
use crate::error::{Error, Result};

/// Network client for connecting to peer nodes
#[derive(Debug, Clone)]
pub struct PeerClient {
    /// Connection timeout
    connect_timeout: Duration,
    /// Maximum frame body size
    max_frame: usize,
}

impl PeerClient {
    /// Create a new peer client
    pub fn new(connect_timeout: Duration, max_frame: usize) -> Self {
        Self {
            connect_timeout,
            max_frame,
        }
    }

    /// Maximum frame body size
    pub fn max_frame(&self) -> usize {
        self.max_frame
    }

    /// Send a message and wait up to `request_timeout` for the response
    pub async fn request(
        &self,
        address: &str,
        message: Message,
        request_timeout: Duration,
    ) -> Result<Message> {
        self.request_until(address, message, Instant::now() + request_timeout)
            .await
    }

    /// Send a message and wait for the response until `deadline`
    pub async fn request_until(
        &self,
        address: &str,
        message: Message,
        deadline: Instant,
    ) -> Result<Message> {
        match timeout_at(deadline, self.exchange(address, message)).await {
            Ok(result) => result,
            Err(_) => Err(Error::PeerTimeout(address.to_string())),
        }
    }

    /// Connect, send one frame, read one frame
    async fn exchange(&self, address: &str, message: Message) -> Result<Message> {
        let stream = self.connect(address).await?;
        let mut framed = Framed::new(stream, WireCodec::new(self.max_frame));

        tracing::trace!("Sending {} to {}", message.type_name(), address);
        framed
            .send(message)
            .await
            .map_err(|e| unreachable_on_io(address, e))?;

        match framed.next().await {
            Some(Ok(response)) => Ok(response),
            Some(Err(e)) => Err(unreachable_on_io(address, e)),
            None => Err(Error::PeerUnreachable {
                address: address.to_string(),
                reason: "connection closed before response".into(),
            }),
        }
    }

    /// Connect to an address
    async fn connect(&self, address: &str) -> Result<TcpStream> {
        match timeout(self.connect_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            Ok(Err(e)) => Err(Error::PeerUnreachable {
                address: address.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::PeerUnreachable {
                address: address.to_string(),
                reason: format!("connect timed out after {:?}", self.connect_timeout),
            }),
        }
    }
}

/// Transport failures mid-exchange mean the peer is unreachable
fn unreachable_on_io(address: &str, error: Error) -> Error {
    match error {
        Error::Io(e) => Error::PeerUnreachable {
            address: address.to_string(),
            reason: e.to_string(),
        },
        other => other,
    }
}
