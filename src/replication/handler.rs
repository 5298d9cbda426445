//! Peer file request handler
//!
//! Answers freshness checks, fetches and index listings from other nodes
//! using the local file store.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::Error;
use crate::network::{max_file_size, ErrorCode, Message, MessageHandler, DEFAULT_MAX_FRAME};
use crate::storage::FileStore;
use crate::types::NodeAddress;

/// Serves this node's files to peers
pub struct FileRequestHandler {
    store: Arc<dyn FileStore>,
    local: NodeAddress,
    /// Largest file a `FileData` reply can carry
    max_file_size: usize,
}

impl FileRequestHandler {
    pub fn new(store: Arc<dyn FileStore>, local: NodeAddress) -> Self {
        Self {
            store,
            local,
            max_file_size: max_file_size(DEFAULT_MAX_FRAME),
        }
    }

    /// Size replies for a server whose frame limit is `max_frame`
    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_file_size = max_file_size(max_frame);
        self
    }

    /// Whether `message` is a file request this handler answers
    pub fn accepts(message: &Message) -> bool {
        matches!(
            message,
            Message::FreshnessCheck { .. }
                | Message::FetchRequest { .. }
                | Message::IndexListingRequest
        )
    }

    /// Answer one file request
    pub async fn respond(&self, message: Message) -> Message {
        match message {
            Message::FreshnessCheck { filename } => self.freshness(filename).await,
            Message::FetchRequest { filename } => self.fetch(filename).await,
            Message::IndexListingRequest => self.index().await,
            other => Message::error(
                ErrorCode::Unsupported,
                format!("unexpected {}", other.type_name()),
            ),
        }
    }

    async fn freshness(&self, filename: String) -> Message {
        match self.store.mod_time(&filename).await {
            Ok(Some(modified)) => Message::FreshnessClaim {
                filename,
                modified,
                owner: self.local.clone(),
            },
            Ok(None) => Message::NotFound { filename },
            Err(e) => error_reply(e),
        }
    }

    async fn fetch(&self, filename: String) -> Message {
        match self.store.read_versioned(&filename).await {
            Ok(Some((data, _))) if data.len() > self.max_file_size => {
                tracing::warn!(
                    "Cannot serve {}: {} bytes exceeds the {} byte transfer limit",
                    filename,
                    data.len(),
                    self.max_file_size
                );
                Message::error(
                    ErrorCode::Internal,
                    format!(
                        "{} is {} bytes, over the {} byte transfer limit",
                        filename,
                        data.len(),
                        self.max_file_size
                    ),
                )
            }
            Ok(Some((data, modified))) => {
                tracing::debug!("Serving {} ({} bytes)", filename, data.len());
                Message::FileData {
                    filename,
                    modified,
                    data,
                }
            }
            Ok(None) => Message::NotFound { filename },
            Err(e) => error_reply(e),
        }
    }

    async fn index(&self) -> Message {
        match self.store.list().await {
            Ok(filenames) => Message::IndexListing { filenames },
            Err(e) => error_reply(e),
        }
    }
}

fn error_reply(e: Error) -> Message {
    match e {
        Error::InvalidFilename(name) => {
            Message::error(ErrorCode::InvalidRequest, format!("invalid filename: {}", name))
        }
        other => {
            tracing::warn!("File request failed: {}", other);
            Message::error(ErrorCode::Internal, other.to_string())
        }
    }
}

#[async_trait::async_trait]
impl MessageHandler for FileRequestHandler {
    async fn handle(&self, _peer: SocketAddr, message: Message) -> Option<Message> {
        Some(self.respond(message).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DiskStore;

    fn handler() -> (tempfile::TempDir, Arc<DiskStore>, FileRequestHandler) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(DiskStore::open(dir.path()).unwrap());
        let handler = FileRequestHandler::new(store.clone(), NodeAddress::new("node-b", 8080, 7070));
        (dir, store, handler)
    }

    #[tokio::test]
    async fn test_freshness_claim() {
        let (_dir, store, handler) = handler();
        store.write("report.txt", b"data", Some(100)).await.unwrap();

        let reply = handler
            .respond(Message::FreshnessCheck { filename: "report.txt".into() })
            .await;
        assert_eq!(
            reply,
            Message::FreshnessClaim {
                filename: "report.txt".into(),
                modified: 100,
                owner: NodeAddress::new("node-b", 8080, 7070),
            }
        );
    }

    #[tokio::test]
    async fn test_missing_file_not_found() {
        let (_dir, _store, handler) = handler();
        for request in [
            Message::FreshnessCheck { filename: "gone.txt".into() },
            Message::FetchRequest { filename: "gone.txt".into() },
        ] {
            assert_eq!(
                handler.respond(request).await,
                Message::NotFound { filename: "gone.txt".into() }
            );
        }
    }

    #[tokio::test]
    async fn test_fetch_carries_modification_time() {
        let (_dir, store, handler) = handler();
        store.write("x.txt", b"\x00\xffbinary", Some(200)).await.unwrap();

        let reply = handler
            .respond(Message::FetchRequest { filename: "x.txt".into() })
            .await;
        assert_eq!(
            reply,
            Message::FileData {
                filename: "x.txt".into(),
                modified: 200,
                data: b"\x00\xffbinary".to_vec(),
            }
        );
    }

    #[tokio::test]
    async fn test_index_listing() {
        let (_dir, store, handler) = handler();
        store.write("b.txt", b"b", None).await.unwrap();
        store.write("a.txt", b"a", None).await.unwrap();

        assert_eq!(
            handler.respond(Message::IndexListingRequest).await,
            Message::IndexListing { filenames: vec!["a.txt".into(), "b.txt".into()] }
        );
    }

    #[tokio::test]
    async fn test_invalid_filename_rejected() {
        let (_dir, _store, handler) = handler();
        let reply = handler
            .respond(Message::FetchRequest { filename: "../etc/passwd".into() })
            .await;
        assert!(matches!(
            reply,
            Message::Error { code: ErrorCode::InvalidRequest, .. }
        ));
    }

    #[tokio::test]
    async fn test_file_over_frame_limit_answered_with_error() {
        use crate::network::{PeerClient, PeerServer, ServerLimits};
        use std::time::Duration;

        let (_dir, store, handler) = handler();
        store.write("big.bin", &vec![9u8; 1024], Some(300)).await.unwrap();

        let limits = ServerLimits {
            max_frame: 1024,
            ..ServerLimits::default()
        };
        let server = PeerServer::bind("127.0.0.1:0", Arc::new(handler.with_max_frame(1024)), limits)
            .await
            .unwrap();
        let address = server.local_addr().unwrap().to_string();
        let stop = server.stop_handle();
        tokio::spawn(server.run());

        let reply = PeerClient::new(Duration::from_millis(500), 1024)
            .request(
                &address,
                Message::FetchRequest { filename: "big.bin".into() },
                Duration::from_secs(2),
            )
            .await
            .unwrap();
        assert!(matches!(reply, Message::Error { code: ErrorCode::Internal, .. }));
        stop.stop();
    }

    #[test]
    fn test_accepts_only_file_requests() {
        assert!(FileRequestHandler::accepts(&Message::IndexListingRequest));
        assert!(!FileRequestHandler::accepts(&Message::MembershipPush { members: vec![] }));
    }
}
