//! Replication Module
//!
//! Pull-based file replication: the coordinator resolves the newest copy
//! of a file and fetches it; the handler answers the same requests from
//! other nodes.

mod coordinator;
mod handler;

pub use coordinator::{FetchedFile, ReplicationCoordinator, ReplicationSettings};
pub use handler::FileRequestHandler;
