//! Network Module
//!
//! Handles TCP communication between nodes: the framed wire protocol,
//! the bounded peer listener and the one-shot request client.

pub mod protocol;
pub mod codec;
mod server;
mod client;

pub use protocol::{ErrorCode, FrameHeader, Message};
pub use codec::{max_file_size, WireCodec, DEFAULT_MAX_FRAME, MAX_FRAME_LIMIT};
pub use server::{MessageHandler, PeerServer, ServerLimits, StopHandle};
pub use client::PeerClient;
