//! Membership Module
//!
//! Node-side view of the cluster: the peer directory and the client that
//! keeps it in sync with the discovery service.

mod backoff;
mod client;
mod directory;

pub use backoff::RejoinBackoff;
pub use client::{MembershipClient, MembershipSettings, MembershipState};
pub use directory::{PeerDirectory, PeerLiveness};
