//! Discovery Module
//!
//! The membership authority: a registry of joined nodes and the service
//! that pushes snapshots to them.

mod registry;
mod service;

pub use registry::{DiscoveryRegistry, PushOutcome, RegistryEntry, RoundReport};
pub use service::{DiscoverySettings, DiscoveryService};
