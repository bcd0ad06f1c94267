//! Boundary traits and trust-edge semantics consumed by the admission firewall.

pub mod error;
pub mod graph;
pub mod identity;
pub mod transport;

pub use error::GraphError;
pub use graph::{BLOCKED_EDGE, GraphDelta, TrustGraph, is_beyond_radius, is_blocked, is_trusted};
pub use identity::PeerIdentity;
pub use transport::SessionControl;
