//! Controllable in-memory doubles for the firewall's consumed boundaries.

mod graph;
mod sessions;

pub use graph::StaticTrustGraph;
pub use sessions::RecordingSessions;
