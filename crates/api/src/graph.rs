//! Trust-graph edge semantics and the graph service boundary.
//!
//! Edges radiate from a source identity and carry a signed distance:
//! `-1` marks an explicitly blocked peer, anything below `-1` a peer
//! outside the source's trust radius, and `0` or above a trusted peer
//! that many hops away (`0` is the source itself).

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::GraphError;
use crate::identity::PeerIdentity;

/// Edge value marking an explicitly blocked peer.
pub const BLOCKED_EDGE: i64 = -1;

/// Changed edges grouped by source: `source -> destination -> edge value`.
///
/// A delta only carries the edges that changed, never the whole graph.
pub type GraphDelta<Id> = HashMap<Id, HashMap<Id, i64>>;

/// Whether `value` marks an explicitly blocked peer.
pub fn is_blocked(value: i64) -> bool {
    value == BLOCKED_EDGE
}

/// Whether `value` marks a peer outside the trust radius.
pub fn is_beyond_radius(value: i64) -> bool {
    value < BLOCKED_EDGE
}

/// Whether `value` marks a trusted peer at some hop distance.
pub fn is_trusted(value: i64) -> bool {
    value >= 0
}

/// Read access to the social trust graph.
///
/// Implementations are expected to answer from local state; queries run
/// once per admission decision and sit on the connection hot path.
#[async_trait]
#[auto_impl::auto_impl(&, Arc)]
pub trait TrustGraph<Id: PeerIdentity>: Send + Sync + 'static {
    /// Whether `source` explicitly blocks `dest`.
    async fn is_blocking(&self, source: &Id, dest: &Id) -> Result<bool, GraphError>;

    /// Hop distances from `source` to every peer it can currently see.
    ///
    /// Peers absent from the map are unknown to `source`.
    async fn distances(&self, source: &Id) -> Result<HashMap<Id, i64>, GraphError>;

    /// Live feed of edge changes. The stream stays open until the
    /// subscriber is dropped; it never replays past deltas.
    fn updates(&self) -> BoxStream<'static, GraphDelta<Id>>;
}
