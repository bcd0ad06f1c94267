//! A trust graph backed by a hand-edited edge table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use palisade_api::{BLOCKED_EDGE, GraphDelta, GraphError, PeerIdentity, TrustGraph};

const DELTA_CHANNEL_CAPACITY: usize = 16;

/// Edge table with injectable query failures and hand-pushed deltas.
///
/// Queries answer from the table; the update stream only carries what
/// tests push, so the two can be driven independently.
pub struct StaticTrustGraph<Id: PeerIdentity> {
    edges: RwLock<HashMap<Id, HashMap<Id, i64>>>,
    deltas: broadcast::Sender<GraphDelta<Id>>,
    fail_is_blocking: AtomicBool,
    fail_distances: AtomicBool,
}

impl<Id: PeerIdentity> Default for StaticTrustGraph<Id> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Id: PeerIdentity> StaticTrustGraph<Id> {
    pub fn new() -> Self {
        let (deltas, _) = broadcast::channel(DELTA_CHANNEL_CAPACITY);
        Self {
            edges: RwLock::new(HashMap::new()),
            deltas,
            fail_is_blocking: AtomicBool::new(false),
            fail_distances: AtomicBool::new(false),
        }
    }

    /// Set the edge `source -> dest` in the table, without announcing it.
    pub fn set_edge(&self, source: impl Into<Id>, dest: impl Into<Id>, value: i64) {
        self.edges.write().entry(source.into()).or_default().insert(dest.into(), value);
    }

    /// Push a delta to update subscribers, without touching the table.
    pub fn push_delta(&self, delta: GraphDelta<Id>) {
        let _ = self.deltas.send(delta);
    }

    /// Set the edge and announce it as a single-edge delta, like a real
    /// graph service would.
    pub fn announce_edge(&self, source: impl Into<Id>, dest: impl Into<Id>, value: i64) {
        let source = source.into();
        let dest = dest.into();
        self.set_edge(source.clone(), dest.clone(), value);

        let mut edges = HashMap::new();
        edges.insert(dest, value);
        let mut delta = HashMap::new();
        delta.insert(source, edges);
        self.push_delta(delta);
    }

    /// Make `is_blocking` fail until reset.
    pub fn fail_is_blocking(&self, fail: bool) {
        self.fail_is_blocking.store(fail, Ordering::Relaxed);
    }

    /// Make `distances` fail until reset.
    pub fn fail_distances(&self, fail: bool) {
        self.fail_distances.store(fail, Ordering::Relaxed);
    }
}

#[async_trait]
impl<Id: PeerIdentity> TrustGraph<Id> for StaticTrustGraph<Id> {
    async fn is_blocking(&self, source: &Id, dest: &Id) -> Result<bool, GraphError> {
        if self.fail_is_blocking.load(Ordering::Relaxed) {
            return Err(GraphError::Backend("injected is_blocking failure".into()));
        }
        let edges = self.edges.read();
        Ok(edges.get(source).and_then(|out| out.get(dest)).copied() == Some(BLOCKED_EDGE))
    }

    async fn distances(&self, source: &Id) -> Result<HashMap<Id, i64>, GraphError> {
        if self.fail_distances.load(Ordering::Relaxed) {
            return Err(GraphError::Backend("injected distances failure".into()));
        }
        Ok(self.edges.read().get(source).cloned().unwrap_or_default())
    }

    fn updates(&self) -> BoxStream<'static, GraphDelta<Id>> {
        BroadcastStream::new(self.deltas.subscribe())
            .filter_map(|result| futures::future::ready(result.ok()))
            .boxed()
    }
}
