//! Short-lived memory of outbound dials.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, trace};

use palisade_api::PeerIdentity;

/// How often the sweep looks for stale dial entries.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Age beyond which a recorded dial no longer vouches for a peer.
pub const FORGET_THRESHOLD: Duration = Duration::from_secs(5 * 60);

struct TrackerInner<Id: PeerIdentity> {
    dials: HashMap<Id, Instant>,
    sweep: Option<JoinHandle<()>>,
}

/// Records which peers the local node recently dialed, so a peer we
/// reached out to can connect back without a trust-graph edge.
///
/// Entries expire after [`FORGET_THRESHOLD`]. A background sweep runs
/// on the ambient Tokio runtime only while entries exist; it stops
/// itself once the map drains and restarts on the next dial.
pub struct OutgoingTracker<Id: PeerIdentity> {
    inner: Arc<Mutex<TrackerInner<Id>>>,
}

impl<Id: PeerIdentity> Clone for OutgoingTracker<Id> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<Id: PeerIdentity> Default for OutgoingTracker<Id> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Id: PeerIdentity> OutgoingTracker<Id> {
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(TrackerInner { dials: HashMap::new(), sweep: None })) }
    }

    /// Note an outbound dial to `peer`, refreshing any earlier entry,
    /// and make sure the sweep is scheduled.
    ///
    /// The map and the sweep slot sit under one lock, so a sweep
    /// observing an empty map and a dial racing it cannot leave an
    /// entry behind with no sweep running. Without an ambient runtime
    /// the entry is still recorded; the sweep starts with the next
    /// dial made inside one.
    pub fn record_dial(&self, peer: Id) {
        let mut inner = self.inner.lock();
        inner.dials.insert(peer, Instant::now());
        if inner.sweep.is_none() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                inner.sweep = Some(handle.spawn(Self::sweep_loop(Arc::clone(&self.inner))));
            }
        }
    }

    /// Whether a recent dial to `peer` is still remembered.
    ///
    /// Entries past the threshold but not yet swept still count; only
    /// the sweep removes them.
    pub fn contains(&self, peer: &Id) -> bool {
        self.inner.lock().dials.contains_key(peer)
    }

    /// Drop the entry for `peer`, if any.
    pub fn forget(&self, peer: &Id) {
        self.inner.lock().dials.remove(peer);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().dials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().dials.is_empty()
    }

    /// Whether the background sweep is currently scheduled.
    pub fn sweep_running(&self) -> bool {
        self.inner.lock().sweep.is_some()
    }

    /// Abort the sweep, leaving any entries in place.
    pub fn stop(&self) {
        if let Some(handle) = self.inner.lock().sweep.take() {
            handle.abort();
        }
    }

    async fn sweep_loop(inner: Arc<Mutex<TrackerInner<Id>>>) {
        let mut ticker = time::interval_at(Instant::now() + SWEEP_INTERVAL, SWEEP_INTERVAL);
        loop {
            ticker.tick().await;

            let mut guard = inner.lock();
            let now = Instant::now();
            guard.dials.retain(|_, dialed| now.duration_since(*dialed) <= FORGET_THRESHOLD);

            // Purge before stop: the map is provably empty when the
            // sweep clears its own slot.
            if guard.dials.is_empty() {
                guard.sweep = None;
                debug!("outgoing-dial sweep stopped");
                return;
            }
            trace!(remaining = guard.dials.len(), "outgoing-dial sweep");
        }
    }
}
