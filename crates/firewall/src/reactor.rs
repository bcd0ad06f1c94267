//! Live enforcement of trust-graph changes.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::{debug, trace};

use palisade_api::{
    GraphDelta, PeerIdentity, SessionControl, is_beyond_radius, is_blocked, is_trusted,
};

use crate::config::SharedConfig;
use crate::ledger::AttemptLedger;
use crate::outgoing::OutgoingTracker;

/// Consumes trust-graph deltas and applies them to live state: peers
/// that lose their authorization are disconnected, and peers whose
/// standing resolves (trusted or blocked) have their attempt history
/// purged. Only edges whose source is the local identity matter.
pub(crate) struct GraphReactor<Id: PeerIdentity> {
    local: Id,
    config: SharedConfig,
    ledger: AttemptLedger<Id>,
    outgoing: OutgoingTracker<Id>,
    sessions: Arc<dyn SessionControl<Id>>,
    updates: BoxStream<'static, GraphDelta<Id>>,
}

impl<Id: PeerIdentity> GraphReactor<Id> {
    pub(crate) fn new(
        local: Id,
        config: SharedConfig,
        ledger: AttemptLedger<Id>,
        outgoing: OutgoingTracker<Id>,
        sessions: Arc<dyn SessionControl<Id>>,
        updates: BoxStream<'static, GraphDelta<Id>>,
    ) -> Self {
        Self { local, config, ledger, outgoing, sessions, updates }
    }

    /// Drive the reactor until the update stream ends.
    pub(crate) async fn run(mut self) {
        while let Some(delta) = self.updates.next().await {
            self.apply(&delta);
        }
        debug!("trust-graph update stream ended");
    }

    /// Each edge is judged against the policy as it is right now, not
    /// as it was when the reactor started.
    fn apply(&self, delta: &GraphDelta<Id>) {
        let config = self.config.get();

        for (source, edges) in delta {
            if *source != self.local {
                continue;
            }
            for (dest, value) in edges {
                let value = *value;

                // A peer that just lost its authorization does not get
                // to keep sessions it opened while it still had one.
                if (config.reject_blocked && is_blocked(value))
                    || (config.reject_unknown && is_beyond_radius(value))
                {
                    let closed = self.sessions.close_sessions(dest);
                    if closed > 0 {
                        debug!(peer = ?dest, closed, "disconnected unauthorized peer");
                    }
                }

                // Standing resolved either way: the attempt history is
                // stale noise now.
                if config.reject_unknown && (is_trusted(value) || is_blocked(value)) {
                    self.ledger.forget(dest);
                    self.outgoing.forget(dest);
                    trace!(peer = ?dest, "purged attempt history");
                }
            }
        }
    }
}
