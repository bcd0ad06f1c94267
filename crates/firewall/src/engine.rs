//! The admission engine: decision rules, lifecycle, and queries.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use palisade_api::{PeerIdentity, SessionControl, TrustGraph, is_beyond_radius};

use crate::config::{ConfigUpdate, FailurePolicy, FirewallConfig, SharedConfig};
use crate::error::{BuildError, Rejection};
use crate::ledger::{AttemptLedger, AttemptRecord};
use crate::notify::{AttemptNotifier, AttemptsQuery};
use crate::outgoing::OutgoingTracker;
use crate::reactor::GraphReactor;
use crate::store::{AttemptStore, MemoryAttemptStore};

/// Repeat rejections of one peer inside this window update the ledger
/// without emitting another live notification.
pub const NOTIFY_DEDUP_WINDOW_MS: u64 = 60 * 60 * 1000;

/// Admission firewall over a social trust graph.
///
/// Inbound attempts are checked against the live policy: explicitly
/// blocked peers are always refusable, peers outside the trust radius
/// optionally so. Rejected strangers are logged and announced; peers we
/// dialed first are let back in; graph changes feed back through a
/// reactor that disconnects anyone whose authorization lapsed.
pub struct Firewall<Id: PeerIdentity> {
    local: Id,
    config: SharedConfig,
    graph: Arc<dyn TrustGraph<Id>>,
    sessions: Arc<dyn SessionControl<Id>>,
    ledger: AttemptLedger<Id>,
    outgoing: OutgoingTracker<Id>,
    notifier: AttemptNotifier<Id>,
    reactor: Mutex<Option<JoinHandle<()>>>,
}

impl<Id: PeerIdentity> Firewall<Id> {
    /// Start building a firewall guarding the node identified by `local`.
    pub fn builder(local: Id) -> FirewallBuilder<Id> {
        FirewallBuilder::new(local)
    }

    /// Identity this firewall guards.
    pub fn local(&self) -> &Id {
        &self.local
    }

    /// Copy of the current policy.
    pub fn config(&self) -> FirewallConfig {
        self.config.get()
    }

    /// Apply a partial policy update. Takes effect for the next
    /// decision; already-admitted peers are not re-checked.
    pub fn reconfigure(&self, update: ConfigUpdate) {
        self.config.apply(update);
        let config = self.config.get();
        debug!(
            reject_blocked = config.reject_blocked,
            reject_unknown = config.reject_unknown,
            "admission policy updated"
        );
    }

    /// Spawn the graph reactor on the ambient runtime. Idempotent.
    pub fn start(&self) {
        let mut slot = self.reactor.lock();
        if slot.is_some() {
            return;
        }
        let reactor = GraphReactor::new(
            self.local.clone(),
            self.config.clone(),
            self.ledger.clone(),
            self.outgoing.clone(),
            Arc::clone(&self.sessions),
            self.graph.updates(),
        );
        *slot = Some(tokio::spawn(reactor.run()));
    }

    /// Stop background work and write the ledger out one last time.
    pub fn shutdown(&self) {
        if let Some(handle) = self.reactor.lock().take() {
            handle.abort();
        }
        self.outgoing.stop();
        if let Err(e) = self.ledger.flush() {
            warn!(error = %e, "failed to flush attempt ledger at shutdown");
        }
    }

    /// Decide an inbound connection attempt from `peer`.
    ///
    /// `Ok(())` admits the peer. `Err` carries the reason, whose
    /// `Display` text is safe to send back on the wire. Rules run in a
    /// fixed order: the block check first, then the stranger check, so
    /// a peer that is both blocked and unknown is reported as blocked.
    ///
    /// Rejecting a stranger logs the attempt and, outside the dedup
    /// window, announces it. No other outcome has side effects.
    pub async fn check_inbound(&self, peer: &Id) -> Result<(), Rejection> {
        let config = self.config.get();

        if config.reject_blocked {
            match self.graph.is_blocking(&self.local, peer).await {
                Ok(true) => {
                    debug!(peer = ?peer, "rejected blocked peer");
                    return Err(Rejection::Blocked);
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(peer = ?peer, error = %e, "block lookup failed");
                    if config.graph_failure == FailurePolicy::Closed {
                        return Err(Rejection::Blocked);
                    }
                }
            }
        }

        if config.reject_unknown {
            // A peer we dialed recently may connect back regardless of
            // what the graph says about it.
            if self.outgoing.contains(peer) {
                debug!(peer = ?peer, "admitted recently dialed peer");
                return Ok(());
            }

            match self.graph.distances(&self.local).await {
                Ok(distances) => match distances.get(peer).copied() {
                    Some(distance) if !is_beyond_radius(distance) => {}
                    distance => {
                        debug!(peer = ?peer, ?distance, "rejected unknown peer");
                        self.log_rejected_attempt(peer);
                        return Err(Rejection::Unknown);
                    }
                },
                Err(e) => {
                    warn!(peer = ?peer, error = %e, "distance lookup failed");
                    if config.graph_failure == FailurePolicy::Closed {
                        // Indeterminate, not a witnessed stranger: the
                        // attempt is not logged.
                        return Err(Rejection::Unknown);
                    }
                }
            }
        }

        Ok(())
    }

    /// Note an outbound dial to `peer`. Dials are never refused; this
    /// only arms the reciprocation window.
    pub fn note_outbound_dial(&self, peer: Id) {
        self.outgoing.record_dial(peer);
    }

    /// Rejected attempts as selected by `query`: an optional replay of
    /// the ledger (newest first) followed by an optional live tail.
    ///
    /// The replay is snapshotted before the live subscription starts,
    /// so no rejection is ever delivered twice; one landing in the gap
    /// between the two may be missed.
    pub fn attempts(&self, query: AttemptsQuery) -> BoxStream<'static, AttemptRecord<Id>> {
        match (query.old, query.live) {
            (false, false) => stream::empty().boxed(),
            (true, false) => stream::iter(self.ledger.snapshot()).boxed(),
            (false, true) => self.notifier.live_stream(),
            (true, true) => {
                let snapshot = self.ledger.snapshot();
                let live = self.notifier.live_stream();
                stream::iter(snapshot).chain(live).boxed()
            }
        }
    }

    fn log_rejected_attempt(&self, peer: &Id) {
        let timestamp_ms = unix_time_ms();
        let previous = self.ledger.record(peer.clone(), timestamp_ms).unwrap_or(0);
        // A far-future timestamp from a bad clock or a doctored file
        // saturates here instead of wrapping.
        if previous.saturating_add(NOTIFY_DEDUP_WINDOW_MS) < timestamp_ms {
            self.notifier.publish(AttemptRecord { peer: peer.clone(), timestamp_ms });
        }
    }
}

/// Builder for [`Firewall`]. The trust graph and session control have
/// no defaults; everything else does.
pub struct FirewallBuilder<Id: PeerIdentity> {
    local: Id,
    config: FirewallConfig,
    graph: Option<Arc<dyn TrustGraph<Id>>>,
    sessions: Option<Arc<dyn SessionControl<Id>>>,
    store: Option<Box<dyn AttemptStore<Id>>>,
}

impl<Id: PeerIdentity> FirewallBuilder<Id> {
    pub fn new(local: Id) -> Self {
        Self {
            local,
            config: FirewallConfig::default(),
            graph: None,
            sessions: None,
            store: None,
        }
    }

    pub fn config(mut self, config: FirewallConfig) -> Self {
        self.config = config;
        self
    }

    pub fn trust_graph(mut self, graph: Arc<dyn TrustGraph<Id>>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn session_control(mut self, sessions: Arc<dyn SessionControl<Id>>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Persist rejected attempts through `store`. Defaults to an
    /// in-memory store that forgets on restart.
    pub fn attempt_store<S: AttemptStore<Id> + 'static>(mut self, store: S) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Assemble the firewall. Loads the attempt history synchronously,
    /// so decisions made from here on see it.
    pub fn build(self) -> Result<Firewall<Id>, BuildError> {
        let graph = self.graph.ok_or(BuildError::TrustGraphMissing)?;
        let sessions = self.sessions.ok_or(BuildError::SessionControlMissing)?;
        let store = self.store.unwrap_or_else(|| Box::new(MemoryAttemptStore::new()));

        let ledger = AttemptLedger::load(store);
        debug!(
            reject_blocked = self.config.reject_blocked,
            reject_unknown = self.config.reject_unknown,
            "admission policy configured"
        );

        Ok(Firewall {
            local: self.local,
            config: SharedConfig::new(self.config),
            graph,
            sessions,
            ledger,
            outgoing: OutgoingTracker::new(),
            notifier: AttemptNotifier::default(),
            reactor: Mutex::new(None),
        })
    }
}

/// Current unix time in milliseconds.
fn unix_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use palisade_test_utils::{RecordingSessions, StaticTrustGraph};

    use super::*;

    const ALICE: &str = "@alice";
    const BOB: &str = "@bob";
    const CAROL: &str = "@carol";

    struct Harness {
        graph: Arc<StaticTrustGraph<String>>,
        sessions: Arc<RecordingSessions<String>>,
        firewall: Firewall<String>,
    }

    fn harness(config: FirewallConfig) -> Harness {
        let graph = Arc::new(StaticTrustGraph::new());
        let sessions = Arc::new(RecordingSessions::new());
        let firewall = Firewall::builder(ALICE.to_string())
            .config(config)
            .trust_graph(graph.clone())
            .session_control(sessions.clone())
            .build()
            .unwrap();
        Harness { graph, sessions, firewall }
    }

    fn strict() -> FirewallConfig {
        FirewallConfig { reject_blocked: true, reject_unknown: true, ..Default::default() }
    }

    #[tokio::test]
    async fn test_default_policy_rejects_blocked_admits_stranger() {
        let h = harness(FirewallConfig::default());
        h.graph.set_edge(ALICE, BOB, -1);

        assert_eq!(h.firewall.check_inbound(&BOB.to_string()).await, Err(Rejection::Blocked));
        assert_eq!(h.firewall.check_inbound(&CAROL.to_string()).await, Ok(()));
    }

    #[tokio::test]
    async fn test_stranger_rejected_when_opted_in() {
        let h = harness(strict());

        let result = h.firewall.check_inbound(&CAROL.to_string()).await;
        assert_eq!(result, Err(Rejection::Unknown));

        let logged = h.firewall.attempts(AttemptsQuery::old_only()).collect::<Vec<_>>().await;
        assert_eq!(logged.len(), 1);
        assert_eq!(logged.first().map(|r| r.peer.as_str()), Some(CAROL));
    }

    #[tokio::test]
    async fn test_trusted_peer_admitted_under_strict_policy() {
        let h = harness(strict());
        h.graph.set_edge(ALICE, BOB, 1);

        assert_eq!(h.firewall.check_inbound(&BOB.to_string()).await, Ok(()));
        assert!(h.firewall.ledger.is_empty());
    }

    #[tokio::test]
    async fn test_blocked_outranks_unknown() {
        let h = harness(strict());
        h.graph.set_edge(ALICE, BOB, -1);

        // Blocked even though the peer is also outside the radius, and
        // even though we dialed it first.
        h.firewall.note_outbound_dial(BOB.to_string());
        assert_eq!(h.firewall.check_inbound(&BOB.to_string()).await, Err(Rejection::Blocked));
        assert!(h.firewall.ledger.is_empty());
    }

    #[tokio::test]
    async fn test_blocked_rejection_is_not_logged() {
        let h = harness(FirewallConfig::default());
        h.graph.set_edge(ALICE, BOB, -1);

        let _ = h.firewall.check_inbound(&BOB.to_string()).await;
        assert!(h.firewall.ledger.is_empty());
        assert_eq!(h.firewall.notifier.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_recently_dialed_stranger_admitted() {
        let h = harness(strict());

        h.firewall.note_outbound_dial(CAROL.to_string());
        assert_eq!(h.firewall.check_inbound(&CAROL.to_string()).await, Ok(()));
        assert!(h.firewall.ledger.is_empty());
    }

    #[tokio::test]
    async fn test_blocked_edge_counts_as_known_for_stranger_rule() {
        let h = harness(FirewallConfig { reject_blocked: false, ..strict() });
        h.graph.set_edge(ALICE, BOB, -1);

        // Block rejection is off and -1 is within the radius.
        assert_eq!(h.firewall.check_inbound(&BOB.to_string()).await, Ok(()));
    }

    #[tokio::test]
    async fn test_repeat_rejection_notifies_once() {
        let h = harness(strict());
        let mut rx = h.firewall.notifier.subscribe();

        assert!(h.firewall.check_inbound(&CAROL.to_string()).await.is_err());
        assert!(h.firewall.check_inbound(&CAROL.to_string()).await.is_err());

        let first = rx.recv().await.unwrap();
        assert_eq!(first.peer, CAROL.to_string());
        assert!(rx.try_recv().is_err());

        // The ledger still advanced to the newest attempt.
        assert_eq!(h.firewall.ledger.len(), 1);
        let newest = h.firewall.ledger.snapshot().first().map(|r| r.timestamp_ms).unwrap_or(0);
        assert!(newest >= first.timestamp_ms);
    }

    #[tokio::test]
    async fn test_rejection_outside_dedup_window_notifies_again() {
        let h = harness(strict());

        // Seed an attempt older than the window.
        let stale = unix_time_ms() - NOTIFY_DEDUP_WINDOW_MS - 1000;
        h.firewall.ledger.record(CAROL.to_string(), stale);

        let mut rx = h.firewall.notifier.subscribe();
        assert!(h.firewall.check_inbound(&CAROL.to_string()).await.is_err());
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_far_future_history_suppresses_notification() {
        let graph = Arc::new(StaticTrustGraph::<String>::new());
        let sessions = Arc::new(RecordingSessions::<String>::new());
        let store = MemoryAttemptStore::new();
        store.save(&[(CAROL.to_string(), u64::MAX)]).unwrap();

        let firewall = Firewall::builder(ALICE.to_string())
            .config(strict())
            .trust_graph(graph)
            .session_control(sessions)
            .attempt_store(store)
            .build()
            .unwrap();

        let mut rx = firewall.notifier.subscribe();
        assert_eq!(firewall.check_inbound(&CAROL.to_string()).await, Err(Rejection::Unknown));

        // Rejected and re-recorded; the absurd stored timestamp only
        // suppresses the live event.
        assert!(rx.try_recv().is_err());
        assert_eq!(firewall.ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_graph_failure_open_admits() {
        let h = harness(strict());
        h.graph.fail_is_blocking(true);
        h.graph.fail_distances(true);

        assert_eq!(h.firewall.check_inbound(&CAROL.to_string()).await, Ok(()));
        assert!(h.firewall.ledger.is_empty());
    }

    #[tokio::test]
    async fn test_graph_failure_closed_rejects_without_logging() {
        let h = harness(FirewallConfig { graph_failure: FailurePolicy::Closed, ..strict() });

        h.graph.fail_is_blocking(true);
        assert_eq!(h.firewall.check_inbound(&CAROL.to_string()).await, Err(Rejection::Blocked));

        h.graph.fail_is_blocking(false);
        h.graph.fail_distances(true);
        assert_eq!(h.firewall.check_inbound(&CAROL.to_string()).await, Err(Rejection::Unknown));

        assert!(h.firewall.ledger.is_empty());
    }

    #[tokio::test]
    async fn test_reconfigure_applies_to_next_decision() {
        let h = harness(FirewallConfig::default());
        h.graph.set_edge(ALICE, BOB, -1);

        assert!(h.firewall.check_inbound(&BOB.to_string()).await.is_err());

        h.firewall.reconfigure(ConfigUpdate { reject_blocked: Some(false), ..Default::default() });
        assert_eq!(h.firewall.check_inbound(&BOB.to_string()).await, Ok(()));

        h.firewall.reconfigure(ConfigUpdate { reject_unknown: Some(true), ..Default::default() });
        assert_eq!(h.firewall.check_inbound(&CAROL.to_string()).await, Err(Rejection::Unknown));
    }

    #[tokio::test]
    async fn test_attempts_stream_combinations() {
        let h = harness(strict());
        assert!(h.firewall.check_inbound(&CAROL.to_string()).await.is_err());

        // Neither source selected: ends immediately.
        let mut none = h.firewall.attempts(AttemptsQuery { old: false, live: false });
        assert_eq!(none.next().await, None);

        // History only: one record, then the end.
        let old = h.firewall.attempts(AttemptsQuery::old_only()).collect::<Vec<_>>().await;
        assert_eq!(old.len(), 1);

        // History plus live: replay arrives first, tail stays open.
        let mut both = h.firewall.attempts(AttemptsQuery::old_and_live());
        let replayed = both.next().await.unwrap();
        assert_eq!(replayed.peer, CAROL.to_string());

        assert!(h.firewall.check_inbound(&BOB.to_string()).await.is_err());
        let live = both.next().await.unwrap();
        assert_eq!(live.peer, BOB.to_string());
    }

    #[tokio::test]
    async fn test_builder_rejects_missing_dependencies() {
        let graph = Arc::new(StaticTrustGraph::<String>::new());
        let sessions = Arc::new(RecordingSessions::<String>::new());

        let no_graph = Firewall::builder(ALICE.to_string())
            .session_control(sessions.clone())
            .build();
        assert!(matches!(no_graph, Err(BuildError::TrustGraphMissing)));

        let no_sessions = Firewall::builder(ALICE.to_string())
            .trust_graph(graph.clone())
            .build();
        assert!(matches!(no_sessions, Err(BuildError::SessionControlMissing)));
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_shutdown_stops() {
        let h = harness(strict());

        h.firewall.start();
        h.firewall.start();
        assert!(h.firewall.reactor.lock().is_some());

        h.firewall.note_outbound_dial(BOB.to_string());
        assert!(h.firewall.outgoing.sweep_running());

        h.firewall.shutdown();
        assert!(h.firewall.reactor.lock().is_none());
        assert!(!h.firewall.outgoing.sweep_running());
    }
}
