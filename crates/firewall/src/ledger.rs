//! Bounded, persisted ledger of rejected inbound attempts.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use palisade_api::PeerIdentity;

use crate::store::{AttemptStore, StoreError};

/// Maximum entries the ledger retains; older entries are pruned.
pub const MAX_LEDGER_ENTRIES: usize = 20;

/// One rejected inbound attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord<Id> {
    /// Identity the attempt came from.
    pub peer: Id,
    /// Unix-millis of the most recent attempt from this peer.
    pub timestamp_ms: u64,
}

struct LedgerInner<Id: PeerIdentity> {
    attempts: RwLock<HashMap<Id, u64>>,
    store: Box<dyn AttemptStore<Id>>,
    persist: Mutex<()>,
}

impl<Id: PeerIdentity> LedgerInner<Id> {
    /// Entries as persisted: pruned `(peer, millis)` pairs, newest first.
    fn pruned_pairs(&self) -> Vec<(Id, u64)> {
        let attempts = self.attempts.read();
        let mut entries: Vec<(Id, u64)> =
            attempts.iter().map(|(peer, ts)| (peer.clone(), *ts)).collect();
        drop(attempts);

        sort_newest_first(&mut entries);
        entries.truncate(MAX_LEDGER_ENTRIES);
        entries
    }

    fn write_snapshot(&self) -> Result<(), StoreError> {
        // One writer at a time. Each write re-reads the current state,
        // so the last one to land is also the newest.
        let _persist = self.persist.lock();
        self.store.save(&self.pruned_pairs())
    }
}

/// Map of peer to last-rejection time, bounded to [`MAX_LEDGER_ENTRIES`]
/// and written through to an [`AttemptStore`].
///
/// Clones share state. In-memory updates are visible before the matching
/// store write lands; persistence runs off the calling task, one write
/// at a time.
pub struct AttemptLedger<Id: PeerIdentity> {
    inner: Arc<LedgerInner<Id>>,
}

impl<Id: PeerIdentity> Clone for AttemptLedger<Id> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<Id: PeerIdentity> AttemptLedger<Id> {
    /// Load the ledger from `store`. Unreadable history is logged and
    /// dropped; the firewall must come up regardless.
    pub fn load(store: Box<dyn AttemptStore<Id>>) -> Self {
        let mut attempts = HashMap::new();
        match store.load() {
            Ok(entries) => {
                for (peer, timestamp_ms) in entries {
                    attempts.insert(peer, timestamp_ms);
                }
                prune_map(&mut attempts);
                if !attempts.is_empty() {
                    debug!(count = attempts.len(), "loaded rejected-attempt history");
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to load rejected-attempt history, starting empty");
            }
        }

        Self {
            inner: Arc::new(LedgerInner {
                attempts: RwLock::new(attempts),
                store,
                persist: Mutex::new(()),
            }),
        }
    }

    /// Record a rejection of `peer` at `timestamp_ms` and schedule a
    /// store write. Returns the previously recorded timestamp, if any.
    ///
    /// Upsert and prune happen under one lock, so the returned value is
    /// exact even under concurrent attempts from the same peer.
    pub fn record(&self, peer: Id, timestamp_ms: u64) -> Option<u64> {
        let previous = {
            let mut attempts = self.inner.attempts.write();
            let previous = attempts.insert(peer, timestamp_ms);
            prune_map(&mut attempts);
            previous
        };
        self.persist_in_background();
        previous
    }

    /// Drop `peer` from the ledger and schedule a store write.
    pub fn forget(&self, peer: &Id) {
        self.inner.attempts.write().remove(peer);
        self.persist_in_background();
    }

    pub fn len(&self) -> usize {
        self.inner.attempts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.attempts.read().is_empty()
    }

    /// Current entries, newest first.
    pub fn snapshot(&self) -> Vec<AttemptRecord<Id>> {
        self.inner
            .pruned_pairs()
            .into_iter()
            .map(|(peer, timestamp_ms)| AttemptRecord { peer, timestamp_ms })
            .collect()
    }

    /// Write the current entries to the store, synchronously.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.inner.write_snapshot()
    }

    /// Persist without blocking the caller. Inside a runtime the write
    /// moves to the blocking pool; outside one it runs inline.
    fn persist_in_background(&self) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(&self.inner);
                handle.spawn_blocking(move || {
                    if let Err(e) = inner.write_snapshot() {
                        warn!(error = %e, "failed to persist rejected-attempt history");
                    }
                });
            }
            Err(_) => {
                if let Err(e) = self.inner.write_snapshot() {
                    warn!(error = %e, "failed to persist rejected-attempt history");
                }
            }
        }
    }
}

/// Drop the oldest entries until the map fits the retention bound.
fn prune_map<Id: PeerIdentity>(attempts: &mut HashMap<Id, u64>) {
    if attempts.len() <= MAX_LEDGER_ENTRIES {
        return;
    }
    let mut entries: Vec<(Id, u64)> = attempts.drain().collect();
    sort_newest_first(&mut entries);
    entries.truncate(MAX_LEDGER_ENTRIES);
    attempts.extend(entries);
}

/// Descending timestamp; identity order breaks ties deterministically.
fn sort_newest_first<Id: PeerIdentity>(entries: &mut [(Id, u64)]) {
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileAttemptStore, MemoryAttemptStore};

    fn memory_ledger() -> AttemptLedger<String> {
        AttemptLedger::load(Box::new(MemoryAttemptStore::new()))
    }

    fn peer(n: usize) -> String {
        format!("@peer{n:02}")
    }

    #[test]
    fn test_record_returns_previous_timestamp() {
        let ledger = memory_ledger();

        assert_eq!(ledger.record(peer(1), 100), None);
        assert_eq!(ledger.record(peer(1), 200), Some(100));
        assert_eq!(ledger.len(), 1);

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot, vec![AttemptRecord { peer: peer(1), timestamp_ms: 200 }]);
    }

    #[test]
    fn test_prunes_to_newest_entries() {
        let ledger = memory_ledger();
        for n in 0..30 {
            ledger.record(peer(n), n as u64);
        }

        assert_eq!(ledger.len(), MAX_LEDGER_ENTRIES);

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.first().map(|r| r.timestamp_ms), Some(29));
        assert_eq!(snapshot.last().map(|r| r.timestamp_ms), Some(10));
        assert!(!snapshot.iter().any(|r| r.peer == peer(0)));
    }

    #[test]
    fn test_prune_ties_break_on_identity() {
        let ledger = memory_ledger();
        for n in 0..25 {
            ledger.record(peer(n), 7);
        }

        assert_eq!(ledger.len(), MAX_LEDGER_ENTRIES);

        // Identical timestamps keep the lexicographically first identities.
        let snapshot = ledger.snapshot();
        for n in 0..MAX_LEDGER_ENTRIES {
            assert!(snapshot.iter().any(|r| r.peer == peer(n)), "missing {}", peer(n));
        }
    }

    #[test]
    fn test_snapshot_is_sorted_newest_first() {
        let ledger = memory_ledger();
        ledger.record(peer(1), 50);
        ledger.record(peer(2), 300);
        ledger.record(peer(3), 100);

        let timestamps: Vec<u64> = ledger.snapshot().iter().map(|r| r.timestamp_ms).collect();
        assert_eq!(timestamps, vec![300, 100, 50]);
    }

    #[test]
    fn test_forget_removes_entry() {
        let ledger = memory_ledger();
        ledger.record(peer(1), 100);
        ledger.record(peer(2), 200);

        ledger.forget(&peer(1));

        assert_eq!(ledger.len(), 1);
        assert!(ledger.snapshot().iter().all(|r| r.peer != peer(1)));

        // Forgetting an unknown peer is a no-op.
        ledger.forget(&peer(9));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_survives_reload_through_file_store() {
        let dir = tempfile::tempdir().unwrap();

        {
            let ledger: AttemptLedger<String> =
                AttemptLedger::load(Box::new(FileAttemptStore::in_dir(dir.path())));
            ledger.record(peer(1), 111);
            ledger.record(peer(2), 222);
            ledger.flush().unwrap();
        }

        let reloaded: AttemptLedger<String> =
            AttemptLedger::load(Box::new(FileAttemptStore::in_dir(dir.path())));
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.snapshot().first().map(|r| r.timestamp_ms), Some(222));
    }

    #[test]
    fn test_concurrent_flushes_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let ledger: AttemptLedger<String> =
            AttemptLedger::load(Box::new(FileAttemptStore::in_dir(dir.path())));

        std::thread::scope(|scope| {
            for n in 0..4_usize {
                let ledger = ledger.clone();
                scope.spawn(move || {
                    for t in 1..=50 {
                        ledger.record(peer(n), t);
                        ledger.flush().expect("flush");
                    }
                });
            }
        });

        let reloaded: AttemptLedger<String> =
            AttemptLedger::load(Box::new(FileAttemptStore::in_dir(dir.path())));
        assert_eq!(reloaded.len(), 4);
        assert!(reloaded.snapshot().iter().all(|r| r.timestamp_ms == 50));
    }

    #[test]
    fn test_corrupt_history_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAttemptStore::in_dir(dir.path());
        std::fs::write(store.path(), b"{garbage").unwrap();

        let ledger: AttemptLedger<String> = AttemptLedger::load(Box::new(store));
        assert!(ledger.is_empty());

        // The ledger still works and overwrites the bad file.
        ledger.record(peer(1), 5);
        ledger.flush().unwrap();
        let reloaded: AttemptLedger<String> =
            AttemptLedger::load(Box::new(FileAttemptStore::in_dir(dir.path())));
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn test_oversized_history_is_pruned_on_load() {
        let store = MemoryAttemptStore::new();
        let oversized: Vec<(String, u64)> = (0..40).map(|n| (peer(n), n as u64)).collect();
        store.save(&oversized).unwrap();

        let ledger = AttemptLedger::load(Box::new(store));
        assert_eq!(ledger.len(), MAX_LEDGER_ENTRIES);
        assert_eq!(ledger.snapshot().first().map(|r| r.timestamp_ms), Some(39));
    }
}
