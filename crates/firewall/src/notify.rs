//! Non-blocking fan-out of freshly logged rejections.

use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::debug;

use palisade_api::PeerIdentity;

use crate::ledger::AttemptRecord;

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast of newly recorded rejections. Slow subscribers drop events
/// independently; publishing never blocks the admission path.
#[derive(Debug)]
pub struct AttemptNotifier<Id: PeerIdentity> {
    tx: broadcast::Sender<AttemptRecord<Id>>,
}

impl<Id: PeerIdentity> Clone for AttemptNotifier<Id> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<Id: PeerIdentity> Default for AttemptNotifier<Id> {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl<Id: PeerIdentity> AttemptNotifier<Id> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a rejection to current subscribers. No-op without any.
    pub fn publish(&self, record: AttemptRecord<Id>) {
        let _ = self.tx.send(record);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AttemptRecord<Id>> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Stream of rejections published after this call. A subscriber that
    /// falls behind skips the overwritten events and keeps going.
    pub fn live_stream(&self) -> BoxStream<'static, AttemptRecord<Id>> {
        BroadcastStream::new(self.subscribe())
            .filter_map(|result| {
                futures::future::ready(match result {
                    Ok(record) => Some(record),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        debug!(skipped, "attempts subscriber lagged");
                        None
                    }
                })
            })
            .boxed()
    }
}

/// Which rejected attempts a query returns.
///
/// Absent fields on the wire mean "no history, live only", matching the
/// common case of a UI that only cares about events from now on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptsQuery {
    /// Replay the persisted history first, newest first.
    #[serde(default)]
    pub old: bool,
    /// Keep streaming rejections recorded after the subscription.
    #[serde(default = "default_live")]
    pub live: bool,
}

impl Default for AttemptsQuery {
    fn default() -> Self {
        Self { old: false, live: true }
    }
}

fn default_live() -> bool {
    true
}

impl AttemptsQuery {
    /// Finite replay of the history, no live tail.
    pub fn old_only() -> Self {
        Self { old: true, live: false }
    }

    /// History first, then the live tail.
    pub fn old_and_live() -> Self {
        Self { old: true, live: true }
    }
}
