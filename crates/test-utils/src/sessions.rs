//! A session book that records forced closes.

use std::collections::HashMap;

use parking_lot::Mutex;

use palisade_api::{PeerIdentity, SessionControl};

/// Counts open sessions per peer and logs every `close_sessions` call,
/// including ones that found nothing to close.
#[derive(Debug)]
pub struct RecordingSessions<Id: PeerIdentity> {
    open: Mutex<HashMap<Id, usize>>,
    closed: Mutex<Vec<Id>>,
}

impl<Id: PeerIdentity> Default for RecordingSessions<Id> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Id: PeerIdentity> RecordingSessions<Id> {
    pub fn new() -> Self {
        Self { open: Mutex::new(HashMap::new()), closed: Mutex::new(Vec::new()) }
    }

    /// Open one more session with `peer`.
    pub fn open_session(&self, peer: Id) {
        *self.open.lock().entry(peer).or_insert(0) += 1;
    }

    /// Open sessions with `peer` right now.
    pub fn session_count(&self, peer: &Id) -> usize {
        self.open.lock().get(peer).copied().unwrap_or(0)
    }

    /// Every peer passed to `close_sessions`, in call order.
    pub fn closed(&self) -> Vec<Id> {
        self.closed.lock().clone()
    }
}

impl<Id: PeerIdentity> SessionControl<Id> for RecordingSessions<Id> {
    fn close_sessions(&self, peer: &Id) -> usize {
        self.closed.lock().push(peer.clone());
        self.open.lock().remove(peer).unwrap_or(0)
    }
}
