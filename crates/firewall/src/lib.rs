//! Admission control for inbound peer connections, driven by a social
//! trust graph.
//!
//! The engine applies two independently togglable rules to every
//! inbound attempt: refuse explicitly blocked peers, and refuse peers
//! outside the local trust radius. Strangers we dialed first are
//! exempt for a few minutes so reciprocal connections survive the
//! policy. Rejected strangers land in a small persisted ledger and a
//! live notification stream; trust-graph changes feed back through a
//! reactor that disconnects peers whose authorization lapsed.

pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod notify;
pub mod outgoing;
mod reactor;
pub mod store;

pub use config::{ConfigUpdate, FailurePolicy, FirewallConfig, SharedConfig};
pub use engine::{Firewall, FirewallBuilder, NOTIFY_DEDUP_WINDOW_MS};
pub use error::{BuildError, Rejection};
pub use ledger::{AttemptLedger, AttemptRecord, MAX_LEDGER_ENTRIES};
pub use notify::{AttemptNotifier, AttemptsQuery};
pub use outgoing::{FORGET_THRESHOLD, OutgoingTracker, SWEEP_INTERVAL};
pub use store::{
    ATTEMPTS_FILE_NAME, AttemptStore, FileAttemptStore, MemoryAttemptStore, StoreError,
};
