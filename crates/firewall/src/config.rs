//! Admission policy configuration, mutable at runtime.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// What a rule does when the trust-graph query it depends on fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Skip the rule. An unanswerable check never rejects on its own.
    Open,
    /// Reject when the check cannot be answered.
    Closed,
}

/// Admission policy for inbound connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallConfig {
    /// Reject peers the local identity explicitly blocks.
    #[serde(default = "default_reject_blocked")]
    pub reject_blocked: bool,
    /// Reject peers outside the local identity's trust radius.
    #[serde(default)]
    pub reject_unknown: bool,
    /// Behavior when a trust-graph query fails mid-decision.
    #[serde(default = "default_graph_failure")]
    pub graph_failure: FailurePolicy,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            reject_blocked: default_reject_blocked(),
            reject_unknown: false,
            graph_failure: default_graph_failure(),
        }
    }
}

fn default_reject_blocked() -> bool {
    true
}

fn default_graph_failure() -> FailurePolicy {
    FailurePolicy::Open
}

/// Partial policy update. `None` fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub reject_blocked: Option<bool>,
    pub reject_unknown: Option<bool>,
}

/// Shared handle to the live policy. Clones see each other's updates.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<FirewallConfig>>,
}

impl SharedConfig {
    pub fn new(config: FirewallConfig) -> Self {
        Self { inner: Arc::new(RwLock::new(config)) }
    }

    /// Copy of the current policy.
    pub fn get(&self) -> FirewallConfig {
        *self.inner.read()
    }

    /// Apply a partial update atomically.
    pub fn apply(&self, update: ConfigUpdate) {
        let mut config = self.inner.write();
        if let Some(reject_blocked) = update.reject_blocked {
            config.reject_blocked = reject_blocked;
        }
        if let Some(reject_unknown) = update.reject_unknown {
            config.reject_unknown = reject_unknown;
        }
    }
}
