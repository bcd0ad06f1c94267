//! Marker trait for peer identity types.

use std::fmt::Debug;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// Blanket-implemented for any type with Clone + Eq + Ord + Hash + Send + Sync + Debug + Serialize + Deserialize.
///
/// `Ord` keeps pruning and persisted snapshots deterministic when timestamps tie.
pub trait PeerIdentity:
    Clone + Eq + Ord + Hash + Send + Sync + Debug + Serialize + for<'de> Deserialize<'de> + 'static
{
}

impl<T> PeerIdentity for T where
    T: Clone
        + Eq
        + Ord
        + Hash
        + Send
        + Sync
        + Debug
        + Serialize
        + for<'de> Deserialize<'de>
        + 'static
{
}
