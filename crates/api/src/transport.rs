//! Transport-runtime boundary for forcibly ending peer sessions.

use crate::identity::PeerIdentity;

/// Hard session termination, used when a peer loses its authorization
/// while connected.
#[auto_impl::auto_impl(&, Arc)]
pub trait SessionControl<Id: PeerIdentity>: Send + Sync + 'static {
    /// Close every open session with `peer`, in both directions.
    ///
    /// Returns the number of sessions closed; zero when none were open.
    fn close_sessions(&self, peer: &Id) -> usize;
}
