//! Rejection reasons and firewall construction errors.

use thiserror::Error;

/// Why an inbound connection attempt was refused.
///
/// The `Display` text is the message sent back to the rejected peer, so
/// it deliberately reveals nothing about the local policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    /// The local identity explicitly blocks the peer.
    #[error("client is blocked")]
    Blocked,
    /// The peer is outside the local identity's trust radius.
    #[error("client is a stranger")]
    Unknown,
}

/// Refusal to construct a firewall from incomplete parts.
#[derive(Debug, Error)]
pub enum BuildError {
    /// No trust graph was supplied. Admission rules cannot run without one.
    #[error("trust graph is required")]
    TrustGraphMissing,
    /// No session control was supplied. Graph reactions cannot disconnect
    /// peers without one.
    #[error("session control is required")]
    SessionControlMissing,
}
