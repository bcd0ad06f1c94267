//! Errors surfaced by trust-graph queries.

use thiserror::Error;

/// Failure answering a trust-graph query.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Backend error: {0}")]
    Backend(String),
}
