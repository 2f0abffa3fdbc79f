//! Errors surfaced by the protocol engine.
//!
//! Stale or tombstoned gossip is not an error: it comes back as a
//! [`MergeResult`](crate::swim::MergeResult) instead.

use crate::node::NodeIdentityError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SwimError {
    /// A payload or message violated a size or shape invariant.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid node identity: {0}")]
    InvalidNode(#[from] NodeIdentityError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SwimError>;
