//! Error types for flotilla-sync.

use thiserror::Error;

use crate::Role;

/// Errors from the sync protocol drivers.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A driver was constructed for the wrong process role.
    #[error("component requires the {expected} role but this process is {actual}")]
    WrongRole { expected: Role, actual: Role },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from a message channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The other end of the channel is gone; nothing can be delivered.
    #[error("channel peer is gone")]
    PeerGone,
}
