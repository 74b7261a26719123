//! Flotilla synchronization layer.
//!
//! Keeps a primary process and N secondary view processes converged on the
//! same logical cluster state:
//! - [`channel`] — transport-agnostic bidirectional message channel
//! - [`messages`] — wire topics and payload types
//! - [`watcher`] — structural-equality change detection over the connected set
//! - [`primary`] — snapshot responder and push-on-change (primary role only)
//! - [`secondary`] — one-shot initial pull (secondary role only)
//! - [`listener`] — inbound state-update handler lifecycle

use std::fmt;
use std::sync::{Arc, Mutex};

use flotilla_core::ClusterRegistry;

pub mod channel;
pub mod error;
pub mod listener;
pub mod messages;
pub mod primary;
pub mod secondary;
pub mod watcher;

pub use channel::{ChannelHandler, LocalChannel, MessageChannel, Payload, SubscriptionId};
pub use error::{ChannelError, SyncError};
pub use listener::StateListener;
pub use messages::{ClusterStateEntry, StateUpdate};
pub use primary::PrimarySync;
pub use secondary::SecondarySync;
pub use watcher::ConnectedSetWatcher;

/// The registry as shared between the sync drivers of one process.
///
/// The registry itself is single-threaded; this lock only serializes access
/// from the owning process's message handlers.
pub type SharedRegistry = Arc<Mutex<ClusterRegistry>>;

/// Shared handle to the process's connected-set watcher.
pub type SharedWatcher = Arc<Mutex<ConnectedSetWatcher>>;

/// Which side of the replication protocol this process plays.
///
/// Decided once at construction of the sync drivers, never re-evaluated, and
/// never inferred from ambient process state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Durable owner of truth; persists the document, answers snapshots,
    /// pushes on change.
    Primary,
    /// Ephemeral view; pulls one snapshot on attach, then listens.
    Secondary,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Primary => write!(f, "primary"),
            Role::Secondary => write!(f, "secondary"),
        }
    }
}

/// Lock a mutex, recovering from poisoning — registry state stays usable
/// even if a handler panicked while holding the lock.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
