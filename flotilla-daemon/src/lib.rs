//! Flotilla daemon — the primary process of the replicated cluster store.
//!
//! Loads and owns the persisted document, keeps the live registry
//! reconciled against it, and serves the replication protocol plus a small
//! control plane over a Unix socket at `~/.flotilla/daemon.sock`.

pub mod cluster;
pub mod error;
pub mod paths;
pub mod protocol;
pub mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request_add_cluster, request_all_states, request_list, request_status, request_stop,
    WireMessage,
};
pub use runtime::start_blocking;
