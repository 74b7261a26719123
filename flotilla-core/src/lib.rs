//! Flotilla core library — domain types, cluster registry, persistence, errors.
//!
//! Public API surface:
//! - [`types`] — newtypes, models, and the persisted document
//! - [`error`] — [`RegistryError`] and collaborator error types
//! - [`cluster`] — the [`Cluster`] seam and injected collaborators
//! - [`migrate`] — persisted-document schema migrations
//! - [`registry`] — the in-memory [`ClusterRegistry`] and reconciliation
//! - [`store`] — atomic load / save of the persisted document

pub mod cluster;
pub mod error;
pub mod migrate;
pub mod registry;
pub mod store;
pub mod types;

pub use cluster::{Cluster, ClusterFactory, EventSink, RegistryEvent};
pub use error::{ClusterError, FactoryError, MigrateError, RegistryError};
pub use registry::{ClusterRegistry, ReloadSummary};
pub use types::{
    ClusterId, ClusterModel, ConfigHandle, ConnectionStatus, PersistedDocument, RuntimeState,
};
