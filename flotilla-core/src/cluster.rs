//! The live-cluster seam and its injected collaborators.
//!
//! The registry owns the lifetime of every [`Cluster`] it holds but never
//! constructs one itself: construction goes through a [`ClusterFactory`]
//! supplied at registry creation, and creation events go to an [`EventSink`].
//! How a cluster connects to its backend, computes its runtime state, or
//! fans its state out to attached views is entirely up to the implementation.

use crate::error::{ClusterError, FactoryError};
use crate::types::{ClusterId, ClusterModel, ConfigHandle, RuntimeState};

/// One live cluster: a registered [`ClusterModel`] plus derived runtime state.
pub trait Cluster {
    /// The identifier this cluster was created with. Immutable.
    fn id(&self) -> &ClusterId;

    /// Replace the configuration model in place. Runtime state must survive
    /// the update; the identifier must not change.
    fn apply_model(&mut self, model: ClusterModel) -> Result<(), ClusterError>;

    /// Current runtime state, read live (never cached by callers).
    fn runtime_state(&self) -> RuntimeState;

    /// Apply an externally observed runtime state as a full replacement.
    fn apply_runtime_state(&mut self, state: RuntimeState);

    fn is_disconnected(&self) -> bool;

    /// Serialize back to the persisted model. Must be a deep copy.
    fn to_model(&self) -> ClusterModel;

    /// Propagate this cluster's current state onward to attached views.
    /// The fan-out transport is chosen by the implementation.
    fn publish_state(&self);
}

/// Injected constructor collaborator for live clusters.
pub trait ClusterFactory: Send + Sync {
    /// Resolve the opaque per-cluster configuration for `model`. Synchronous,
    /// may fail.
    fn read_config(&self, model: &ClusterModel) -> Result<ConfigHandle, FactoryError>;

    /// Build a live cluster from a model and its resolved config. May fail;
    /// failures are catchable by the caller.
    fn create(
        &self,
        model: ClusterModel,
        config: ConfigHandle,
    ) -> Result<Box<dyn Cluster + Send>, FactoryError>;
}

/// Registry lifecycle events, delivered fire-and-forget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    ClusterCreated { id: ClusterId },
}

/// Append-only event sink. Implementations must not block or panic into the
/// caller.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RegistryEvent);
}

/// Sink that drops every event. Useful for tests and read-only tooling.
#[derive(Debug, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: RegistryEvent) {}
}
