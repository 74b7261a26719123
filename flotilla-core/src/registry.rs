//! In-memory cluster registry and the reload reconciliation algorithm.
//!
//! The registry is the single source of truth for "does cluster X currently
//! exist in this process". It exclusively owns the lifetime of every live
//! cluster it holds; construction is delegated to the injected
//! [`ClusterFactory`] and creation events to the injected [`EventSink`].
//!
//! There is no explicit delete operation: a cluster is destroyed only by
//! being absent from a subsequent full [`ClusterRegistry::reload`].
//!
//! The registry itself is single-threaded; callers that share it across
//! tasks wrap it in their own lock.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::cluster::{Cluster, ClusterFactory, EventSink, RegistryEvent};
use crate::error::RegistryError;
use crate::migrate::CURRENT_VERSION;
use crate::types::{ClusterId, ClusterModel, PersistedDocument, RuntimeState};

type LiveCluster = Box<dyn Cluster + Send>;

/// Counts reported by one [`ClusterRegistry::reload`] pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReloadSummary {
    /// Existing clusters updated in place.
    pub updated: usize,
    /// Clusters newly constructed from incoming models.
    pub created: usize,
    /// Clusters dropped because their id was absent from the incoming list.
    pub dropped: usize,
    /// Incoming models skipped because construction or update failed.
    pub skipped: usize,
}

/// Mapping from [`ClusterId`] to live cluster, in document order.
pub struct ClusterRegistry {
    clusters: HashMap<ClusterId, LiveCluster>,
    /// Insertion/document order of the keys in `clusters`.
    order: Vec<ClusterId>,
    factory: Arc<dyn ClusterFactory>,
    events: Arc<dyn EventSink>,
}

impl ClusterRegistry {
    pub fn new(factory: Arc<dyn ClusterFactory>, events: Arc<dyn EventSink>) -> Self {
        Self {
            clusters: HashMap::new(),
            order: Vec::new(),
            factory,
            events,
        }
    }

    // -----------------------------------------------------------------------
    // 1. Add
    // -----------------------------------------------------------------------

    /// Construct a live cluster from `model` via the factory and register it.
    ///
    /// Collaborator failures propagate to the caller — this path has no
    /// partial-failure tolerance, unlike [`ClusterRegistry::reload`].
    pub fn add_model(&mut self, model: ClusterModel) -> Result<&dyn Cluster, RegistryError> {
        let cluster = self.construct(model)?;
        Ok(self.add_cluster(cluster))
    }

    /// Register an already-constructed live cluster as-is, under its own id,
    /// overwriting any prior entry with the same id.
    pub fn add_cluster(&mut self, cluster: LiveCluster) -> &dyn Cluster {
        let id = cluster.id().clone();
        self.events
            .emit(RegistryEvent::ClusterCreated { id: id.clone() });
        self.register(id.clone(), cluster);
        self.clusters[&id].as_ref()
    }

    // -----------------------------------------------------------------------
    // 2. Lookup
    // -----------------------------------------------------------------------

    /// The entry for `id`, or `None`. An absent id is a defined no-op, not an
    /// error case.
    pub fn get(&self, id: &ClusterId) -> Option<&dyn Cluster> {
        self.clusters.get(id).map(|c| c.as_ref() as &dyn Cluster)
    }

    pub fn get_mut(&mut self, id: &ClusterId) -> Option<&mut (dyn Cluster + Send)> {
        match self.clusters.get_mut(id) {
            Some(c) => Some(c.as_mut()),
            None => None,
        }
    }

    /// Snapshot of all live clusters in document order. Stable for the
    /// duration of one read.
    pub fn list(&self) -> Vec<&dyn Cluster> {
        self.order
            .iter()
            .filter_map(|id| self.get(id))
            .collect()
    }

    /// [`ClusterRegistry::list`] filtered to clusters that are not
    /// disconnected.
    pub fn connected(&self) -> Vec<&dyn Cluster> {
        self.list()
            .into_iter()
            .filter(|c| !c.is_disconnected())
            .collect()
    }

    /// Ids of the connected subset, as an order-independent set. This is the
    /// value the change-detection watcher observes.
    pub fn connected_ids(&self) -> BTreeSet<ClusterId> {
        self.connected().iter().map(|c| c.id().clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    // -----------------------------------------------------------------------
    // 3. Reload (reconciliation)
    // -----------------------------------------------------------------------

    /// Reconcile the registry against a freshly loaded model list.
    ///
    /// For each incoming model in input order: an existing cluster with the
    /// same id is updated in place (identity and runtime state survive);
    /// anything else is constructed fresh via the factory. A model whose
    /// update or construction fails is logged and skipped — one bad cluster
    /// must not abort the reload of the rest, and skipped models are not
    /// retried until the next reload. Finally the whole mapping is replaced:
    /// ids present only in the old map are dropped.
    pub fn reload(&mut self, models: Vec<ClusterModel>) -> ReloadSummary {
        let mut old = std::mem::take(&mut self.clusters);
        let mut next: HashMap<ClusterId, LiveCluster> = HashMap::new();
        let mut next_order: Vec<ClusterId> = Vec::new();
        let mut summary = ReloadSummary::default();

        for model in models {
            let id = model.id.clone();

            // A later duplicate of an id reconciled earlier this pass updates
            // the freshly built entry in place; routing it through the
            // factory would discard the runtime state the first occurrence
            // just carried over.
            if let Some(existing) = next.get_mut(&id) {
                match existing.apply_model(model) {
                    Ok(()) => summary.updated += 1,
                    Err(err) => {
                        log::warn!("skipping cluster '{id}' during reload: {err}");
                        summary.skipped += 1;
                    }
                }
                continue;
            }

            let cluster = match old.remove(&id) {
                Some(mut existing) => match existing.apply_model(model) {
                    Ok(()) => {
                        summary.updated += 1;
                        existing
                    }
                    Err(err) => {
                        log::warn!("skipping cluster '{id}' during reload: {err}");
                        summary.skipped += 1;
                        continue;
                    }
                },
                None => match self.construct(model) {
                    Ok(created) => {
                        summary.created += 1;
                        created
                    }
                    Err(err) => {
                        log::warn!("skipping cluster '{id}' during reload: {err}");
                        summary.skipped += 1;
                        continue;
                    }
                },
            };

            next.insert(id.clone(), cluster);
            next_order.push(id);
        }

        summary.dropped = old.len();
        for id in old.keys() {
            log::debug!("cluster '{id}' removed by reload");
        }

        self.clusters = next;
        self.order = next_order;
        summary
    }

    // -----------------------------------------------------------------------
    // 4. Serialize
    // -----------------------------------------------------------------------

    /// Materialize the registry as a persisted document at the current
    /// schema version. Fully deep-copied: later mutation of live clusters
    /// cannot change an already-returned document.
    pub fn serialize(&self) -> PersistedDocument {
        PersistedDocument {
            version: CURRENT_VERSION,
            clusters: self.list().iter().map(|c| c.to_model()).collect(),
        }
    }

    // -----------------------------------------------------------------------
    // 5. Inbound state
    // -----------------------------------------------------------------------

    /// Apply an externally observed runtime state to the cluster with `id`.
    /// Unknown ids are silently ignored — the cluster may not exist here yet.
    pub fn apply_state(&mut self, id: &ClusterId, state: RuntimeState) {
        if let Some(cluster) = self.get_mut(id) {
            cluster.apply_runtime_state(state);
        }
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    fn construct(&self, model: ClusterModel) -> Result<LiveCluster, RegistryError> {
        let config = self.factory.read_config(&model)?;
        Ok(self.factory.create(model, config)?)
    }

    fn register(&mut self, id: ClusterId, cluster: LiveCluster) {
        if self.clusters.insert(id.clone(), cluster).is_none() {
            self.order.push(id);
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
