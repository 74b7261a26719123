//! Primary-side protocol driver: snapshot responder and push-on-change.

use std::sync::Arc;

use crate::channel::{MessageChannel, SubscriptionId};
use crate::error::SyncError;
use crate::messages::{ClusterStateEntry, TOPIC_ALL_STATES, TOPIC_REQUEST_ALL};
use crate::watcher::ConnectedSetWatcher;
use crate::{lock, Role, SharedRegistry};

/// Answers `request-all-states` and fans out pushes when the connected set
/// changes. Only a primary-role process may construct one.
pub struct PrimarySync {
    registry: SharedRegistry,
}

impl std::fmt::Debug for PrimarySync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimarySync").finish_non_exhaustive()
    }
}

impl PrimarySync {
    /// Role is checked once here and never re-evaluated.
    pub fn new(role: Role, registry: SharedRegistry) -> Result<Self, SyncError> {
        match role {
            Role::Primary => Ok(Self { registry }),
            Role::Secondary => Err(SyncError::WrongRole {
                expected: Role::Primary,
                actual: role,
            }),
        }
    }

    /// Full `{id, state}` listing for every currently registered cluster,
    /// with each state read at call time — never cached.
    pub fn snapshot(&self) -> Vec<ClusterStateEntry> {
        let registry = lock(&self.registry);
        registry
            .list()
            .iter()
            .map(|cluster| ClusterStateEntry {
                id: cluster.id().clone(),
                state: cluster.runtime_state(),
            })
            .collect()
    }

    /// Wire the snapshot responder onto `channel`: every inbound
    /// `request-all-states` is answered with an `all-states` snapshot read at
    /// response time.
    pub fn attach(&self, channel: &Arc<dyn MessageChannel>) -> SubscriptionId {
        let registry = self.registry.clone();
        let reply_channel = Arc::downgrade(channel);
        channel.subscribe(
            TOPIC_REQUEST_ALL,
            Arc::new(move |_payload| {
                let Some(channel) = reply_channel.upgrade() else {
                    return; // channel torn down while the request was in flight
                };
                let entries: Vec<ClusterStateEntry> = {
                    let registry = lock(&registry);
                    registry
                        .list()
                        .iter()
                        .map(|cluster| ClusterStateEntry {
                            id: cluster.id().clone(),
                            state: cluster.runtime_state(),
                        })
                        .collect()
                };
                let payload = match serde_json::to_value(&entries) {
                    Ok(payload) => payload,
                    Err(err) => {
                        log::warn!("failed to encode all-states snapshot: {err}");
                        return;
                    }
                };
                if let Err(err) = channel.send(TOPIC_ALL_STATES, payload) {
                    log::warn!("failed to send all-states snapshot: {err}");
                }
            }),
        )
    }

    /// Ask every registered cluster to propagate its own state onward.
    ///
    /// The fan-out transport is each cluster's business; the registry knows
    /// nothing about it.
    pub fn push_all(&self) {
        let registry = lock(&self.registry);
        for cluster in registry.list() {
            cluster.publish_state();
        }
    }

    /// Install push-on-change: when `watcher` detects a connected-set
    /// difference, [`PrimarySync::push_all`] runs.
    ///
    /// Callers must not hold the registry lock while calling
    /// `watcher.observe(..)`, since the callback re-locks it.
    pub fn wire_push(&self, watcher: &mut ConnectedSetWatcher) {
        let registry = self.registry.clone();
        watcher.set_callback(Box::new(move || {
            let registry = lock(&registry);
            for cluster in registry.list() {
                cluster.publish_state();
            }
        }));
    }
}
