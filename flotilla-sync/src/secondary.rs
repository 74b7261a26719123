//! Secondary-side protocol driver: the one-shot initial pull.

use std::sync::Arc;

use crate::channel::{MessageChannel, Payload, SubscriptionId};
use crate::error::SyncError;
use crate::messages::{ClusterStateEntry, TOPIC_ALL_STATES, TOPIC_REQUEST_ALL};
use crate::{lock, Role, SharedRegistry};

/// Pulls one full snapshot on attach and applies it to the local registry.
///
/// This is a pull, not a subscription: ongoing updates after the initial
/// sync arrive only through the [`crate::listener::StateListener`].
pub struct SecondarySync {
    registry: SharedRegistry,
}

impl std::fmt::Debug for SecondarySync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecondarySync").finish_non_exhaustive()
    }
}

impl SecondarySync {
    /// Role is checked once here and never re-evaluated.
    pub fn new(role: Role, registry: SharedRegistry) -> Result<Self, SyncError> {
        match role {
            Role::Secondary => Ok(Self { registry }),
            Role::Primary => Err(SyncError::WrongRole {
                expected: Role::Secondary,
                actual: role,
            }),
        }
    }

    /// Subscribe for the snapshot response, then issue exactly one
    /// `request-all-states`.
    ///
    /// Each received `{id, state}` pair is applied to the matching local
    /// cluster; pairs with unknown ids are silently ignored — the cluster may
    /// not exist locally yet, which is not an error. A response arriving
    /// after the subscription was torn down is likewise a no-op.
    pub fn attach(&self, channel: &Arc<dyn MessageChannel>) -> Result<SubscriptionId, SyncError> {
        let registry = self.registry.clone();
        let subscription = channel.subscribe(
            TOPIC_ALL_STATES,
            Arc::new(move |payload: Payload| {
                let entries: Vec<ClusterStateEntry> = match serde_json::from_value(payload) {
                    Ok(entries) => entries,
                    Err(err) => {
                        log::warn!("ignoring malformed all-states payload: {err}");
                        return;
                    }
                };
                let mut registry = lock(&registry);
                for entry in entries {
                    registry.apply_state(&entry.id, entry.state);
                }
            }),
        );

        channel.send(TOPIC_REQUEST_ALL, Payload::Null)?;
        Ok(subscription)
    }
}
