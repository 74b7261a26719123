//! Inbound state-update listener lifecycle.
//!
//! One listener attachment per channel: `register` wires the `state-update`
//! handler (and nothing else happens if it is already wired), `unregister`
//! releases the subscription and the push-on-change callback. Both are
//! idempotent; a message racing a teardown lands in "unknown id → ignore".

use std::sync::Arc;

use crate::channel::{MessageChannel, Payload, SubscriptionId};
use crate::messages::{StateUpdate, TOPIC_STATE_UPDATE};
use crate::{lock, SharedRegistry, SharedWatcher};

pub struct StateListener {
    registry: SharedRegistry,
    channel: Arc<dyn MessageChannel>,
    /// Watcher whose push callback this listener owns, if any.
    watcher: Option<SharedWatcher>,
    subscription: Option<SubscriptionId>,
}

impl StateListener {
    pub fn new(registry: SharedRegistry, channel: Arc<dyn MessageChannel>) -> Self {
        Self {
            registry,
            channel,
            watcher: None,
            subscription: None,
        }
    }

    /// Also take ownership of `watcher`'s push callback: `unregister` will
    /// clear it along with the subscription.
    pub fn with_watcher(mut self, watcher: SharedWatcher) -> Self {
        self.watcher = Some(watcher);
        self
    }

    /// Attach the `state-update` handler. Guarded: a second `register`
    /// without an intervening `unregister` does not create duplicate
    /// delivery.
    pub fn register(&mut self) {
        if self.subscription.is_some() {
            return;
        }

        let registry = self.registry.clone();
        let subscription = self.channel.subscribe(
            TOPIC_STATE_UPDATE,
            Arc::new(move |payload: Payload| {
                let update: StateUpdate = match serde_json::from_value(payload) {
                    Ok(update) => update,
                    Err(err) => {
                        log::warn!("ignoring malformed state-update payload: {err}");
                        return;
                    }
                };
                // Unknown ids are silently ignored inside apply_state.
                lock(&registry).apply_state(&update.id, update.state);
            }),
        );
        self.subscription = Some(subscription);
    }

    /// Detach the handler and release the push-on-change callback.
    /// Idempotent — calling it twice, or without a prior `register`, is a
    /// safe no-op.
    pub fn unregister(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            self.channel.unsubscribe(subscription);
        }
        if let Some(watcher) = &self.watcher {
            lock(watcher).clear_callback();
        }
    }

    pub fn is_registered(&self) -> bool {
        self.subscription.is_some()
    }
}
