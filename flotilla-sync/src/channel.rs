//! Abstract bidirectional message channel.
//!
//! The protocol drivers never see a transport: they speak
//! `send(topic, payload)` / `subscribe(topic, handler)` against a
//! [`MessageChannel`]. [`LocalChannel`] is the in-process implementation used
//! by tests and same-process wiring; the daemon supplies a socket-backed one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use crate::error::ChannelError;
use crate::lock;

/// Message payload. Topics define the expected shape.
pub type Payload = serde_json::Value;

/// Subscriber callback. Invoked synchronously on the delivering side's
/// logical thread.
pub type ChannelHandler = Arc<dyn Fn(Payload) + Send + Sync>;

/// Handle returned by [`MessageChannel::subscribe`], used to detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// One end of a bidirectional topic channel.
pub trait MessageChannel: Send + Sync {
    /// Deliver `payload` to the peer's subscribers for `topic`.
    fn send(&self, topic: &str, payload: Payload) -> Result<(), ChannelError>;

    /// Attach a handler for inbound messages on `topic`.
    fn subscribe(&self, topic: &str, handler: ChannelHandler) -> SubscriptionId;

    /// Detach a handler. Unknown or already-removed ids are a no-op.
    fn unsubscribe(&self, id: SubscriptionId);
}

// ---------------------------------------------------------------------------
// In-process channel
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    by_topic: HashMap<String, Vec<(SubscriptionId, ChannelHandler)>>,
}

/// In-process channel endpoint. `send` dispatches synchronously to the peer
/// endpoint's subscribers.
pub struct LocalChannel {
    local: Arc<Mutex<Subscribers>>,
    peer: Weak<Mutex<Subscribers>>,
}

impl LocalChannel {
    /// A connected pair of endpoints. Dropping one side makes the other's
    /// `send` fail with [`ChannelError::PeerGone`].
    pub fn pair() -> (LocalChannel, LocalChannel) {
        let a = Arc::new(Mutex::new(Subscribers::default()));
        let b = Arc::new(Mutex::new(Subscribers::default()));
        (
            LocalChannel {
                local: a.clone(),
                peer: Arc::downgrade(&b),
            },
            LocalChannel {
                local: b,
                peer: Arc::downgrade(&a),
            },
        )
    }
}

impl MessageChannel for LocalChannel {
    fn send(&self, topic: &str, payload: Payload) -> Result<(), ChannelError> {
        let peer = self.peer.upgrade().ok_or(ChannelError::PeerGone)?;

        // Clone the handler list out so the lock is not held across handler
        // invocation — handlers are allowed to send back on this channel.
        let handlers: Vec<ChannelHandler> = {
            let subs = lock(&peer);
            subs.by_topic
                .get(topic)
                .map(|entries| entries.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };

        for handler in handlers {
            handler(payload.clone());
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str, handler: ChannelHandler) -> SubscriptionId {
        let mut subs = lock(&self.local);
        subs.next_id += 1;
        let id = SubscriptionId(subs.next_id);
        subs.by_topic
            .entry(topic.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = lock(&self.local);
        for entries in subs.by_topic.values_mut() {
            entries.retain(|(sub_id, _)| *sub_id != id);
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn send_reaches_peer_subscribers_only() {
        let (a, b) = LocalChannel::pair();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_b = hits.clone();
        b.subscribe(
            "ping",
            Arc::new(move |_| {
                hits_b.fetch_add(1, Ordering::SeqCst);
            }),
        );
        // A subscriber on the sending side must not hear its own send.
        let hits_a = hits.clone();
        a.subscribe(
            "ping",
            Arc::new(move |_| {
                hits_a.fetch_add(100, Ordering::SeqCst);
            }),
        );

        a.send("ping", Payload::Null).expect("send");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn send_to_topic_without_subscribers_is_ok() {
        let (a, _b) = LocalChannel::pair();
        a.send("nobody-home", Payload::Null).expect("send");
    }

    #[test]
    fn unsubscribe_stops_delivery_and_is_idempotent() {
        let (a, b) = LocalChannel::pair();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_b = hits.clone();
        let sub = b.subscribe(
            "ping",
            Arc::new(move |_| {
                hits_b.fetch_add(1, Ordering::SeqCst);
            }),
        );

        a.send("ping", Payload::Null).expect("send");
        b.unsubscribe(sub);
        b.unsubscribe(sub); // second detach must not fail
        a.send("ping", Payload::Null).expect("send");

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn send_fails_when_peer_dropped() {
        let (a, b) = LocalChannel::pair();
        drop(b);
        let err = a.send("ping", Payload::Null).unwrap_err();
        assert!(matches!(err, ChannelError::PeerGone));
    }

    #[test]
    fn handler_may_send_back_without_deadlock() {
        let (a, b) = LocalChannel::pair();
        let a = Arc::new(a);
        let b = Arc::new(b);
        let got_reply = Arc::new(AtomicUsize::new(0));

        let b_for_handler = b.clone();
        b.subscribe(
            "ask",
            Arc::new(move |_| {
                b_for_handler
                    .send("answer", Payload::Null)
                    .expect("reply send");
            }),
        );
        let got = got_reply.clone();
        a.subscribe(
            "answer",
            Arc::new(move |_| {
                got.fetch_add(1, Ordering::SeqCst);
            }),
        );

        a.send("ask", Payload::Null).expect("send");
        assert_eq!(got_reply.load(Ordering::SeqCst), 1);
    }
}
