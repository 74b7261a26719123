//! Wire topics and payload types.
//!
//! The protocol is transport-agnostic: three topics over any bidirectional
//! channel.
//!
//! | topic | direction | payload |
//! |---|---|---|
//! | `request-all-states` | secondary → primary | none |
//! | `all-states` | primary → secondary | `[ClusterStateEntry]` |
//! | `state-update` | either → either | `StateUpdate` |

use serde::{Deserialize, Serialize};

use flotilla_core::{ClusterId, RuntimeState};

/// One-shot snapshot pull issued by a freshly attached secondary.
pub const TOPIC_REQUEST_ALL: &str = "request-all-states";
/// Full point-in-time snapshot, the response to [`TOPIC_REQUEST_ALL`].
pub const TOPIC_ALL_STATES: &str = "all-states";
/// Single-cluster state replacement; apply-if-exists, else ignore.
pub const TOPIC_STATE_UPDATE: &str = "state-update";

/// One `{id, state}` pair of the snapshot response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStateEntry {
    pub id: ClusterId,
    pub state: RuntimeState,
}

/// A point-to-point per-cluster state message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub id: ClusterId,
    pub state: RuntimeState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_core::ConnectionStatus;

    #[test]
    fn state_update_serde_roundtrip() {
        let update = StateUpdate {
            id: ClusterId::from("prod.eu.main"),
            state: RuntimeState {
                status: ConnectionStatus::Connected,
                server_version: Some("7.0.4".to_string()),
                is_writable: true,
                last_error: None,
            },
        };
        let json = serde_json::to_value(&update).expect("serialize");
        let parsed: StateUpdate = serde_json::from_value(json).expect("deserialize");
        assert_eq!(parsed, update);
    }

    #[test]
    fn snapshot_entry_wire_shape() {
        let entry = ClusterStateEntry {
            id: ClusterId::from("a"),
            state: RuntimeState::default(),
        };
        let json = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(json["id"], "a");
        assert_eq!(json["state"]["status"], "disconnected");
    }
}
