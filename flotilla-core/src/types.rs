//! Domain types for the Flotilla cluster registry.
//!
//! Split between what is persisted and what is not is strict:
//! [`ClusterModel`] holds configuration fields only and round-trips through
//! the document store; [`RuntimeState`] is derived, rides sync messages, and
//! is never written to disk.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::migrate::CURRENT_VERSION;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed cluster identifier.
///
/// Opaque, assigned at creation, stable for the lifetime of a cluster, never
/// reused after removal within a running process. Ids may contain dots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterId(pub String);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ClusterId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClusterId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Persisted model
// ---------------------------------------------------------------------------

/// The serializable, persisted representation of one cluster.
///
/// Configuration only — no runtime or derived fields. `model -> disk -> model`
/// is identity modulo migration normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterModel {
    pub id: ClusterId,
    pub name: String,
    pub connection_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default = "default_created_at")]
    pub created_at: DateTime<Utc>,
}

fn default_created_at() -> DateTime<Utc> {
    Utc::now()
}

// ---------------------------------------------------------------------------
// Runtime state
// ---------------------------------------------------------------------------

/// Connectivity of a live cluster, as reported by the cluster itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
        }
    }
}

/// Derived, non-persisted, time-varying summary of one cluster's live status.
///
/// Applied as an idempotent full replacement on the receiving side, so sync
/// message reordering converges without version vectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RuntimeState {
    pub status: ConnectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    #[serde(default)]
    pub is_writable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

// ---------------------------------------------------------------------------
// Collaborator payloads
// ---------------------------------------------------------------------------

/// Opaque per-cluster configuration payload.
///
/// Produced by [`crate::cluster::ClusterFactory::read_config`] and consumed by
/// [`crate::cluster::ClusterFactory::create`]; the registry never looks inside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigHandle(pub Value);

// ---------------------------------------------------------------------------
// Persisted document
// ---------------------------------------------------------------------------

/// Root of the persisted cluster document — the unit written to and read
/// from durable storage. The `version` tag lives outside the migrated fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedDocument {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub clusters: Vec<ClusterModel>,
}

impl PersistedDocument {
    /// An empty document at the current schema version.
    pub fn empty() -> Self {
        Self {
            version: CURRENT_VERSION,
            clusters: vec![],
        }
    }
}

impl Default for PersistedDocument {
    fn default() -> Self {
        Self::empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
