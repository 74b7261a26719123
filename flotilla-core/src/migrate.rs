//! Persisted-document schema migrations.
//!
//! # Version history
//!
//! - v1 — initial format; clusters carried a `connection_string` field.
//! - v2 — `connection_string` renamed to `connection_uri`.
//! - v3 — the top-level `favorites: [id]` array replaced by a per-cluster
//!   `favorite: bool` flag.
//!
//! Steps are applied strictly in ascending order starting just above the
//! stored version, each consuming the document produced by the previous one.
//! A stored version equal to [`CURRENT_VERSION`] is a no-op. Any step failing
//! aborts the whole load — no partially migrated document is ever returned.

use serde_json::Value;

use crate::error::MigrateError;
use crate::types::PersistedDocument;

/// Current schema version written by `store::save`.
pub const CURRENT_VERSION: u32 = 3;

type Step = fn(Value) -> Result<Value, MigrateError>;

/// `(target_version, step)` pairs, ascending. A step at `(n, f)` consumes a
/// version `n-1` document and produces a version `n` document.
const STEPS: &[(u32, Step)] = &[(2, connection_string_to_uri), (3, favorites_array_to_flag)];

/// Normalize a raw persisted document from `from` to the current schema.
pub fn migrate(raw: Value, from: u32) -> Result<PersistedDocument, MigrateError> {
    if from == 0 {
        return Err(MigrateError::InvalidVersion(0));
    }
    if from > CURRENT_VERSION {
        return Err(MigrateError::VersionTooNew {
            found: from,
            current: CURRENT_VERSION,
        });
    }

    let mut doc = raw;
    for (to, step) in STEPS {
        if *to <= from {
            continue;
        }
        doc = step(doc)?;
    }

    let mut parsed: PersistedDocument =
        serde_json::from_value(doc).map_err(MigrateError::Decode)?;
    parsed.version = CURRENT_VERSION;
    Ok(parsed)
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// v1 -> v2: rename each cluster's `connection_string` to `connection_uri`.
fn connection_string_to_uri(mut doc: Value) -> Result<Value, MigrateError> {
    for cluster in clusters_mut(&mut doc, 2)? {
        let Some(obj) = cluster.as_object_mut() else {
            return Err(step_err(2, "cluster entry is not an object"));
        };
        if let Some(uri) = obj.remove("connection_string") {
            obj.insert("connection_uri".to_string(), uri);
        }
    }
    Ok(doc)
}

/// v2 -> v3: hoist the top-level `favorites` id array into per-cluster
/// `favorite` flags, then drop the array.
fn favorites_array_to_flag(mut doc: Value) -> Result<Value, MigrateError> {
    let favorites: Vec<String> = match doc
        .as_object_mut()
        .ok_or_else(|| step_err(3, "document root is not an object"))?
        .remove("favorites")
    {
        Some(Value::Array(ids)) => ids
            .into_iter()
            .map(|id| {
                id.as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| step_err(3, "favorites entry is not a string"))
            })
            .collect::<Result<_, _>>()?,
        Some(_) => return Err(step_err(3, "favorites is not an array")),
        None => vec![],
    };

    for cluster in clusters_mut(&mut doc, 3)? {
        let Some(obj) = cluster.as_object_mut() else {
            return Err(step_err(3, "cluster entry is not an object"));
        };
        let id = obj.get("id").and_then(Value::as_str).unwrap_or_default();
        let favorite = favorites.iter().any(|f| f == id);
        obj.insert("favorite".to_string(), Value::Bool(favorite));
    }
    Ok(doc)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn clusters_mut(doc: &mut Value, to: u32) -> Result<&mut Vec<Value>, MigrateError> {
    let root = doc
        .as_object_mut()
        .ok_or_else(|| step_err(to, "document root is not an object"))?;
    match root
        .entry("clusters")
        .or_insert_with(|| Value::Array(vec![]))
    {
        Value::Array(clusters) => Ok(clusters),
        _ => Err(step_err(to, "clusters is not an array")),
    }
}

fn step_err(to: u32, reason: impl Into<String>) -> MigrateError {
    MigrateError::Step {
        to,
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
