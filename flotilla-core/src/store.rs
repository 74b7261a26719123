//! Persisted cluster document — atomic load / save.
//!
//! # Storage layout
//!
//! ```text
//! ~/.flotilla/
//!   clusters.json   (the versioned document — mode 0600)
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)` — explicit home; used in tests with `TempDir`
//! - `fn(…)` — derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.
//!
//! The document is exclusively owned and written by the primary process;
//! secondary processes only ever call `load`. Loading runs the migration
//! pipeline, so callers always see the current schema version. Ids and names
//! are plain JSON map keys and values — a dot in a key is never interpreted
//! as a nested path.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{io_err, RegistryError};
use crate::migrate::{self, CURRENT_VERSION};
use crate::types::PersistedDocument;

/// `<home>/.flotilla/`
pub fn flotilla_root(home: &Path) -> PathBuf {
    home.join(".flotilla")
}

/// `<home>/.flotilla/clusters.json` — pure, no I/O.
pub fn document_path_at(home: &Path) -> PathBuf {
    flotilla_root(home).join("clusters.json")
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Load and migrate the persisted document rooted at `home`.
///
/// A missing file yields an empty current-version document. A document that
/// cannot be parsed or migrated is a fatal load error — no partial state is
/// ever returned.
pub fn load_at(home: &Path) -> Result<PersistedDocument, RegistryError> {
    let path = document_path_at(home);
    if !path.exists() {
        return Ok(PersistedDocument::empty());
    }

    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    let raw: Value =
        serde_json::from_str(&contents).map_err(|e| RegistryError::Parse { path, source: e })?;
    let version = raw
        .get("version")
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(1); // pre-versioning documents are v1
    Ok(migrate::migrate(raw, version)?)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<PersistedDocument, RegistryError> {
    load_at(&home()?)
}

// ---------------------------------------------------------------------------
// Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save the document to `<home>/.flotilla/clusters.json`.
///
/// Write flow: serialize → `.json.tmp` sibling → `chmod 0600` → `rename`.
/// `.tmp` is always in the same directory as the target (same filesystem).
pub fn save_at(home: &Path, document: &PersistedDocument) -> Result<(), RegistryError> {
    let root = flotilla_root(home);
    if !root.exists() {
        std::fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
        set_dir_permissions(&root)?;
    }

    let path = document_path_at(home);
    let tmp_path = path.with_extension("json.tmp");

    let mut document = document.clone();
    document.version = CURRENT_VERSION;
    let json = serde_json::to_string_pretty(&document)?;
    std::fs::write(&tmp_path, json).map_err(|e| io_err(&tmp_path, e))?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(document: &PersistedDocument) -> Result<(), RegistryError> {
    save_at(&home()?, document)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, RegistryError> {
    dirs::home_dir().ok_or(RegistryError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
