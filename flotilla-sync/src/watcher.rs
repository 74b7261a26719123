//! Connected-set change detection.
//!
//! No reactive framework: an explicit last-observed value plus a structural
//! equality check, run after every mutation that could affect the connected
//! subset. The push callback fires only when the set contents actually
//! differ — two identical observations in a row never fire twice.

use std::collections::BTreeSet;

use flotilla_core::ClusterId;

/// Callback invoked when the connected set changes.
pub type PushCallback = Box<dyn Fn() + Send>;

/// Watches the registry's connected subset by structural equality.
///
/// Comparison is order-independent: the observed value is a set of ids, so
/// two observations with the same membership are equal regardless of how the
/// registry happened to order them.
pub struct ConnectedSetWatcher {
    last_observed: BTreeSet<ClusterId>,
    on_change: Option<PushCallback>,
}

impl ConnectedSetWatcher {
    /// Starts with an empty baseline: the first non-empty observation fires.
    pub fn new() -> Self {
        Self {
            last_observed: BTreeSet::new(),
            on_change: None,
        }
    }

    pub fn set_callback(&mut self, callback: PushCallback) {
        self.on_change = Some(callback);
    }

    /// Drop the callback. Subsequent changes still update the baseline but
    /// trigger nothing. Idempotent.
    pub fn clear_callback(&mut self) {
        self.on_change = None;
    }

    pub fn has_callback(&self) -> bool {
        self.on_change.is_some()
    }

    /// Compare `current` against the last observation; on difference, record
    /// it and fire the callback. Returns whether a change was detected.
    pub fn observe(&mut self, current: BTreeSet<ClusterId>) -> bool {
        if current == self.last_observed {
            return false;
        }
        self.last_observed = current;
        if let Some(callback) = &self.on_change {
            callback();
        }
        true
    }
}

impl Default for ConnectedSetWatcher {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
