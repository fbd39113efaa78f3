//! Capability registry: which mutation features are proven usable
//! against the attached process.
//!
//! Pure bookkeeping. An explicit context object passed into the bridge
//! handler at construction time, never an ambient singleton, so
//! independent sessions (and tests) do not share state. Entries live for
//! the whole process session and are never deleted.

use patchbridge_common::{reason, CapabilityEntry, CapabilityState};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    entries: Mutex<HashMap<String, CapabilityEntry>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a feature as verified-available with the default probe reason.
    pub fn mark_available(&self, feature_id: &str) {
        self.mark_available_with(feature_id, reason::CAPABILITY_PROBE_PASS);
    }

    /// Mark a feature as verified-available. Idempotent overwrite.
    pub fn mark_available_with(&self, feature_id: &str, reason_code: &str) {
        let entry = CapabilityEntry {
            available: true,
            state: CapabilityState::Verified,
            reason_code: reason_code.to_string(),
        };
        self.lock().insert(feature_id.to_string(), entry);
    }

    /// False for any feature never marked available.
    pub fn is_available(&self, feature_id: &str) -> bool {
        self.lock()
            .get(feature_id)
            .map(|entry| entry.available)
            .unwrap_or(false)
    }

    /// Point-in-time copy for diagnostics export, sorted for stable output.
    pub fn snapshot(&self) -> BTreeMap<String, CapabilityEntry> {
        self.lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CapabilityEntry>> {
        // A poisoned lock only means another thread panicked mid-insert;
        // the map itself stays usable.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
