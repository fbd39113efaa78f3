//! Hook lifecycle registry: install/fail/rollback state per mutation.
//!
//! Every transition is explicit and caller-driven; there are no automatic
//! transitions. Valid moves are NotInstalled -> Installed,
//! Installed -> Failed, Installed -> RolledBack, Failed -> Installed
//! (retry). Records are one-shot overwrites with no history.

use patchbridge_common::{reason, HookRecord, HookState};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct HookLifecycleRegistry {
    hooks: Mutex<HashMap<String, HookRecord>>,
}

impl HookLifecycleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_installed(&self, hook_id: &str) {
        self.put(
            hook_id,
            HookRecord {
                state: HookState::Installed,
                reason_code: reason::HOOK_OK.to_string(),
            },
        );
    }

    pub fn mark_failed(&self, hook_id: &str, reason_code: &str) {
        self.put(
            hook_id,
            HookRecord {
                state: HookState::Failed,
                reason_code: reason_code.to_string(),
            },
        );
    }

    pub fn mark_rolled_back(&self, hook_id: &str) {
        self.put(
            hook_id,
            HookRecord {
                state: HookState::RolledBack,
                reason_code: reason::ROLLBACK_SUCCESS.to_string(),
            },
        );
    }

    /// Returns the default record (NotInstalled) for unknown hooks.
    pub fn get(&self, hook_id: &str) -> HookRecord {
        self.lock().get(hook_id).cloned().unwrap_or_default()
    }

    /// Point-in-time copy for diagnostics export.
    pub fn snapshot(&self) -> BTreeMap<String, HookRecord> {
        self.lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn put(&self, hook_id: &str, record: HookRecord) {
        self.lock().insert(hook_id.to_string(), record);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, HookRecord>> {
        self.hooks.lock().unwrap_or_else(|e| e.into_inner())
    }
}
