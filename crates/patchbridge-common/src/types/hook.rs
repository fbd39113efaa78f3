//! Hook lifecycle records: install/fail/rollback state per mutation.

use crate::reason;
use serde::{Deserialize, Serialize};

/// Lifecycle state of one memory mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum HookState {
    #[default]
    NotInstalled,
    Installed,
    Failed,
    RolledBack,
}

impl std::fmt::Display for HookState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookState::NotInstalled => write!(f, "NotInstalled"),
            HookState::Installed => write!(f, "Installed"),
            HookState::Failed => write!(f, "Failed"),
            HookState::RolledBack => write!(f, "RolledBack"),
        }
    }
}

/// One hook registry record. Transitions are one-shot overwrites driven
/// by the owning plugin; no history is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookRecord {
    pub state: HookState,
    pub reason_code: String,
}

impl Default for HookRecord {
    fn default() -> Self {
        Self {
            state: HookState::NotInstalled,
            reason_code: reason::HOOK_NOT_INSTALLED.to_string(),
        }
    }
}
