//! Capability entries: per-feature "proven safe to mutate" facts.

use crate::reason;
use serde::{Deserialize, Serialize};

/// Verification state of a probed feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CapabilityState {
    /// Never probed against the attached process.
    #[default]
    Unknown,
    /// Probed but not proven stable.
    Experimental,
    /// Probe passed; safe to use.
    Verified,
}

impl std::fmt::Display for CapabilityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapabilityState::Unknown => write!(f, "Unknown"),
            CapabilityState::Experimental => write!(f, "Experimental"),
            CapabilityState::Verified => write!(f, "Verified"),
        }
    }
}

/// One capability registry entry. Absence of an entry means "not yet
/// probed" and is treated as unavailable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityEntry {
    pub available: bool,
    pub state: CapabilityState,
    pub reason_code: String,
}

impl Default for CapabilityEntry {
    fn default() -> Self {
        Self {
            available: false,
            state: CapabilityState::Unknown,
            reason_code: reason::CAPABILITY_UNKNOWN.to_string(),
        }
    }
}
