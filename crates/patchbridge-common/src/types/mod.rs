//! Shared data model for the patch bridge.

mod bridge;
mod capability;
mod hook;

pub use bridge::{BridgeCommand, BridgeResult, BACKEND_ID};
pub use capability::{CapabilityEntry, CapabilityState};
pub use hook::{HookRecord, HookState};
