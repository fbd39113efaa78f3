//! Patchbridge Core
//!
//! The capability-gated mutation engine: registries tracking which
//! mutation features are proven safe and which hooks are live, the
//! restore-byte cache that makes every patch reversible, and the
//! cross-process memory accessor that performs the actual OS-level
//! reads and writes.

pub mod accessor;
pub mod address;
pub mod capability;
pub mod hooks;
pub mod restore;

pub use accessor::{MemoryAccessor, VmOps, WriteDiagnostics, PAGE_EXECUTE_READWRITE_RAW};
pub use address::parse_address;
pub use capability::CapabilityRegistry;
pub use hooks::HookLifecycleRegistry;
pub use patchbridge_common::{Error, Result};
pub use restore::{RestoreCache, RestoreKey};
