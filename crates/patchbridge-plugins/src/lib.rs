//! Mutation plugins: feature-specific logic that validates a request,
//! decides install/update/uninstall, and drives the accessor plus the
//! restore-byte cache to do it safely.
//!
//! The dispatcher gates on the capability registry before any plugin
//! runs; plugins own payload validation, anchor resolution, and the
//! restore-entry bookkeeping that makes every write reversible.

pub mod build_patch;
pub mod economy;
pub mod toggle;

pub use build_patch::BuildPatchPlugin;
pub use economy::EconomyPlugin;
pub use toggle::GlobalTogglePlugin;

use patchbridge_core::{HookLifecycleRegistry, MemoryAccessor, RestoreCache};
use std::collections::BTreeMap;

/// Shared engine state handed to a plugin for one command.
pub struct PluginContext<'a> {
    pub accessor: &'a MemoryAccessor,
    pub restore: &'a RestoreCache,
    pub hooks: &'a HookLifecycleRegistry,
}

/// Decoded, feature-agnostic view of one mutation request.
#[derive(Debug, Clone, Default)]
pub struct PluginRequest {
    pub feature_id: String,
    pub profile_id: String,
    pub process_id: i32,
    pub int_value: Option<i32>,
    pub enable: Option<bool>,
    /// Keep the written value pinned instead of applying it once.
    pub lock: Option<bool>,
    /// Anchor name -> hex address string.
    pub anchors: BTreeMap<String, String>,
}

/// Plugin outcome, mapped 1:1 into the bridge result envelope.
#[derive(Debug, Clone)]
pub struct PluginResult {
    pub succeeded: bool,
    pub reason_code: String,
    pub hook_state: String,
    pub message: String,
    pub diagnostics: BTreeMap<String, String>,
}

impl PluginResult {
    pub fn ok(reason_code: &str, hook_state: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            reason_code: reason_code.to_string(),
            hook_state: hook_state.into(),
            message: message.into(),
            diagnostics: BTreeMap::new(),
        }
    }

    pub fn rejected(reason_code: &str, message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            reason_code: reason_code.to_string(),
            hook_state: "DENIED".to_string(),
            message: message.into(),
            diagnostics: BTreeMap::new(),
        }
    }

    pub fn with_hook_state(mut self, hook_state: impl Into<String>) -> Self {
        self.hook_state = hook_state.into();
        self
    }

    pub fn with_diagnostic(mut self, key: &str, value: impl Into<String>) -> Self {
        self.diagnostics.insert(key.to_string(), value.into());
        self
    }
}

/// One mutation plugin family.
pub trait MutationPlugin: Send + Sync {
    fn id(&self) -> &'static str;

    /// Feature ids this plugin services.
    fn features(&self) -> &'static [&'static str];

    fn handles(&self, feature_id: &str) -> bool {
        self.features().contains(&feature_id)
    }

    /// Payload and anchor checks that need no engine access. A `Some`
    /// rejection lets the dispatcher refuse the command before it ever
    /// opens the target process.
    fn validate(&self, request: &PluginRequest) -> Option<PluginResult> {
        let _ = request;
        None
    }

    fn execute(&self, ctx: &PluginContext<'_>, request: &PluginRequest) -> PluginResult;
}

/// First non-empty anchor among the accepted spellings for a feature.
pub(crate) fn find_anchor(
    anchors: &BTreeMap<String, String>,
    candidates: &[&str],
) -> Option<(String, String)> {
    for key in candidates {
        if let Some(value) = anchors.get(*key) {
            if !value.is_empty() {
                return Some((key.to_string(), value.clone()));
            }
        }
    }
    None
}

#[cfg(test)]
pub(crate) mod test_support {
    use patchbridge_common::{Error, Result};
    use patchbridge_core::{MemoryAccessor, VmOps};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Inner {
        memory: Mutex<HashMap<usize, u8>>,
        fail_writes: AtomicBool,
        read_calls: AtomicUsize,
        write_calls: AtomicUsize,
    }

    /// Recording in-memory process for plugin tests. Clones share state,
    /// so assertions survive handing a clone to the accessor.
    #[derive(Clone, Default)]
    pub struct FakeVm {
        inner: Arc<Inner>,
    }

    impl FakeVm {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn seed(&self, address: usize, bytes: &[u8]) {
            let mut memory = self.inner.memory.lock().unwrap();
            for (i, b) in bytes.iter().enumerate() {
                memory.insert(address + i, *b);
            }
        }

        pub fn bytes_at(&self, address: usize, len: usize) -> Vec<u8> {
            let memory = self.inner.memory.lock().unwrap();
            (0..len)
                .map(|i| memory.get(&(address + i)).copied().unwrap_or(0))
                .collect()
        }

        pub fn fail_writes(&self, fail: bool) {
            self.inner.fail_writes.store(fail, Ordering::SeqCst);
        }

        pub fn write_calls(&self) -> usize {
            self.inner.write_calls.load(Ordering::SeqCst)
        }

        pub fn read_calls(&self) -> usize {
            self.inner.read_calls.load(Ordering::SeqCst)
        }

        pub fn accessor(&self) -> MemoryAccessor {
            MemoryAccessor::new(Box::new(self.clone()))
        }
    }

    impl VmOps for FakeVm {
        fn read(&self, address: usize, buf: &mut [u8]) -> Result<usize> {
            self.inner.read_calls.fetch_add(1, Ordering::SeqCst);
            let memory = self.inner.memory.lock().unwrap();
            for (i, slot) in buf.iter_mut().enumerate() {
                *slot = memory.get(&(address + i)).copied().unwrap_or(0);
            }
            Ok(buf.len())
        }

        fn write(&self, address: usize, bytes: &[u8]) -> Result<usize> {
            self.inner.write_calls.fetch_add(1, Ordering::SeqCst);
            if self.inner.fail_writes.load(Ordering::SeqCst) {
                return Err(Error::MemoryAccess {
                    address,
                    message: "WriteProcessMemory failed (998)".to_string(),
                });
            }
            let mut memory = self.inner.memory.lock().unwrap();
            for (i, b) in bytes.iter().enumerate() {
                memory.insert(address + i, *b);
            }
            Ok(bytes.len())
        }

        fn protect(&self, _address: usize, _len: usize, _protection: u32) -> Result<u32> {
            Ok(0x20)
        }

        fn flush_instruction_cache(&self, _address: usize, _len: usize) -> Result<()> {
            Ok(())
        }

        fn alloc(&self, _size: usize, _executable: bool) -> Result<usize> {
            Ok(0x5000)
        }

        fn free(&self, _address: usize) -> Result<()> {
            Ok(())
        }
    }
}
