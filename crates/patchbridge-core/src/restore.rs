//! Restore-byte cache: the saved original bytes at every patched address.
//!
//! Invariant: an entry exists if and only if a mutating write has occurred
//! at that key and has not been restored yet. Entries are created on the
//! first write at a key and consumed on successful restore. A restore
//! request with no entry must fail closed upstream; this cache never
//! guesses.
//!
//! Access is serialized behind one lock: install/uninstall of different
//! features can be dispatched from the same command thread but must never
//! race a concurrent diagnostics snapshot.

use std::collections::HashMap;
use std::sync::Mutex;

/// Cache key: one patched location in one process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RestoreKey {
    pub process_id: i32,
    pub anchor_key: String,
    pub address: usize,
}

impl RestoreKey {
    pub fn new(process_id: i32, anchor_key: &str, address: usize) -> Self {
        Self {
            process_id,
            anchor_key: anchor_key.to_string(),
            address,
        }
    }

    /// Stable text form for diagnostics and error messages.
    pub fn tag(&self) -> String {
        format!("{}/{}/{:#x}", self.process_id, self.anchor_key, self.address)
    }
}

#[derive(Debug, Default)]
pub struct RestoreCache {
    entries: Mutex<HashMap<RestoreKey, Vec<u8>>>,
}

impl RestoreCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_read_bytes(&self, key: &RestoreKey) -> Option<Vec<u8>> {
        self.lock().get(key).cloned()
    }

    /// Store original bytes for a key. Never overwrites an existing entry:
    /// the first-seen bytes are the true pre-patch content, and a re-apply
    /// with a new value must not clobber them. Returns false when an entry
    /// already existed.
    pub fn store_bytes(&self, key: &RestoreKey, bytes: Vec<u8>) -> bool {
        let mut entries = self.lock();
        if entries.contains_key(key) {
            return false;
        }
        entries.insert(key.clone(), bytes);
        true
    }

    /// Consume the entry for a key after a successful restore.
    pub fn remove_bytes(&self, key: &RestoreKey) -> Option<Vec<u8>> {
        self.lock().remove(key)
    }

    pub fn contains(&self, key: &RestoreKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RestoreKey, Vec<u8>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
