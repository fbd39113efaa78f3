//! Cross-process memory accessor.
//!
//! `MemoryAccessor` implements the patch-safety contract over a low-level
//! [`VmOps`] seam: capture old protection, relax to RWX, write, restore
//! the captured protection on every path (write failure included), then
//! flush the instruction cache over the range only when protection was
//! toggled. The Windows implementation of `VmOps` is the only code in the
//! workspace that calls OS memory primitives.

use patchbridge_common::{trace, Error, Result};
use std::collections::BTreeMap;

/// Raw PAGE_EXECUTE_READWRITE value, used for the temporary relaxation.
pub const PAGE_EXECUTE_READWRITE_RAW: u32 = 0x40;

/// Low-level virtual memory operations against one target process.
///
/// Implementations transfer as many bytes as they can and report the
/// count; short-transfer policy lives in [`MemoryAccessor`]. `protect`
/// returns the previous protection value for the range.
pub trait VmOps: Send {
    fn read(&self, address: usize, buf: &mut [u8]) -> Result<usize>;
    fn write(&self, address: usize, bytes: &[u8]) -> Result<usize>;
    fn protect(&self, address: usize, len: usize, protection: u32) -> Result<u32>;
    fn flush_instruction_cache(&self, address: usize, len: usize) -> Result<()>;
    fn alloc(&self, size: usize, executable: bool) -> Result<usize>;
    fn free(&self, address: usize) -> Result<()>;
}

/// What a write did, for the result diagnostics map.
#[derive(Debug, Clone)]
pub struct WriteDiagnostics {
    pub write_mode: &'static str,
    pub len: usize,
    pub old_protect: Option<u32>,
    pub restore_protect_ok: Option<bool>,
}

impl WriteDiagnostics {
    fn data(len: usize) -> Self {
        Self {
            write_mode: "data",
            len,
            old_protect: None,
            restore_protect_ok: None,
        }
    }

    fn patch(len: usize) -> Self {
        Self {
            write_mode: "patch",
            len,
            old_protect: None,
            restore_protect_ok: Some(false),
        }
    }

    /// Flatten into a string map for the result envelope.
    pub fn export(&self, out: &mut BTreeMap<String, String>) {
        out.insert("writeMode".to_string(), self.write_mode.to_string());
        out.insert("len".to_string(), self.len.to_string());
        out.insert(
            "oldProtect".to_string(),
            self.old_protect
                .map(|p| format!("{:#x}", p))
                .unwrap_or_else(|| "n/a".to_string()),
        );
        out.insert(
            "restoreProtectOk".to_string(),
            self.restore_protect_ok
                .map(|ok| ok.to_string())
                .unwrap_or_else(|| "n/a".to_string()),
        );
    }
}

/// Typed and bulk memory access for one attached process.
pub struct MemoryAccessor {
    ops: Box<dyn VmOps>,
}

impl MemoryAccessor {
    pub fn new(ops: Box<dyn VmOps>) -> Self {
        Self { ops }
    }

    /// Open the target process with the minimum rights needed for
    /// query/read/write/protect. Fails fast with the OS error embedded.
    #[cfg(windows)]
    pub fn open(process_id: i32) -> Result<Self> {
        Ok(Self::new(Box::new(win::WinVmOps::open(process_id)?)))
    }

    /// Bulk read; errors when fewer than `len` bytes transfer.
    pub fn read_bytes(&self, address: usize, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let read = self.ops.read(address, &mut buf)?;
        if read != len {
            return Err(Error::ShortTransfer {
                address,
                expected: len,
                actual: read,
            });
        }
        Ok(buf)
    }

    /// Bulk write. With `executable_patch` the protection discipline is:
    /// capture old protection, relax to RWX, write, restore old protection
    /// (always, even when the write fails), flush the instruction cache
    /// only when protection was actually toggled.
    pub fn write_bytes(
        &self,
        address: usize,
        bytes: &[u8],
        executable_patch: bool,
    ) -> Result<WriteDiagnostics> {
        if !executable_patch {
            let mut diagnostics = WriteDiagnostics::data(bytes.len());
            let written = self.ops.write(address, bytes)?;
            if written != bytes.len() {
                return Err(Error::ShortTransfer {
                    address,
                    expected: bytes.len(),
                    actual: written,
                });
            }
            diagnostics.len = written;
            return Ok(diagnostics);
        }

        let mut diagnostics = WriteDiagnostics::patch(bytes.len());
        let old_protect = self
            .ops
            .protect(address, bytes.len(), PAGE_EXECUTE_READWRITE_RAW)?;
        diagnostics.old_protect = Some(old_protect);

        // From here on the region is RWX; the captured protection must be
        // restored on every path before this function returns.
        let write_result = self.ops.write(address, bytes);
        let restore_result = self.ops.protect(address, bytes.len(), old_protect);
        diagnostics.restore_protect_ok = Some(restore_result.is_ok());

        let written = write_result?;
        if written != bytes.len() {
            return Err(Error::ShortTransfer {
                address,
                expected: bytes.len(),
                actual: written,
            });
        }
        restore_result?;

        // Protection was toggled, so already-fetched instructions over the
        // range may be stale.
        self.ops.flush_instruction_cache(address, bytes.len())?;
        trace!(
            target: "patchbridge::core::accessor",
            address = format_args!("{:#x}", address),
            len = bytes.len(),
            old_protect = format_args!("{:#x}", old_protect),
            "patch write complete"
        );
        Ok(diagnostics)
    }

    /// Fixed-size typed read, little-endian.
    pub fn read_i32(&self, address: usize) -> Result<i32> {
        let bytes = self.read_bytes(address, 4)?;
        let mut arr = [0u8; 4];
        arr.copy_from_slice(&bytes);
        Ok(i32::from_le_bytes(arr))
    }

    /// Fixed-size typed write, little-endian.
    pub fn write_i32(&self, address: usize, value: i32) -> Result<WriteDiagnostics> {
        self.write_bytes(address, &value.to_le_bytes(), false)
    }

    pub fn read_u8(&self, address: usize) -> Result<u8> {
        Ok(self.read_bytes(address, 1)?[0])
    }

    pub fn write_u8(&self, address: usize, value: u8) -> Result<WriteDiagnostics> {
        self.write_bytes(address, &[value], false)
    }

    /// Scratch memory in the target process.
    pub fn allocate(&self, size: usize, executable: bool) -> Result<usize> {
        self.ops.alloc(size, executable)
    }

    /// Free scratch memory; a null/zero address is a no-op success.
    pub fn free(&self, address: usize) -> Result<()> {
        if address == 0 {
            return Ok(());
        }
        self.ops.free(address)
    }
}

#[cfg(windows)]
mod win {
    use super::VmOps;
    use patchbridge_common::{Error, Result};
    use std::ffi::c_void;
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::System::Diagnostics::Debug::{
        FlushInstructionCache, ReadProcessMemory, WriteProcessMemory,
    };
    use windows::Win32::System::Memory::{
        VirtualAllocEx, VirtualFreeEx, VirtualProtectEx, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE,
        PAGE_EXECUTE_READWRITE, PAGE_PROTECTION_FLAGS, PAGE_READWRITE,
    };
    use windows::Win32::System::Threading::{
        OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_OPERATION, PROCESS_VM_READ,
        PROCESS_VM_WRITE,
    };

    /// Owns the target process handle for the lifetime of a session.
    /// The raw handle never leaves this type.
    pub struct WinVmOps {
        handle: HANDLE,
        closed: std::sync::atomic::AtomicBool,
    }

    // HANDLE is a plain kernel object value; ownership is tracked here.
    unsafe impl Send for WinVmOps {}

    impl WinVmOps {
        pub fn open(process_id: i32) -> Result<Self> {
            if process_id <= 0 {
                return Err(Error::ProcessOpen {
                    pid: process_id,
                    message: "invalid process id".to_string(),
                });
            }

            let handle = unsafe {
                OpenProcess(
                    PROCESS_QUERY_INFORMATION
                        | PROCESS_VM_READ
                        | PROCESS_VM_WRITE
                        | PROCESS_VM_OPERATION,
                    false,
                    process_id as u32,
                )
            }
            .map_err(|e| Error::ProcessOpen {
                pid: process_id,
                message: format!("OpenProcess failed: {}", e),
            })?;

            Ok(Self {
                handle,
                closed: std::sync::atomic::AtomicBool::new(false),
            })
        }

        /// Release the process handle exactly once.
        fn close(&self) {
            use std::sync::atomic::Ordering;
            if !self.closed.swap(true, Ordering::SeqCst) {
                unsafe {
                    let _ = CloseHandle(self.handle);
                }
            }
        }
    }

    impl Drop for WinVmOps {
        fn drop(&mut self) {
            self.close();
        }
    }

    impl VmOps for WinVmOps {
        fn read(&self, address: usize, buf: &mut [u8]) -> Result<usize> {
            let mut read = 0usize;
            unsafe {
                ReadProcessMemory(
                    self.handle,
                    address as *const c_void,
                    buf.as_mut_ptr() as *mut c_void,
                    buf.len(),
                    Some(&mut read),
                )
            }
            .map_err(|e| Error::MemoryAccess {
                address,
                message: format!("ReadProcessMemory failed: {}", e),
            })?;
            Ok(read)
        }

        fn write(&self, address: usize, bytes: &[u8]) -> Result<usize> {
            let mut written = 0usize;
            unsafe {
                WriteProcessMemory(
                    self.handle,
                    address as *const c_void,
                    bytes.as_ptr() as *const c_void,
                    bytes.len(),
                    Some(&mut written),
                )
            }
            .map_err(|e| Error::MemoryAccess {
                address,
                message: format!("WriteProcessMemory failed: {}", e),
            })?;
            Ok(written)
        }

        fn protect(&self, address: usize, len: usize, protection: u32) -> Result<u32> {
            let mut old = PAGE_PROTECTION_FLAGS(0);
            unsafe {
                VirtualProtectEx(
                    self.handle,
                    address as *const c_void,
                    len,
                    PAGE_PROTECTION_FLAGS(protection),
                    &mut old,
                )
            }
            .map_err(|e| Error::Protection {
                address,
                message: format!("VirtualProtectEx failed: {}", e),
            })?;
            Ok(old.0)
        }

        fn flush_instruction_cache(&self, address: usize, len: usize) -> Result<()> {
            unsafe { FlushInstructionCache(self.handle, Some(address as *const c_void), len) }
                .map_err(|e| Error::MemoryAccess {
                    address,
                    message: format!("FlushInstructionCache failed: {}", e),
                })
        }

        fn alloc(&self, size: usize, executable: bool) -> Result<usize> {
            let protection = if executable {
                PAGE_EXECUTE_READWRITE
            } else {
                PAGE_READWRITE
            };
            let address = unsafe {
                VirtualAllocEx(self.handle, None, size, MEM_COMMIT | MEM_RESERVE, protection)
            };
            if address.is_null() {
                return Err(Error::MemoryAccess {
                    address: 0,
                    message: format!("VirtualAllocEx failed for {} bytes", size),
                });
            }
            Ok(address as usize)
        }

        fn free(&self, address: usize) -> Result<()> {
            unsafe { VirtualFreeEx(self.handle, address as *mut c_void, 0, MEM_RELEASE) }.map_err(
                |e| Error::MemoryAccess {
                    address,
                    message: format!("VirtualFreeEx failed: {}", e),
                },
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    const INITIAL_PROTECT: u32 = 0x20; // PAGE_EXECUTE_READ

    /// In-memory VmOps that tracks protection state and can fail writes
    /// partway through.
    struct FakeVm {
        memory: Mutex<HashMap<usize, u8>>,
        protection: Mutex<u32>,
        fail_writes: AtomicBool,
        write_calls: AtomicUsize,
        protect_calls: AtomicUsize,
        flush_calls: AtomicUsize,
    }

    impl FakeVm {
        fn new() -> Self {
            Self {
                memory: Mutex::new(HashMap::new()),
                protection: Mutex::new(INITIAL_PROTECT),
                fail_writes: AtomicBool::new(false),
                write_calls: AtomicUsize::new(0),
                protect_calls: AtomicUsize::new(0),
                flush_calls: AtomicUsize::new(0),
            }
        }

        fn seed(&self, address: usize, bytes: &[u8]) {
            let mut memory = self.memory.lock().unwrap();
            for (i, b) in bytes.iter().enumerate() {
                memory.insert(address + i, *b);
            }
        }

        fn protection(&self) -> u32 {
            *self.protection.lock().unwrap()
        }
    }

    impl VmOps for &FakeVm {
        fn read(&self, address: usize, buf: &mut [u8]) -> Result<usize> {
            let memory = self.memory.lock().unwrap();
            for (i, slot) in buf.iter_mut().enumerate() {
                *slot = memory.get(&(address + i)).copied().unwrap_or(0);
            }
            Ok(buf.len())
        }

        fn write(&self, address: usize, bytes: &[u8]) -> Result<usize> {
            self.write_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(Error::MemoryAccess {
                    address,
                    message: "WriteProcessMemory failed (998)".to_string(),
                });
            }
            let mut memory = self.memory.lock().unwrap();
            for (i, b) in bytes.iter().enumerate() {
                memory.insert(address + i, *b);
            }
            Ok(bytes.len())
        }

        fn protect(&self, _address: usize, _len: usize, protection: u32) -> Result<u32> {
            self.protect_calls.fetch_add(1, Ordering::SeqCst);
            let mut current = self.protection.lock().unwrap();
            let old = *current;
            *current = protection;
            Ok(old)
        }

        fn flush_instruction_cache(&self, _address: usize, _len: usize) -> Result<()> {
            self.flush_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn alloc(&self, _size: usize, _executable: bool) -> Result<usize> {
            Ok(0x5000)
        }

        fn free(&self, _address: usize) -> Result<()> {
            Ok(())
        }
    }

    fn accessor(vm: &'static FakeVm) -> MemoryAccessor {
        MemoryAccessor::new(Box::new(vm))
    }

    fn leak(vm: FakeVm) -> &'static FakeVm {
        Box::leak(Box::new(vm))
    }

    #[test]
    fn test_read_bytes_round_trip() {
        let vm = leak(FakeVm::new());
        vm.seed(0x1000, &[1, 2, 3, 4]);
        let accessor = accessor(vm);
        assert_eq!(accessor.read_bytes(0x1000, 4).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_typed_i32_little_endian() {
        let vm = leak(FakeVm::new());
        let accessor = accessor(vm);
        accessor.write_i32(0x2000, 250).unwrap();
        assert_eq!(accessor.read_bytes(0x2000, 4).unwrap(), vec![250, 0, 0, 0]);
        assert_eq!(accessor.read_i32(0x2000).unwrap(), 250);
    }

    #[test]
    fn test_typed_u8_round_trip() {
        let vm = leak(FakeVm::new());
        let accessor = accessor(vm);
        accessor.write_u8(0x2100, 0x74).unwrap();
        assert_eq!(accessor.read_u8(0x2100).unwrap(), 0x74);
    }

    #[test]
    fn test_data_write_does_not_touch_protection() {
        let vm = leak(FakeVm::new());
        let accessor = accessor(vm);
        let diagnostics = accessor.write_bytes(0x3000, &[0xAA], false).unwrap();
        assert_eq!(diagnostics.write_mode, "data");
        assert!(diagnostics.old_protect.is_none());
        assert_eq!(vm.protect_calls.load(Ordering::SeqCst), 0);
        assert_eq!(vm.flush_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_executable_patch_restores_protection_and_flushes() {
        let vm = leak(FakeVm::new());
        let accessor = accessor(vm);
        let before = vm.protection();
        let diagnostics = accessor.write_bytes(0x4000, &[0x90, 0x90], true).unwrap();
        assert_eq!(vm.protection(), before);
        assert_eq!(diagnostics.write_mode, "patch");
        assert_eq!(diagnostics.old_protect, Some(INITIAL_PROTECT));
        assert_eq!(diagnostics.restore_protect_ok, Some(true));
        assert_eq!(vm.protect_calls.load(Ordering::SeqCst), 2);
        assert_eq!(vm.flush_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_protection_restored_even_when_write_fails() {
        let vm = leak(FakeVm::new());
        let accessor = accessor(vm);
        let before = vm.protection();
        vm.fail_writes.store(true, Ordering::SeqCst);

        let err = accessor.write_bytes(0x4000, &[0xCC], true).unwrap_err();
        assert!(matches!(err, Error::MemoryAccess { .. }));
        // The relax must have been undone on the failure path.
        assert_eq!(vm.protection(), before);
        assert_eq!(vm.protect_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_diagnostics_export_keys() {
        let vm = leak(FakeVm::new());
        let accessor = accessor(vm);
        let diagnostics = accessor.write_bytes(0x4000, &[0x01], true).unwrap();
        let mut out = BTreeMap::new();
        diagnostics.export(&mut out);
        assert_eq!(out.get("writeMode").unwrap(), "patch");
        assert_eq!(out.get("len").unwrap(), "1");
        assert_eq!(out.get("oldProtect").unwrap(), "0x20");
        assert_eq!(out.get("restoreProtectOk").unwrap(), "true");
    }

    #[test]
    fn test_free_null_address_is_noop_success() {
        let vm = leak(FakeVm::new());
        let accessor = accessor(vm);
        assert!(accessor.free(0).is_ok());
    }

    #[test]
    fn test_allocate_returns_address() {
        let vm = leak(FakeVm::new());
        let accessor = accessor(vm);
        assert_eq!(accessor.allocate(64, true).unwrap(), 0x5000);
    }
}
