//! The operating-system services the engine relies on.
//!
//! Everything the engine needs from the kernel and the dynamic loader goes
//! through [`Platform`], so the capture logic stays portable and can be
//! driven by a fake in tests.

use crate::error::Result;
use crate::symbol::SymbolInfo;
use crate::thread::ThreadHandle;
use crate::walk::StackBuffer;

pub trait Platform: Send + Sync + 'static {
    /// Handle of the thread making the call.
    fn current_thread(&self) -> ThreadHandle;

    /// All threads of the process, in the adapter's enumeration order.
    fn threads(&self) -> Result<Vec<ThreadHandle>>;

    /// OS-visible name of `thread`, if it has one.
    fn thread_name(&self, thread: ThreadHandle) -> Option<String>;

    /// Longest thread name the OS keeps, in bytes.
    fn thread_name_limit(&self) -> usize;

    /// Capture the return addresses of `thread` into `frames`, innermost
    /// first. Frames pushed before an error are kept.
    fn walk_stack(&self, thread: ThreadHandle, frames: &mut StackBuffer) -> Result<()>;

    fn lookup_symbol(&self, address: usize) -> SymbolInfo;

    fn demangle(&self, name: &str) -> String {
        crate::demangle::demangle(name)
    }

    /// Pre-formatted call stack of the calling thread.
    fn native_call_stack(&self) -> Vec<String>;

    /// Per-address names as the system formats them, `None` where the
    /// system has nothing.
    fn raw_symbol_names(&self, addresses: &[usize]) -> Vec<Option<String>>;
}

#[cfg(target_os = "macos")]
pub type NativePlatform = crate::macos::MachPlatform;

#[cfg(all(target_os = "linux", target_env = "gnu"))]
pub type NativePlatform = crate::linux::ProcfsPlatform;
