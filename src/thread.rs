//! Mapping application-level threads to kernel thread handles.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use log::{debug, warn};
use serde::Serialize;

use crate::platform::Platform;

/// Kernel-level identity of a thread: a Mach thread port name on macOS, a
/// TID on Linux. Zero never names a live thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ThreadHandle(u64);

impl ThreadHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread {:#x}", self.0)
    }
}

/// A thread as the application knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogicalThread {
    Current,
    Main,
    Named(String),
}

impl LogicalThread {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }
}

impl From<&thread::Thread> for LogicalThread {
    fn from(t: &thread::Thread) -> Self {
        if t.id() == thread::current().id() {
            return Self::Current;
        }
        match t.name() {
            Some("main") => Self::Main,
            Some(name) => Self::Named(name.to_owned()),
            None => Self::Named(String::new()),
        }
    }
}

/// Process-lifetime slot for the main thread's handle.
///
/// Written from the main thread after setup, read by any capturing thread.
/// Readers see `None` until the write lands and never wait for it.
#[derive(Debug, Default)]
pub struct MainThreadCache(AtomicU64);

impl MainThreadCache {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn store(&self, handle: ThreadHandle) {
        self.0.store(handle.raw(), Ordering::Release);
    }

    pub fn load(&self) -> Option<ThreadHandle> {
        match self.0.load(Ordering::Acquire) {
            0 => None,
            raw => Some(ThreadHandle(raw)),
        }
    }
}

/// Strategy turning a [`LogicalThread`] into a kernel handle.
///
/// Implementations never fail: when the thread cannot be identified they
/// answer with the calling thread's handle.
pub trait ThreadResolver: Send + Sync {
    fn resolve(
        &self,
        platform: &dyn Platform,
        main: &MainThreadCache,
        logical: &LogicalThread,
    ) -> ThreadHandle;
}

/// Identifies threads by comparing OS-visible thread names.
///
/// This is a heuristic. Threads sharing a name resolve to the first one in
/// enumeration order, and an unnamed thread other than the main one cannot
/// be found at all (the calling thread is returned instead). The OS may
/// truncate names (15 bytes on Linux), so the requested name is truncated
/// the same way before comparing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NameMatch;

impl ThreadResolver for NameMatch {
    fn resolve(
        &self,
        platform: &dyn Platform,
        main: &MainThreadCache,
        logical: &LogicalThread,
    ) -> ThreadHandle {
        let name = match logical {
            LogicalThread::Current => return platform.current_thread(),
            LogicalThread::Main => {
                return main.load().unwrap_or_else(|| {
                    debug!("main thread handle not captured yet, using calling thread");
                    platform.current_thread()
                });
            }
            LogicalThread::Named(name) => name,
        };

        let threads = match platform.threads() {
            Ok(threads) => threads,
            Err(e) => {
                warn!("{e}, using calling thread");
                return platform.current_thread();
            }
        };

        let wanted = truncate(name, platform.thread_name_limit());
        if !wanted.is_empty() {
            for handle in threads {
                if platform.thread_name(handle).as_deref() == Some(wanted) {
                    return handle;
                }
            }
        }

        debug!("no thread named {name:?}, using calling thread");
        platform.current_thread()
    }
}

fn truncate(name: &str, limit: usize) -> &str {
    if name.len() <= limit {
        return name;
    }
    let mut end = limit;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}
