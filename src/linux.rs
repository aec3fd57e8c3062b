//! Linux adapter: threads come from `/proc/self/task`, stacks are captured
//! by signalling the target thread and walking from inside its handler.
//!
//! Only one capture is in flight at a time. The collector arms a static
//! slot for one TID, sends it a real-time signal with `tgkill`, and spins
//! until the handler publishes the frames. The handler runs on the target's
//! own stack while that thread is interrupted, so the stack it walks does
//! not move underneath it; reads go through `process_vm_readv` so a broken
//! frame chain ends the walk with `EFAULT` instead of a fault.

use std::{
    cell::UnsafeCell,
    ffi::{c_int, c_void},
    fs, hint, io, mem, ptr,
    sync::{
        atomic::{AtomicI32, AtomicU8, Ordering},
        Mutex, OnceLock, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use log::debug;

use crate::{
    error::{Error, Result},
    platform::Platform,
    symbol::SymbolInfo,
    thread::ThreadHandle,
    unix,
    walk::{self, Registers, StackBuffer, StackMemory},
};

const TASK_DIR: &str = "/proc/self/task";

/// `TASK_COMM_LEN` minus the terminating NUL.
const NAME_LIMIT: usize = 15;

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct ProcfsPlatform {
    timeout: Duration,
}

impl ProcfsPlatform {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// How long to wait for a target thread to run its capture handler.
    /// Threads blocking the signal, or stopped, never answer.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ProcfsPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for ProcfsPlatform {
    fn current_thread(&self) -> ThreadHandle {
        ThreadHandle::new(gettid() as u64)
    }

    fn threads(&self) -> Result<Vec<ThreadHandle>> {
        let entries = fs::read_dir(TASK_DIR).map_err(|e| Error::Enumerate(e.to_string()))?;
        let mut tids = vec![];
        for entry in entries {
            let entry = entry.map_err(|e| Error::Enumerate(e.to_string()))?;
            if let Some(tid) = entry.file_name().to_str().and_then(|s| s.parse::<u64>().ok()) {
                tids.push(ThreadHandle::new(tid));
            }
        }
        if tids.is_empty() {
            return Err(Error::Enumerate(format!("{TASK_DIR} is empty")));
        }
        tids.sort_unstable();
        Ok(tids)
    }

    fn thread_name(&self, thread: ThreadHandle) -> Option<String> {
        let comm = fs::read_to_string(format!("{TASK_DIR}/{}/comm", thread.raw())).ok()?;
        Some(comm.trim_end_matches('\n').to_owned())
    }

    fn thread_name_limit(&self) -> usize {
        NAME_LIMIT
    }

    fn walk_stack(&self, thread: ThreadHandle, frames: &mut StackBuffer) -> Result<()> {
        install_handler()?;
        let tid = thread.raw() as libc::pid_t;

        let _guard = CAPTURE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        // Idle slot: no handler touches the buffer until it is armed.
        unsafe { *SLOT.frames.get() = StackBuffer::with_limit(frames.limit()) };
        SLOT.target.store(tid, Ordering::Relaxed);
        SLOT.state.store(ARMED, Ordering::Release);

        let r = unsafe {
            libc::syscall(
                libc::SYS_tgkill,
                libc::getpid(),
                tid,
                capture_signal(),
            )
        };
        if r != 0 {
            let errno = io::Error::last_os_error().raw_os_error().unwrap_or(0);
            SLOT.state.store(IDLE, Ordering::Release);
            return Err(Error::Signal { thread, errno });
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            match SLOT.state.load(Ordering::Acquire) {
                DONE => break,
                ARMED if Instant::now() >= deadline => {
                    if SLOT
                        .state
                        .compare_exchange(ARMED, IDLE, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return Err(Error::Timeout { thread });
                    }
                    // The handler picked it up just now and will finish.
                }
                _ => thread::yield_now(),
            }
        }

        frames.extend_from(unsafe { (*SLOT.frames.get()).as_slice() });
        SLOT.state.store(IDLE, Ordering::Release);
        debug!("captured {} frames from {thread}", frames.len());
        Ok(())
    }

    fn lookup_symbol(&self, address: usize) -> SymbolInfo {
        unix::lookup_symbol(address)
    }

    fn native_call_stack(&self) -> Vec<String> {
        unix::native_call_stack()
    }

    fn raw_symbol_names(&self, addresses: &[usize]) -> Vec<Option<String>> {
        unix::symbol_names(addresses)
    }
}

const IDLE: u8 = 0;
const ARMED: u8 = 1;
const BUSY: u8 = 2;
const DONE: u8 = 3;

struct CaptureSlot {
    state: AtomicU8,
    target: AtomicI32,
    // Written only by the handler that moved `state` from ARMED to BUSY,
    // read only by the collector after it observed DONE.
    frames: UnsafeCell<StackBuffer>,
}

unsafe impl Sync for CaptureSlot {}

static SLOT: CaptureSlot = CaptureSlot {
    state: AtomicU8::new(IDLE),
    target: AtomicI32::new(0),
    frames: UnsafeCell::new(StackBuffer::new()),
};

static CAPTURE_LOCK: Mutex<()> = Mutex::new(());

static INSTALLED: OnceLock<std::result::Result<(), i32>> = OnceLock::new();

fn capture_signal() -> c_int {
    libc::SIGRTMIN() + 4
}

fn install_handler() -> Result<()> {
    let installed = *INSTALLED.get_or_init(|| unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = on_capture_signal as libc::sighandler_t;
        action.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(capture_signal(), &action, ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error().raw_os_error().unwrap_or(0));
        }
        Ok(())
    });
    installed.map_err(|errno| Error::Io(io::Error::from_raw_os_error(errno)))
}

extern "C" fn on_capture_signal(_: c_int, _: *mut libc::siginfo_t, context: *mut c_void) {
    let saved_errno = unsafe { *libc::__errno_location() };

    let tid = gettid();
    // A late signal from an earlier, timed out request finds another target
    // and leaves the slot alone.
    if SLOT.target.load(Ordering::Relaxed) == tid {
        unsafe { fill_slot(tid, context) };
    }

    unsafe { *libc::__errno_location() = saved_errno };
}

unsafe fn fill_slot(tid: libc::pid_t, context: *mut c_void) {
    loop {
        match SLOT
            .state
            .compare_exchange(ARMED, BUSY, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => break,
            // Another handler read a stale target and is about to hand the
            // slot back.
            Err(BUSY) => hint::spin_loop(),
            Err(_) => return,
        }
    }

    if SLOT.target.load(Ordering::Relaxed) != tid {
        SLOT.state.store(ARMED, Ordering::Release);
        return;
    }
    let frames = &mut *SLOT.frames.get();
    frames.clear();
    if let Some(regs) = registers(context) {
        walk::walk_frame_pointers(&regs, &ProcessMemory, frames);
    }
    SLOT.state.store(DONE, Ordering::Release);
}

#[cfg(target_arch = "x86_64")]
unsafe fn registers(context: *mut c_void) -> Option<Registers> {
    let uc = (context as *const libc::ucontext_t).as_ref()?;
    let gregs = &uc.uc_mcontext.gregs;
    Some(Registers {
        pc: gregs[libc::REG_RIP as usize] as usize,
        fp: gregs[libc::REG_RBP as usize] as usize,
        lr: None,
    })
}

#[cfg(target_arch = "aarch64")]
unsafe fn registers(context: *mut c_void) -> Option<Registers> {
    let uc = (context as *const libc::ucontext_t).as_ref()?;
    let mc = &uc.uc_mcontext;
    Some(Registers {
        pc: mc.pc as usize,
        fp: mc.regs[29] as usize,
        lr: Some(mc.regs[30] as usize),
    })
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
unsafe fn registers(_: *mut c_void) -> Option<Registers> {
    None
}

/// Reads from this process's own address space.
struct ProcessMemory;

impl StackMemory for ProcessMemory {
    fn read_word(&self, addr: usize) -> Option<usize> {
        let mut word = 0usize;
        let local = libc::iovec {
            iov_base: &mut word as *mut usize as *mut c_void,
            iov_len: mem::size_of::<usize>(),
        };
        let remote = libc::iovec {
            iov_base: addr as *mut c_void,
            iov_len: mem::size_of::<usize>(),
        };
        let n = unsafe { libc::process_vm_readv(libc::getpid(), &local, 1, &remote, 1, 0) };
        (n == mem::size_of::<usize>() as isize).then_some(word)
    }
}

fn gettid() -> libc::pid_t {
    unsafe { libc::syscall(libc::SYS_gettid) as libc::pid_t }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    };

    #[test]
    fn test_threads_include_caller() {
        let platform = ProcfsPlatform::new();
        let threads = platform.threads().unwrap();
        assert!(threads.contains(&platform.current_thread()));
        assert!(threads.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_thread_name_from_comm() {
        let platform = ProcfsPlatform::new();
        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let stop2 = stop.clone();
        let worker = thread::Builder::new()
            .name("comm-reader-check".into())
            .spawn(move || {
                tx.send(gettid()).unwrap();
                while !stop2.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(1));
                }
            })
            .unwrap();
        let tid = rx.recv().unwrap();
        let name = platform.thread_name(ThreadHandle::new(tid as u64));
        stop.store(true, Ordering::Relaxed);
        worker.join().unwrap();
        assert_eq!(name.as_deref(), Some("comm-reader-che"));
    }

    #[test]
    fn test_walk_own_stack() {
        let platform = ProcfsPlatform::new();
        let mut frames = StackBuffer::new();
        platform
            .walk_stack(platform.current_thread(), &mut frames)
            .unwrap();
        assert!(!frames.is_empty());
    }

    fn raise_capture_signal() {
        let r = unsafe {
            libc::syscall(libc::SYS_tgkill, libc::getpid(), gettid(), capture_signal())
        };
        assert_eq!(r, 0);
    }

    #[test]
    fn test_late_signal_leaves_slot_armed() {
        install_handler().unwrap();
        let _guard = CAPTURE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        SLOT.target.store(gettid() + 1, Ordering::Relaxed);
        SLOT.state.store(ARMED, Ordering::Release);

        raise_capture_signal();

        assert_eq!(SLOT.state.load(Ordering::Acquire), ARMED);
        SLOT.state.store(IDLE, Ordering::Release);
    }

    #[test]
    fn test_handler_waits_for_a_claimed_slot() {
        install_handler().unwrap();
        let _guard = CAPTURE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        unsafe { *SLOT.frames.get() = StackBuffer::new() };
        SLOT.target.store(gettid(), Ordering::Relaxed);
        // a handler with a stale target holds the slot for a moment
        SLOT.state.store(BUSY, Ordering::Release);
        let release = thread::spawn(|| {
            thread::sleep(Duration::from_millis(20));
            SLOT.state.store(ARMED, Ordering::Release);
        });

        raise_capture_signal();
        release.join().unwrap();

        assert_eq!(SLOT.state.load(Ordering::Acquire), DONE);
        assert!(!unsafe { (*SLOT.frames.get()).is_empty() });
        SLOT.state.store(IDLE, Ordering::Release);
    }

    #[test]
    fn test_process_memory_rejects_null() {
        assert_eq!(ProcessMemory.read_word(0), None);
    }

    #[test]
    fn test_process_memory_reads_word() {
        let value: usize = 0x5eed;
        assert_eq!(ProcessMemory.read_word(&value as *const usize as usize), Some(0x5eed));
    }
}
