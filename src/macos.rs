use mach2::{
    kern_return, mach_port, mach_types, structs, task, thread_act, thread_status, traps, vm,
    vm_types,
};
use std::{
    ffi::{c_char, CStr},
    mem, ptr, slice,
    sync::{Mutex, PoisonError},
};

use crate::{
    error::{Error, Result},
    platform::Platform,
    symbol::SymbolInfo,
    thread::ThreadHandle,
    unix,
    walk::{self, Registers, StackBuffer, StackMemory},
};

/// `MAXTHREADNAMESIZE` minus the terminating NUL.
const NAME_LIMIT: usize = 63;

/// Held while another thread is suspended.
static CAPTURE_LOCK: Mutex<()> = Mutex::new(());

/// Mach adapter. Thread handles are port names in this task; other threads
/// are suspended for the duration of a walk.
#[derive(Debug, Default, Clone, Copy)]
pub struct MachPlatform;

impl MachPlatform {
    pub fn new() -> Self {
        Self
    }
}

impl Platform for MachPlatform {
    fn current_thread(&self) -> ThreadHandle {
        // Borrowed from libpthread, no send right to release.
        let port = unsafe { libc::pthread_mach_thread_np(libc::pthread_self()) };
        ThreadHandle::new(port as u64)
    }

    fn threads(&self) -> Result<Vec<ThreadHandle>> {
        unsafe {
            let mut threads_ptr: mach_types::thread_act_array_t = ptr::null_mut();
            let mut cnt = 0;
            let r = task::task_threads(traps::mach_task_self(), &mut threads_ptr, &mut cnt);
            if r != kern_return::KERN_SUCCESS {
                return Err(Error::Enumerate(format!("task_threads: kern_return {r}")));
            }

            // libpthread keeps its own right on every thread port, so the
            // names stay valid after the rights returned here are released.
            let mut threads = Vec::with_capacity(cnt as usize);
            for &name in slice::from_raw_parts(threads_ptr, cnt as usize) {
                mach_port::mach_port_deallocate(traps::mach_task_self(), name);
                threads.push(ThreadHandle::new(name as u64));
            }

            vm::mach_vm_deallocate(
                traps::mach_task_self(),
                threads_ptr as _,
                cnt as vm_types::mach_vm_size_t
                    * mem::size_of::<mach_types::thread_act_t>() as vm_types::mach_vm_size_t,
            );
            Ok(threads)
        }
    }

    fn thread_name(&self, thread: ThreadHandle) -> Option<String> {
        unsafe {
            let pthread = libc::pthread_from_mach_thread_np(thread.raw() as _);
            if pthread as usize == 0 {
                return None;
            }
            let mut name = [0 as c_char; NAME_LIMIT + 1];
            if libc::pthread_getname_np(pthread, name.as_mut_ptr(), name.len()) != 0 {
                return None;
            }
            let name = CStr::from_ptr(name.as_ptr()).to_string_lossy();
            (!name.is_empty()).then(|| name.into_owned())
        }
    }

    fn thread_name_limit(&self) -> usize {
        NAME_LIMIT
    }

    #[inline(never)]
    fn walk_stack(&self, thread: ThreadHandle, frames: &mut StackBuffer) -> Result<()> {
        if thread == self.current_thread() {
            walk::walk_frame_pointers(&current_registers(), &TaskMemory, frames);
            return Ok(());
        }

        // Two capturers suspending each other would never resume.
        let _guard = CAPTURE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let port = thread.raw() as mach_types::thread_act_t;
        let _suspended = Suspended::new(port, thread)?;
        let regs = unsafe { thread_registers(port, thread)? };
        walk::walk_frame_pointers(&regs, &TaskMemory, frames);
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

/// Keeps a thread suspended until dropped.
struct Suspended {
    port: mach_types::thread_act_t,
}

impl Suspended {
    fn new(port: mach_types::thread_act_t, thread: ThreadHandle) -> Result<Self> {
        let r = unsafe { thread_act::thread_suspend(port) };
        if r != kern_return::KERN_SUCCESS {
            return Err(Error::Suspend { thread, code: r });
        }
        Ok(Self { port })
    }
}

impl Drop for Suspended {
    fn drop(&mut self) {
        unsafe {
            thread_act::thread_resume(self.port);
        }
    }
}

#[cfg(target_arch = "aarch64")]
unsafe fn thread_registers(
    port: mach_types::thread_act_t,
    thread: ThreadHandle,
) -> Result<Registers> {
    let mut state = structs::arm_thread_state64_t::new();
    let mut count = structs::arm_thread_state64_t::count();
    let r = thread_act::thread_get_state(
        port,
        thread_status::ARM_THREAD_STATE64,
        &mut state as *mut _ as _,
        &mut count,
    );
    if r != kern_return::KERN_SUCCESS {
        return Err(Error::ThreadState { thread, code: r });
    }
    Ok(Registers {
        pc: state.__pc as usize,
        fp: state.__fp as usize,
        lr: Some(state.__lr as usize),
    })
}

#[cfg(target_arch = "x86_64")]
unsafe fn thread_registers(
    port: mach_types::thread_act_t,
    thread: ThreadHandle,
) -> Result<Registers> {
    let mut state = structs::x86_thread_state64_t::new();
    let mut count = structs::x86_thread_state64_t::count();
    let r = thread_act::thread_get_state(
        port,
        thread_status::x86_THREAD_STATE64,
        &mut state as *mut _ as _,
        &mut count,
    );
    if r != kern_return::KERN_SUCCESS {
        return Err(Error::ThreadState { thread, code: r });
    }
    Ok(Registers {
        pc: state.__rip as usize,
        fp: state.__rbp as usize,
        lr: None,
    })
}

// The caller cannot read its own kernel thread state, so take pc and fp
// straight from the registers. The link register is already clobbered here.
#[cfg(target_arch = "aarch64")]
#[inline(always)]
fn current_registers() -> Registers {
    let (pc, fp): (usize, usize);
    unsafe {
        std::arch::asm!(
            "adr {pc}, .",
            "mov {fp}, x29",
            pc = out(reg) pc,
            fp = out(reg) fp,
            options(nomem, nostack, preserves_flags),
        );
    }
    Registers { pc, fp, lr: None }
}

#[cfg(target_arch = "x86_64")]
#[inline(always)]
fn current_registers() -> Registers {
    let (pc, fp): (usize, usize);
    unsafe {
        std::arch::asm!(
            "lea {pc}, [rip]",
            "mov {fp}, rbp",
            pc = out(reg) pc,
            fp = out(reg) fp,
            options(nomem, nostack, preserves_flags),
        );
    }
    Registers { pc, fp, lr: None }
}

/// Reads this task's memory through the kernel so that a bad frame pointer
/// is an error rather than a fault.
struct TaskMemory;

impl StackMemory for TaskMemory {
    fn read_word(&self, addr: usize) -> Option<usize> {
        let mut word = 0usize;
        let mut cnt = 0;
        let r = unsafe {
            vm::mach_vm_read_overwrite(
                traps::mach_task_self(),
                addr as _,
                mem::size_of::<usize>() as _,
                &mut word as *mut _ as _,
                &mut cnt,
            )
        };
        (r == kern_return::KERN_SUCCESS && cnt as usize == mem::size_of::<usize>())
            .then_some(word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    };
    use std::{thread, time::Duration};

    #[test]
    fn test_threads_include_caller() {
        let platform = MachPlatform::new();
        let threads = platform.threads().unwrap();
        assert!(threads.contains(&platform.current_thread()));
    }

    #[test]
    fn test_walk_other_thread_resumes_it() {
        let platform = MachPlatform::new();
        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let stop2 = stop.clone();
        let worker = thread::Builder::new()
            .name("mach-walk-target".into())
            .spawn(move || {
                tx.send(MachPlatform::new().current_thread()).unwrap();
                while !stop2.load(Ordering::Relaxed) {
                    std::hint::spin_loop();
                }
            })
            .unwrap();
        let handle = rx.recv().unwrap();
        thread::sleep(Duration::from_millis(20));

        assert_eq!(platform.thread_name(handle).as_deref(), Some("mach-walk-target"));
        let mut frames = StackBuffer::new();
        platform.walk_stack(handle, &mut frames).unwrap();
        assert!(!frames.is_empty());

        // joining only works if the walk resumed the worker
        stop.store(true, Ordering::Relaxed);
        worker.join().unwrap();
    }

    #[test]
    fn test_threads_walk_each_other_concurrently() {
        let (tx, rx) = mpsc::channel();
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let tx = tx.clone();
                thread::spawn(move || {
                    let platform = MachPlatform::new();
                    tx.send(platform.current_thread()).unwrap();
                    for _ in 0..20 {
                        for handle in platform.threads().unwrap() {
                            let mut frames = StackBuffer::new();
                            let _ = platform.walk_stack(handle, &mut frames);
                        }
                    }
                })
            })
            .collect();
        drop(tx);
        assert_eq!(rx.iter().count(), 4);
        for worker in workers {
            worker.join().unwrap();
        }
    }

    #[test]
    fn test_task_memory_rejects_null() {
        assert_eq!(TaskMemory.read_word(0), None);
    }
}
