//! Frame-pointer stack walking.
//!
//! Stack frame layout shared by x86_64 and arm64 (frame pointer is `rbp`
//! / `x29`):
//!
//! ```text
//!   | ...              | hi-addr
//!   +------------------+
//!   | caller ret addr  |  fp + word
//!   +------------------+
//!   | caller fp        |  <- fp
//!   +------------------+
//!   | locals ...       | lo-addr
//! ```
//!
//! The walk starts from the interrupted `pc` (and `lr` on ARM, where the
//! innermost return address still sits in a register) and then follows the
//! saved frame pointer chain towards the stack base.

use std::mem;

/// Upper bound on captured frames per walk.
pub const MAX_FRAMES: usize = 128;

const WORD: usize = mem::size_of::<usize>();

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Registers {
    pub pc: usize,
    pub fp: usize,
    pub lr: Option<usize>,
}

/// Word-sized reads from the stack that report failure instead of faulting.
pub trait StackMemory {
    fn read_word(&self, addr: usize) -> Option<usize>;
}

/// Fixed-capacity scratch space for one walk, innermost address first.
#[derive(Clone)]
pub struct StackBuffer {
    addrs: [usize; MAX_FRAMES],
    len: usize,
    limit: usize,
}

impl StackBuffer {
    pub const fn new() -> Self {
        Self::with_limit(MAX_FRAMES)
    }

    pub const fn with_limit(limit: usize) -> Self {
        Self {
            addrs: [0; MAX_FRAMES],
            len: 0,
            limit: if limit < MAX_FRAMES { limit } else { MAX_FRAMES },
        }
    }

    /// Returns false once the limit is reached.
    pub fn push(&mut self, addr: usize) -> bool {
        if self.is_full() {
            return false;
        }
        self.addrs[self.len] = addr;
        self.len += 1;
        true
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.limit
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.addrs[..self.len]
    }

    /// Copy the addresses of `other`, up to this buffer's limit.
    pub fn extend_from(&mut self, other: &[usize]) {
        for &addr in other {
            if !self.push(addr) {
                break;
            }
        }
    }
}

impl Default for StackBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Follow the frame pointer chain starting at `regs`.
///
/// Stops at a null saved frame pointer, at an unreadable or misaligned
/// frame, when the chain stops growing towards the stack base, or when the
/// buffer is full. Never allocates, so it is usable from a signal handler.
pub fn walk_frame_pointers<M: StackMemory + ?Sized>(
    regs: &Registers,
    memory: &M,
    out: &mut StackBuffer,
) {
    if !out.push(regs.pc) {
        return;
    }
    if let Some(lr) = regs.lr {
        if !out.push(lr) {
            return;
        }
    }

    let mut fp = regs.fp;
    while !out.is_full() {
        if fp == 0 || fp % WORD != 0 {
            break;
        }
        let Some(prev) = memory.read_word(fp) else {
            break;
        };
        if prev == 0 {
            break;
        }
        let Some(ret) = fp.checked_add(WORD).and_then(|a| memory.read_word(a)) else {
            break;
        };
        out.push(ret);
        if prev <= fp {
            break;
        }
        fp = prev;
    }
}
