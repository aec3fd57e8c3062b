use thiserror::Error;

use crate::thread::ThreadHandle;

/// Failures reported by a platform adapter.
///
/// None of these reach the caller of the engine: each one is logged and
/// turned into a degraded trace instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to enumerate process threads: {0}")]
    Enumerate(String),

    #[error("failed to read register state of {thread}: kern_return {code}")]
    ThreadState { thread: ThreadHandle, code: i32 },

    #[error("failed to suspend {thread}: kern_return {code}")]
    Suspend { thread: ThreadHandle, code: i32 },

    #[error("failed to signal {thread}: errno {errno}")]
    Signal { thread: ThreadHandle, errno: i32 },

    #[error("{thread} did not answer the capture signal in time")]
    Timeout { thread: ThreadHandle },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
