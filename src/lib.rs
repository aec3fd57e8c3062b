//! Human-readable call stacks for live threads of the current process.
//!
//! ```no_run
//! use threadtrace::{Backtracer, Config, Immediate, LogicalThread, NativePlatform};
//!
//! // from the main thread
//! let tracer = Backtracer::setup(NativePlatform::new(), Config::default(), &Immediate);
//! println!("{}", tracer.capture(&LogicalThread::named("worker-1")));
//! println!("{}", tracer.capture_all());
//! ```
//!
//! A capture goes thread → kernel handle → stack walk → per address
//! nearest-symbol lookup → demangle → one formatted line:
//!
//! ```text
//! 0   libsystem_kernel.dylib              0x00000001a2b3c4d8 mach_msg2_trap + 8
//! ```

pub mod config;
pub mod demangle;
pub mod engine;
pub mod error;
pub mod format;
pub mod platform;
pub mod snapshot;
pub mod symbol;
pub mod thread;
pub mod walk;

#[cfg(any(target_os = "macos", all(target_os = "linux", target_env = "gnu")))]
mod unix;

#[cfg(all(target_os = "linux", target_env = "gnu"))]
pub mod linux;
#[cfg(target_os = "macos")]
pub mod macos;

pub use config::Config;
pub use engine::{Backtracer, Immediate, MainJob, MainScheduler};
pub use error::{Error, Result};
#[cfg(any(target_os = "macos", all(target_os = "linux", target_env = "gnu")))]
pub use platform::NativePlatform;
pub use platform::Platform;
pub use snapshot::Snapshot;
pub use symbol::{ResolvedSymbol, SymbolInfo};
pub use thread::{LogicalThread, NameMatch, ThreadHandle, ThreadResolver};
