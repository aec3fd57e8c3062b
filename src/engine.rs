use std::sync::{mpsc, Arc};

use log::{debug, warn};

use crate::{
    config::Config,
    format::{format_line, thread_header},
    platform::Platform,
    symbol,
    thread::{LogicalThread, MainThreadCache, NameMatch, ThreadHandle, ThreadResolver},
    walk::StackBuffer,
};

/// Work that has to run on the main thread.
pub type MainJob = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs jobs on, or serialized with, the main thread.
pub trait MainScheduler {
    fn schedule(&self, job: MainJob);
}

/// Runs the job right away. Only correct when called from the main thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct Immediate;

impl MainScheduler for Immediate {
    fn schedule(&self, job: MainJob) {
        job();
    }
}

/// The receiving end is drained by the application's main loop.
impl MainScheduler for mpsc::Sender<MainJob> {
    fn schedule(&self, job: MainJob) {
        if self.send(job).is_err() {
            warn!("main thread queue is closed, main thread handle stays unset");
        }
    }
}

/// Captures and renders call stacks of threads in this process.
///
/// Every capture degrades instead of failing: a thread that cannot be found
/// is replaced by the calling thread, a stack that cannot be read yields
/// fewer (possibly zero) lines, and an address without symbols is still
/// printed with the loader's raw fields.
pub struct Backtracer<P: Platform> {
    platform: Arc<P>,
    config: Config,
    main: Arc<MainThreadCache>,
    resolver: Box<dyn ThreadResolver>,
}

impl<P: Platform> Backtracer<P> {
    /// Build a backtracer and ask `scheduler` to record the main thread's
    /// handle. Captures issued before that job runs treat the main thread as
    /// unknown and fall back to the calling thread.
    pub fn setup(platform: P, config: Config, scheduler: &dyn MainScheduler) -> Self {
        let this = Self {
            platform: Arc::new(platform),
            config,
            main: Arc::new(MainThreadCache::new()),
            resolver: Box::new(NameMatch),
        };
        this.schedule_main_capture(scheduler);
        this
    }

    /// Replace the configuration and record the main thread again.
    pub fn reconfigure(&mut self, config: Config, scheduler: &dyn MainScheduler) {
        self.config = config;
        self.schedule_main_capture(scheduler);
    }

    pub fn with_resolver(mut self, resolver: impl ThreadResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    fn schedule_main_capture(&self, scheduler: &dyn MainScheduler) {
        let platform = Arc::clone(&self.platform);
        let main = Arc::clone(&self.main);
        scheduler.schedule(Box::new(move || {
            let handle = platform.current_thread();
            main.store(handle);
            debug!("main thread is {handle}");
        }));
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn main_thread(&self) -> Option<ThreadHandle> {
        self.main.load()
    }

    pub fn capture(&self, logical: &LogicalThread) -> String {
        if *logical == LogicalThread::Current && self.config.native_fallback {
            return self.platform.native_call_stack().join("\n");
        }
        let handle = self.resolve(logical);
        self.capture_handle(handle)
    }

    pub fn capture_main(&self) -> String {
        self.capture(&LogicalThread::Main)
    }

    pub fn capture_current(&self) -> String {
        self.capture(&LogicalThread::Current)
    }

    /// One block per thread, `"Thread <i>: \n"` followed by its trace,
    /// blocks separated by a blank line.
    pub fn capture_all(&self) -> String {
        self.threads_or_current()
            .into_iter()
            .enumerate()
            .map(|(i, handle)| thread_header(i) + &self.capture_handle(handle))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn capture_handle(&self, handle: ThreadHandle) -> String {
        let frames = self.walk(handle);
        self.render(frames.as_slice()).join("\n")
    }

    pub fn resolve(&self, logical: &LogicalThread) -> ThreadHandle {
        self.resolver.resolve(&*self.platform, &self.main, logical)
    }

    pub(crate) fn threads_or_current(&self) -> Vec<ThreadHandle> {
        match self.platform.threads() {
            Ok(threads) => threads,
            Err(e) => {
                warn!("{e}, capturing the calling thread only");
                vec![self.platform.current_thread()]
            }
        }
    }

    pub(crate) fn walk(&self, handle: ThreadHandle) -> StackBuffer {
        let mut frames = StackBuffer::with_limit(self.config.frame_limit());
        if let Err(e) = self.platform.walk_stack(handle, &mut frames) {
            warn!("{e}, keeping {} frames", frames.len());
        }
        if frames.is_empty() {
            debug!("no frames captured for {handle}");
        }
        frames
    }

    fn render(&self, addresses: &[usize]) -> Vec<String> {
        if !self.config.demangle {
            return self
                .platform
                .raw_symbol_names(addresses)
                .into_iter()
                .map(|name| name.unwrap_or_else(|| "<null>".to_owned()))
                .collect();
        }
        addresses
            .iter()
            .enumerate()
            .filter(|&(_, &address)| address != 0)
            .map(|(index, &address)| format_line(index, &self.symbolicate(address), address))
            .collect()
    }

    pub(crate) fn symbolicate(&self, address: usize) -> symbol::ResolvedSymbol {
        let info = self.platform.lookup_symbol(address);
        let mut resolved = symbol::resolve(address, &info);
        resolved.symbol = self.platform.demangle(&resolved.symbol);
        resolved
    }
}
