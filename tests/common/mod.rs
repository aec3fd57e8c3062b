#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::thread;

use threadtrace::{walk::StackBuffer, Error, Platform, Result, SymbolInfo, ThreadHandle};

pub const SYMBOL_ADDR: usize = 0x1000_0010;
pub const IMAGE_ADDR: usize = 0x2000_0420;
pub const UNKNOWN_ADDR: usize = 0x3000_0000;

pub const SYMBOL_LINE: &str =
    "0   libworker.so                        0x0000000010000010 worker::spin + 16";
pub const IMAGE_LINE: &str =
    "1   server                              0x0000000020000420 server + 1056";
pub const UNKNOWN_LINE: &str =
    "2   ???                                 0x0000000030000000 0x0 + 805306368";

/// Scripted process: a fixed set of threads, stacks and loader answers.
pub struct FakePlatform {
    /// Returned when the calling thread's name maps to no fake thread.
    pub current: ThreadHandle,
    /// `None` makes enumeration fail.
    pub threads: Option<Vec<(ThreadHandle, Option<String>)>>,
    pub stacks: HashMap<ThreadHandle, Vec<usize>>,
    /// Walks of these threads push their frames, then fail.
    pub broken: HashSet<ThreadHandle>,
    pub symbols: HashMap<usize, SymbolInfo>,
    pub native: Vec<String>,
    pub raw_names: HashMap<usize, String>,
    pub name_limit: usize,
}

impl FakePlatform {
    pub fn new(current: ThreadHandle) -> Self {
        let mut symbols = HashMap::new();
        symbols.insert(
            SYMBOL_ADDR,
            SymbolInfo {
                image_path: Some("/usr/lib/libworker.so".into()),
                image_base: 0x1000_0000,
                symbol_name: Some("_ZN6worker4spin17h0123456789abcdefE".into()),
                symbol_address: 0x1000_0000,
            },
        );
        symbols.insert(
            IMAGE_ADDR,
            SymbolInfo {
                image_path: Some("/opt/app/server".into()),
                image_base: 0x2000_0000,
                symbol_name: None,
                symbol_address: 0,
            },
        );
        Self {
            current,
            threads: Some(vec![]),
            stacks: HashMap::new(),
            broken: HashSet::new(),
            symbols,
            native: vec![],
            raw_names: HashMap::new(),
            name_limit: 63,
        }
    }

    pub fn thread(mut self, handle: ThreadHandle, name: Option<&str>, stack: &[usize]) -> Self {
        self.threads
            .get_or_insert_with(Vec::new)
            .push((handle, name.map(ToOwned::to_owned)));
        self.stacks.insert(handle, stack.to_vec());
        self
    }

    pub fn stack(mut self, handle: ThreadHandle, stack: &[usize]) -> Self {
        self.stacks.insert(handle, stack.to_vec());
        self
    }
}

impl Platform for FakePlatform {
    fn current_thread(&self) -> ThreadHandle {
        let current = thread::current();
        let name = current.name();
        self.threads
            .iter()
            .flatten()
            .find(|(_, n)| name.is_some() && n.as_deref() == name)
            .map_or(self.current, |(h, _)| *h)
    }

    fn threads(&self) -> Result<Vec<ThreadHandle>> {
        match &self.threads {
            Some(threads) => Ok(threads.iter().map(|(h, _)| *h).collect()),
            None => Err(Error::Enumerate("scripted failure".into())),
        }
    }

    fn thread_name(&self, thread: ThreadHandle) -> Option<String> {
        self.threads
            .iter()
            .flatten()
            .find(|(h, _)| *h == thread)
            .and_then(|(_, n)| n.clone())
    }

    fn thread_name_limit(&self) -> usize {
        self.name_limit
    }

    fn walk_stack(&self, thread: ThreadHandle, frames: &mut StackBuffer) -> Result<()> {
        if let Some(stack) = self.stacks.get(&thread) {
            frames.extend_from(stack);
        }
        if self.broken.contains(&thread) {
            return Err(Error::Timeout { thread });
        }
        Ok(())
    }

    fn lookup_symbol(&self, address: usize) -> SymbolInfo {
        self.symbols.get(&address).cloned().unwrap_or_default()
    }

    fn native_call_stack(&self) -> Vec<String> {
        self.native.clone()
    }

    fn raw_symbol_names(&self, addresses: &[usize]) -> Vec<Option<String>> {
        addresses
            .iter()
            .map(|a| self.raw_names.get(a).cloned())
            .collect()
    }
}

pub fn handle(raw: u64) -> ThreadHandle {
    ThreadHandle::new(raw)
}
