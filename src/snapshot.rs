//! Structured, serializable form of an all-threads capture.

use serde::Serialize;

use crate::{
    engine::Backtracer,
    platform::Platform,
    symbol,
    thread::ThreadHandle,
};

#[derive(Debug, Serialize)]
pub struct Snapshot {
    pub captured_at: String,
    pub threads: Vec<Thread>,
}

#[derive(Debug, Serialize)]
pub struct Thread {
    pub index: usize,
    pub handle: ThreadHandle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub backtrace: Vec<Backtrace>,
}

#[derive(Debug, Serialize)]
pub struct Backtrace {
    pub depth: usize,
    #[serde(with = "hex")]
    pub address: usize,
    pub image: String,
    pub symbol: String,
    pub offset: usize,
}

impl<P: Platform> Backtracer<P> {
    /// Same threads and frames as [`Backtracer::capture_all`], kept as data.
    ///
    /// Symbols are always resolved; `demangle` only decides whether their
    /// names are demangled.
    pub fn snapshot_all(&self) -> Snapshot {
        let threads = self
            .threads_or_current()
            .into_iter()
            .enumerate()
            .map(|(index, handle)| Thread {
                index,
                handle,
                name: self.platform().thread_name(handle),
                backtrace: self.frames(handle),
            })
            .collect();

        Snapshot {
            captured_at: chrono::Utc::now().to_rfc3339(),
            threads,
        }
    }

    fn frames(&self, handle: ThreadHandle) -> Vec<Backtrace> {
        let frames = self.walk(handle);
        frames
            .as_slice()
            .iter()
            .enumerate()
            .filter(|&(_, &address)| address != 0)
            .map(|(depth, &address)| {
                let resolved = if self.config().demangle {
                    self.symbolicate(address)
                } else {
                    symbol::resolve(address, &self.platform().lookup_symbol(address))
                };
                Backtrace {
                    depth,
                    address,
                    image: resolved.image,
                    symbol: resolved.symbol,
                    offset: resolved.offset,
                }
            })
            .collect()
    }
}

mod hex {
    use serde::Serializer;
    use std::fmt::LowerHex;

    use crate::format::ADDRESS_WIDTH;

    pub fn serialize<V, S>(number: &V, serializer: S) -> Result<S::Ok, S::Error>
    where
        V: LowerHex,
        S: Serializer,
    {
        let s = format!("{number:#0width$x}", width = ADDRESS_WIDTH + 2);
        serializer.serialize_str(&s)
    }
}
