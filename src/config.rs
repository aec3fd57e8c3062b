use serde::{Deserialize, Serialize};

use crate::walk::MAX_FRAMES;

/// Capture settings, fixed for the lifetime of a [`crate::Backtracer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Let the system format the calling thread's stack instead of
    /// resolving addresses one by one. Other threads are never affected.
    pub native_fallback: bool,
    /// Resolve and demangle every frame. When off, frames are named by the
    /// system's own per-address formatting.
    pub demangle: bool,
    pub max_frames: usize,
}

impl Config {
    pub fn new(native_fallback: bool, demangle: bool) -> Self {
        Self {
            native_fallback,
            demangle,
            ..Self::default()
        }
    }

    pub(crate) fn frame_limit(&self) -> usize {
        self.max_frames.min(MAX_FRAMES)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            native_fallback: false,
            demangle: true,
            max_frames: MAX_FRAMES,
        }
    }
}
