//! Seams the core consumes but never implements: file access and wall-clock
//! time are owned by the embedding application, not this crate.

use std::time::Instant;

use crate::error::Result;

/// Resolves a logical asset path to its bytes. The core never touches a
/// filesystem, archive, or network path directly; every loader is handed
/// a `&dyn VfsResolver` to fetch its raw data through.
pub trait VfsResolver: Send + Sync {
    fn resolve(&self, logical_path: &str) -> Result<Vec<u8>>;
}

/// Wall-clock time source, injected so tests can control "now" instead
/// of racing the real clock (resource priority's recency bonus and the
/// scheduler's per-frame time budget both read through this).
pub trait Clock: Send + Sync {
    fn now_seconds(&self) -> f64;
}

/// The default `Clock`, backed by a monotonic `Instant` captured at
/// construction so `now_seconds()` returns elapsed process time.
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock { start: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_seconds(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// A `Clock` whose time is advanced explicitly, used by tests that
/// exercise time-dependent behavior (resource recency bonus, scheduler
/// time budgets) deterministically.
pub struct ManualClock {
    seconds: std::sync::atomic::AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock {
            seconds: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn advance(&self, seconds: f64) {
        let bits = (self.now_seconds() + seconds).to_bits();
        self.seconds.store(bits, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn set(&self, seconds: f64) {
        self.seconds.store(seconds.to_bits(), std::sync::atomic::Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now_seconds(&self) -> f64 {
        f64::from_bits(self.seconds.load(std::sync::atomic::Ordering::SeqCst))
    }
}

/// An in-memory `VfsResolver` for tests and tools: a fixed map from
/// logical path to bytes.
#[derive(Default)]
pub struct MemoryVfs {
    files: std::collections::HashMap<String, Vec<u8>>,
}

impl MemoryVfs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), bytes.into());
    }
}

impl VfsResolver for MemoryVfs {
    fn resolve(&self, logical_path: &str) -> Result<Vec<u8>> {
        self.files
            .get(logical_path)
            .cloned()
            .ok_or_else(|| crate::error::ResourceError::AssetNotFound(logical_path.to_string()).into())
    }
}
