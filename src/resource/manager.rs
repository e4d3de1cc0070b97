//! Process-wide, reference-counted resource cache with asynchronous
//! loading, a priority-ordered work queue, quality-level refinement, and
//! reload propagation.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use dashmap::DashMap;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{ResourceError, Result};
use crate::external::Clock;

use super::handle::ResourceHandle;

/// How eagerly a resource should be loaded. `Critical` always sorts
/// first; the others are weighted by [`ResourcePriority::step`] and
/// further adjusted by load state and recency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResourcePriority {
    Critical,
    High,
    Normal,
    Low,
    Lowest,
}

impl ResourcePriority {
    fn step(self) -> f64 {
        match self {
            ResourcePriority::Critical => 0.0, // short-circuited before this is read
            ResourcePriority::High => 0.0,
            ResourcePriority::Normal => 1.0,
            ResourcePriority::Low => 2.0,
            ResourcePriority::Lowest => 3.0,
        }
    }
}

/// A resource's place in its load lifecycle. `LoadedFallback` is a
/// transient display state: a fallback is being served while the real
/// load is still in flight, and is cleared the moment that load lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingState {
    Unloaded,
    UnloadedMetaInfoAvailable,
    LoadedResourceMissing,
    LoadedFallback,
    Loaded,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    pub cpu: u64,
    pub gpu: u64,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ResourceFlags: u8 {
        const HAS_FALLBACK      = 1 << 0;
        const HAS_TYPE_FALLBACK = 1 << 1;
    }
}

/// What a caller's `acquire` should do if the resource is not yet
/// loaded.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    /// Block the calling thread until the resource reaches `Loaded` or
    /// `LoadedResourceMissing`, raising its priority to `Critical` first.
    BlockTillLoaded,
    /// Return a fallback immediately if the resource isn't `Loaded` yet;
    /// never blocks.
    AllowLoadingFallback,
    /// Return whatever is available right now (a fallback, or nothing);
    /// never blocks, never raises priority.
    PointerOnly,
    /// Block like `BlockTillLoaded`, but fall back instead of failing
    /// when the real load comes back missing. Still fails if no
    /// fallback is registered for the resource or its type — a `T`
    /// can't be conjured from nothing.
    BlockTillLoaded_NeverFail,
}

/// The result of a successful load, handed back by a registered
/// [`ResourceLoader`].
pub struct LoadedContent {
    pub payload: Box<dyn Any + Send + Sync>,
    pub quality_levels_loadable: u8,
    pub quality_levels_discardable: u8,
    pub memory_usage: MemoryUsage,
}

/// A per-type loader. Registered once per resource type; invoked by a
/// worker thread, never on the caller's thread.
pub trait ResourceLoader: Send + Sync {
    fn type_name(&self) -> &'static str;
    fn load(&self, unique_id: &str, description: &str) -> std::result::Result<LoadedContent, String>;
}

type ReloadCallback = Box<dyn Fn(u32) + Send + Sync>;

struct ResourceSlot {
    unique_id: String,
    unique_id_hash: u64,
    description: Mutex<String>,
    type_name: &'static str,
    generation: u8,
    ref_count: AtomicU32,
    state: RwLock<LoadingState>,
    quality_levels_loadable: AtomicU8,
    quality_levels_discardable: AtomicU8,
    priority: Mutex<ResourcePriority>,
    last_acquire_seconds: Mutex<f64>,
    memory_usage: Mutex<MemoryUsage>,
    flags: Mutex<ResourceFlags>,
    /// Raw `(index, generation)` of the per-resource fallback set via
    /// `register_fallback`, if any.
    fallback: Mutex<Option<(u32, u8)>>,
    payload: RwLock<Option<Box<dyn Any + Send + Sync>>>,
    reported_missing: std::sync::atomic::AtomicBool,
    load_done: (Mutex<bool>, Condvar),
}

impl ResourceSlot {
    /// Lower return value wins. Exactly mirrors the original formula:
    /// `Critical` resources always load first; otherwise the priority
    /// tier contributes a base offset, the load state and fallback
    /// availability add a penalty, and recency shrinks it (resources
    /// acquired long ago get the full 10-second bonus subtracted away).
    fn loading_priority(&self, now_seconds: f64) -> f64 {
        let priority = *self.priority.lock().unwrap();
        if priority == ResourcePriority::Critical {
            return 0.0;
        }
        let mut score = priority.step() * 10.0;
        let state = *self.state.read().unwrap();
        if state == LoadingState::Loaded {
            let discardable = self.quality_levels_discardable.load(Ordering::Relaxed);
            score += 30.0 + discardable as f64 * 10.0;
        } else {
            let flags = *self.flags.lock().unwrap();
            if flags.contains(ResourceFlags::HAS_FALLBACK) {
                score += 20.0;
            } else if flags.contains(ResourceFlags::HAS_TYPE_FALLBACK) {
                score += 10.0;
            }
        }
        let last_acquire = *self.last_acquire_seconds.lock().unwrap();
        let time_bonus = (now_seconds - last_acquire).max(0.0).min(10.0);
        score + time_bonus
    }

    fn mark_loaded(&self, content: LoadedContent) {
        *self.payload.write().unwrap() = Some(content.payload);
        self.quality_levels_loadable
            .store(content.quality_levels_loadable, Ordering::Relaxed);
        self.quality_levels_discardable
            .store(content.quality_levels_discardable, Ordering::Relaxed);
        *self.memory_usage.lock().unwrap() = content.memory_usage;
        *self.state.write().unwrap() = LoadingState::Loaded;
        self.signal_load_done();
    }

    fn mark_missing(&self) {
        *self.state.write().unwrap() = LoadingState::LoadedResourceMissing;
        self.signal_load_done();
    }

    fn signal_load_done(&self) {
        let (lock, cvar) = &self.load_done;
        let mut done = lock.lock().unwrap();
        *done = true;
        cvar.notify_all();
    }

    fn wait_until_loaded(&self) {
        let (lock, cvar) = &self.load_done;
        let mut done = lock.lock().unwrap();
        while !*done {
            done = cvar.wait(done).unwrap();
        }
    }
}

/// Construction-time configuration for the manager, in the spirit of the
/// teacher's `ResourceConfig`/`OffloadConfig` desc structs.
pub struct ResourceManagerConfig {
    pub worker_threads: usize,
}

impl Default for ResourceManagerConfig {
    fn default() -> Self {
        ResourceManagerConfig { worker_threads: 2 }
    }
}

struct PendingQueue {
    indices: Mutex<Vec<u32>>,
    cv: Condvar,
}

impl PendingQueue {
    fn new() -> Self {
        PendingQueue {
            indices: Mutex::new(Vec::new()),
            cv: Condvar::new(),
        }
    }

    fn push(&self, index: u32) {
        let mut q = self.indices.lock().unwrap();
        if !q.contains(&index) {
            q.push(index);
        }
        self.cv.notify_one();
    }

    /// Scans all pending indices and removes the one with the lowest
    /// `loading_priority` right now, re-evaluating every candidate's
    /// score fresh (the original priority queue is recomputed on pop,
    /// not precomputed at push, since recency shifts every tick).
    fn pop_best(&self, slots: &Mutex<Vec<Option<Arc<ResourceSlot>>>>, now_seconds: f64, shutdown: &std::sync::atomic::AtomicBool) -> Option<u32> {
        let mut q = self.indices.lock().unwrap();
        loop {
            if shutdown.load(Ordering::Relaxed) {
                return None;
            }
            if let Some(best_pos) = best_position(&q, slots, now_seconds) {
                return Some(q.remove(best_pos));
            }
            q = self.cv.wait(q).unwrap();
        }
    }
}

fn best_position(q: &[u32], slots: &Mutex<Vec<Option<Arc<ResourceSlot>>>>, now_seconds: f64) -> Option<usize> {
    if q.is_empty() {
        return None;
    }
    let slots = slots.lock().unwrap();
    let mut best: Option<(usize, f64)> = None;
    for (pos, &idx) in q.iter().enumerate() {
        if let Some(Some(slot)) = slots.get(idx as usize) {
            let score = slot.loading_priority(now_seconds);
            if best.map(|(_, b)| score < b).unwrap_or(true) {
                best = Some((pos, score));
            }
        }
    }
    best.map(|(pos, _)| pos)
}

/// The resource manager: a process-wide cache keyed by unique id, backed
/// by a generational slot table and a fixed worker pool that drains a
/// priority-ordered pending queue.
pub struct ResourceManager {
    slots: Mutex<Vec<Option<Arc<ResourceSlot>>>>,
    free_list: Mutex<Vec<u32>>,
    by_hash: DashMap<u64, u32>,
    loaders: DashMap<&'static str, Arc<dyn ResourceLoader>>,
    type_fallbacks: DashMap<&'static str, String>,
    /// Per-type fallback payload, built on first use by synchronously
    /// invoking the type's loader against its registered fallback
    /// description, then cached for every resource of that type.
    type_fallback_cache: DashMap<&'static str, Arc<dyn Any + Send + Sync>>,
    reload_subscribers: DashMap<u32, Vec<ReloadCallback>>,
    pending: Arc<PendingQueue>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
    clock: Arc<dyn Clock>,
}

impl ResourceManager {
    pub fn new(config: ResourceManagerConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        let manager = Arc::new(ResourceManager {
            slots: Mutex::new(Vec::new()),
            free_list: Mutex::new(Vec::new()),
            by_hash: DashMap::new(),
            loaders: DashMap::new(),
            type_fallbacks: DashMap::new(),
            type_fallback_cache: DashMap::new(),
            reload_subscribers: DashMap::new(),
            pending: Arc::new(PendingQueue::new()),
            workers: Mutex::new(Vec::new()),
            shutdown: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            clock,
        });

        let mut workers = manager.workers.lock().unwrap();
        for worker_id in 0..config.worker_threads.max(1) {
            let manager_weak = Arc::downgrade(&manager);
            let pending = manager.pending.clone();
            let shutdown = manager.shutdown.clone();
            workers.push(std::thread::Builder::new()
                .name(format!("resource-worker-{worker_id}"))
                .spawn(move || worker_loop(manager_weak, pending, shutdown))
                .expect("failed to spawn resource worker thread"));
        }
        drop(workers);
        manager
    }

    pub fn register_loader(&self, loader: Arc<dyn ResourceLoader>) {
        self.loaders.insert(loader.type_name(), loader);
    }

    pub fn register_type_fallback(&self, type_name: &'static str, description: impl Into<String>) {
        self.type_fallbacks.insert(type_name, description.into());
    }

    /// Registers `fallback` as the payload served for `handle` whenever
    /// it isn't ready, setting the resource's `HAS_FALLBACK` flag (which
    /// also shifts its loading priority, see [`ResourceSlot::loading_priority`]).
    pub fn register_fallback<T: Clone + Send + Sync + 'static>(
        &self,
        handle: ResourceHandle<T>,
        fallback: ResourceHandle<T>,
    ) -> Result<()> {
        let slot = self.slot_for(handle)?;
        *slot.fallback.lock().unwrap() = Some((fallback.index(), fallback.generation()));
        let mut flags = slot.flags.lock().unwrap();
        *flags |= ResourceFlags::HAS_FALLBACK;
        Ok(())
    }

    /// Looks up or creates a slot for `unique_id`, queuing a load task
    /// if this is the first request. Returns a handle valid regardless
    /// of the resource's load state.
    pub fn load<T: 'static>(&self, type_name: &'static str, unique_id: &str, description: &str) -> ResourceHandle<T> {
        let hash = xxh3_64(unique_id.as_bytes());
        if let Some(index) = self.by_hash.get(&hash).map(|r| *r) {
            let slots = self.slots.lock().unwrap();
            if let Some(Some(slot)) = slots.get(index as usize) {
                slot.ref_count.fetch_add(1, Ordering::Relaxed);
                return ResourceHandle::new(index, slot.generation);
            }
        }

        let has_type_fallback = self.type_fallbacks.contains_key(type_name);
        let mut flags = ResourceFlags::empty();
        if has_type_fallback {
            flags |= ResourceFlags::HAS_TYPE_FALLBACK;
        }

        let slot = Arc::new(ResourceSlot {
            unique_id: unique_id.to_string(),
            unique_id_hash: hash,
            description: Mutex::new(description.to_string()),
            type_name,
            generation: 0,
            ref_count: AtomicU32::new(1),
            state: RwLock::new(LoadingState::Unloaded),
            quality_levels_loadable: AtomicU8::new(1),
            quality_levels_discardable: AtomicU8::new(0),
            priority: Mutex::new(ResourcePriority::Normal),
            last_acquire_seconds: Mutex::new(self.clock.now_seconds()),
            memory_usage: Mutex::new(MemoryUsage::default()),
            flags: Mutex::new(flags),
            fallback: Mutex::new(None),
            payload: RwLock::new(None),
            reported_missing: std::sync::atomic::AtomicBool::new(false),
            load_done: (Mutex::new(false), Condvar::new()),
        });

        let index = {
            let mut free = self.free_list.lock().unwrap();
            let mut slots = self.slots.lock().unwrap();
            if let Some(index) = free.pop() {
                slots[index as usize] = Some(slot.clone());
                index
            } else {
                let index = slots.len() as u32;
                slots.push(Some(slot.clone()));
                index
            }
        };
        self.by_hash.insert(hash, index);
        *self.slots.lock().unwrap()[index as usize].as_ref().unwrap().state.write().unwrap() =
            LoadingState::UnloadedMetaInfoAvailable;
        self.pending.push(index);
        ResourceHandle::new(index, slot.generation)
    }

    fn slot(&self, index: u32) -> Option<Arc<ResourceSlot>> {
        self.slots.lock().unwrap().get(index as usize).cloned().flatten()
    }

    fn slot_for<T>(&self, handle: ResourceHandle<T>) -> Result<Arc<ResourceSlot>> {
        let slot = self
            .slot(handle.index())
            .ok_or_else(|| ResourceError::AssetNotFound(format!("handle index {}", handle.index())))?;
        if slot.generation != handle.generation() {
            return Err(ResourceError::AssetNotFound(format!("stale handle index {}", handle.index())).into());
        }
        Ok(slot)
    }

    fn payload_clone<T: Clone + 'static>(slot: &ResourceSlot) -> Option<T> {
        slot.payload.read().unwrap().as_ref().and_then(|b| b.downcast_ref::<T>()).cloned()
    }

    /// Looks up `type_name`'s fallback payload, loading it synchronously
    /// on first use and caching the result.
    fn type_fallback_payload<T: Clone + Send + Sync + 'static>(&self, type_name: &'static str) -> Option<T> {
        if let Some(cached) = self.type_fallback_cache.get(type_name) {
            return cached.downcast_ref::<T>().cloned();
        }
        let description = self.type_fallbacks.get(type_name)?.clone();
        let loader = self.loaders.get(type_name)?.clone();
        let content = loader.load(type_name, &description).ok()?;
        let value = content.payload.downcast_ref::<T>()?.clone();
        self.type_fallback_cache
            .insert(type_name, Arc::new(value.clone()) as Arc<dyn Any + Send + Sync>);
        Some(value)
    }

    /// The per-resource fallback, if one is registered and still valid;
    /// otherwise the type-wide fallback, if one is registered.
    fn fallback_payload<T: Clone + Send + Sync + 'static>(&self, slot: &ResourceSlot) -> Option<T> {
        if let Some((index, generation)) = *slot.fallback.lock().unwrap() {
            if let Some(fallback_slot) = self.slot(index) {
                if fallback_slot.generation == generation {
                    if let Some(value) = Self::payload_clone::<T>(&fallback_slot) {
                        return Some(value);
                    }
                }
            }
        }
        self.type_fallback_payload::<T>(slot.type_name)
    }

    fn raise_to_critical(&self, slot: &ResourceSlot, index: u32) {
        let mut current = slot.priority.lock().unwrap();
        if *current != ResourcePriority::Critical {
            *current = ResourcePriority::Critical;
            drop(current);
            self.pending.push(index);
        }
    }

    /// Blocks until the resource leaves every non-terminal state
    /// (`Unloaded`, `UnloadedMetaInfoAvailable`, and the transient
    /// `LoadedFallback` display state) and lands on `Loaded` or
    /// `LoadedResourceMissing`.
    fn wait_for_terminal(&self, slot: &ResourceSlot) {
        loop {
            let state = *slot.state.read().unwrap();
            if !matches!(
                state,
                LoadingState::Unloaded | LoadingState::UnloadedMetaInfoAvailable | LoadingState::LoadedFallback
            ) {
                return;
            }
            slot.wait_until_loaded();
        }
    }

    fn resolve_loaded_or_fallback<T: Clone + Send + Sync + 'static>(&self, slot: &ResourceSlot) -> Result<T> {
        let state = *slot.state.read().unwrap();
        if state == LoadingState::Loaded {
            return Self::payload_clone::<T>(slot).ok_or_else(|| ResourceError::WrongResourceType { id: slot.unique_id.clone() }.into());
        }
        if !slot.reported_missing.swap(true, Ordering::Relaxed) {
            tracing::warn!(resource = slot.unique_id.as_str(), "resource is missing, using fallback");
        }
        match self.fallback_payload::<T>(slot) {
            Some(value) => Ok(value),
            None => Err(ResourceError::AssetNotFound(slot.unique_id.clone()).into()),
        }
    }

    fn resolve_never_fail<T: Clone + Send + Sync + 'static>(&self, slot: &ResourceSlot) -> Result<T> {
        let state = *slot.state.read().unwrap();
        if state == LoadingState::Loaded {
            if let Some(value) = Self::payload_clone::<T>(slot) {
                return Ok(value);
            }
        }
        match self.fallback_payload::<T>(slot) {
            Some(value) => Ok(value),
            None => Err(ResourceError::NotReady(slot.unique_id.clone()).into()),
        }
    }

    fn resolve_with_fallback<T: Clone + Send + Sync + 'static>(&self, slot: &ResourceSlot) -> Result<T> {
        let state = *slot.state.read().unwrap();
        if state == LoadingState::Loaded {
            return Self::payload_clone::<T>(slot).ok_or_else(|| ResourceError::WrongResourceType { id: slot.unique_id.clone() }.into());
        }
        if state == LoadingState::LoadedResourceMissing {
            return match self.fallback_payload::<T>(slot) {
                Some(value) => Ok(value),
                None => Err(ResourceError::AssetNotFound(slot.unique_id.clone()).into()),
            };
        }
        match self.fallback_payload::<T>(slot) {
            Some(value) => {
                let mut guard = slot.state.write().unwrap();
                if matches!(*guard, LoadingState::Unloaded | LoadingState::UnloadedMetaInfoAvailable) {
                    *guard = LoadingState::LoadedFallback;
                }
                Ok(value)
            }
            None => Err(ResourceError::NotReady(slot.unique_id.clone()).into()),
        }
    }

    fn resolve_pointer_only<T: Clone + Send + Sync + 'static>(&self, slot: &ResourceSlot) -> Result<T> {
        let state = *slot.state.read().unwrap();
        if state == LoadingState::Loaded {
            return Self::payload_clone::<T>(slot).ok_or_else(|| ResourceError::WrongResourceType { id: slot.unique_id.clone() }.into());
        }
        if state == LoadingState::LoadedResourceMissing {
            return match self.fallback_payload::<T>(slot) {
                Some(value) => Ok(value),
                None => Err(ResourceError::AssetNotFound(slot.unique_id.clone()).into()),
            };
        }
        match self.fallback_payload::<T>(slot) {
            Some(value) => Ok(value),
            None => Err(ResourceError::NotReady(slot.unique_id.clone()).into()),
        }
    }

    /// Resolves `handle` to its payload, following `mode`'s blocking and
    /// fallback behavior. Updates the resource's recency bonus on every
    /// call.
    pub fn acquire<T: Clone + Send + Sync + 'static>(&self, handle: ResourceHandle<T>, mode: AcquireMode) -> Result<T> {
        let slot = self.slot_for(handle)?;
        *slot.last_acquire_seconds.lock().unwrap() = self.clock.now_seconds();

        match mode {
            AcquireMode::BlockTillLoaded => {
                self.raise_to_critical(&slot, handle.index());
                self.wait_for_terminal(&slot);
                self.resolve_loaded_or_fallback(&slot)
            }
            AcquireMode::BlockTillLoaded_NeverFail => {
                self.raise_to_critical(&slot, handle.index());
                self.wait_for_terminal(&slot);
                self.resolve_never_fail(&slot)
            }
            AcquireMode::AllowLoadingFallback => {
                self.pending.push(handle.index());
                self.resolve_with_fallback(&slot)
            }
            AcquireMode::PointerOnly => self.resolve_pointer_only(&slot),
        }
    }

    pub fn set_priority<T>(&self, handle: ResourceHandle<T>, priority: ResourcePriority) -> Result<()> {
        let slot = self.slot_for(handle)?;
        let mut current = slot.priority.lock().unwrap();
        if *current != priority {
            *current = priority;
            drop(current);
            self.pending.push(handle.index());
        }
        Ok(())
    }

    /// Marks the resource as needing a reload and re-queues it. Without
    /// `force`, this is a no-op unless the resource is already `Loaded`
    /// (a resource still on its first load doesn't need re-queuing).
    /// Every registered callback runs once the reload completes.
    pub fn reload<T>(&self, handle: ResourceHandle<T>, force: bool) -> Result<()> {
        let slot = self.slot_for(handle)?;
        let state = *slot.state.read().unwrap();
        if !force && state != LoadingState::Loaded {
            return Ok(());
        }
        {
            let (lock, _) = &slot.load_done;
            *lock.lock().unwrap() = false;
        }
        *slot.state.write().unwrap() = LoadingState::UnloadedMetaInfoAvailable;
        self.pending.push(handle.index());
        Ok(())
    }

    /// Registers a callback invoked every time `handle`'s content
    /// updates after a reload.
    pub fn on_reload<T>(&self, handle: ResourceHandle<T>, callback: impl Fn(u32) + Send + Sync + 'static) {
        self.reload_subscribers
            .entry(handle.index())
            .or_default()
            .push(Box::new(callback));
    }

    /// Moves one quality level from loadable to discardable (more detail
    /// becomes available), or the inverse when `refine` is false
    /// (eviction). Rejects any loader/caller request that would change
    /// the total ladder length instead of just moving the boundary.
    pub fn apply_quality_transition<T>(&self, handle: ResourceHandle<T>, refine: bool) -> Result<()> {
        let slot = self.slot_for(handle)?;
        let loadable = slot.quality_levels_loadable.load(Ordering::Relaxed);
        let discardable = slot.quality_levels_discardable.load(Ordering::Relaxed);
        let total = loadable as i32 + discardable as i32;

        let (new_loadable, new_discardable) = if refine {
            if loadable == 0 {
                return Err(ResourceError::InvalidQualityTransition(slot.unique_id.clone()).into());
            }
            (loadable - 1, discardable + 1)
        } else {
            if discardable == 0 {
                return Err(ResourceError::InvalidQualityTransition(slot.unique_id.clone()).into());
            }
            (loadable + 1, discardable - 1)
        };

        if new_loadable as i32 + new_discardable as i32 != total {
            return Err(ResourceError::InvalidQualityTransition(slot.unique_id.clone()).into());
        }

        slot.quality_levels_loadable.store(new_loadable, Ordering::Relaxed);
        slot.quality_levels_discardable.store(new_discardable, Ordering::Relaxed);
        Ok(())
    }

    pub fn decrease_ref_count<T>(&self, handle: ResourceHandle<T>) -> Result<()> {
        let slot = self.slot_for(handle)?;
        slot.ref_count.fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }

    /// Frees zero-refcount slots within `time_budget`, stopping once
    /// `max_bytes` have been reclaimed. A slot with remaining
    /// discardable quality levels gives one up per pass instead of being
    /// evicted outright; only a slot with nothing left to discard is
    /// fully removed. Returns the number of slots fully evicted.
    pub fn free_unused(&self, time_budget: Duration, max_bytes: u64) -> usize {
        let deadline = self.clock.now_seconds() + time_budget.as_secs_f64();
        let mut reclaimed_bytes: u64 = 0;
        let mut freed = 0usize;

        loop {
            let mut progressed = false;
            let mut slots = self.slots.lock().unwrap();
            for index in 0..slots.len() {
                if self.clock.now_seconds() >= deadline || reclaimed_bytes >= max_bytes {
                    return freed;
                }
                let Some(slot) = slots[index].clone() else { continue };
                if slot.ref_count.load(Ordering::Relaxed) != 0 {
                    continue;
                }
                let discardable = slot.quality_levels_discardable.load(Ordering::Relaxed);
                if discardable > 0 {
                    let loadable = slot.quality_levels_loadable.load(Ordering::Relaxed);
                    let total = (loadable as u64 + discardable as u64).max(1);
                    let usage = *slot.memory_usage.lock().unwrap();
                    let per_level = (usage.cpu + usage.gpu) / total;
                    slot.quality_levels_discardable.store(discardable - 1, Ordering::Relaxed);
                    slot.quality_levels_loadable.store(loadable + 1, Ordering::Relaxed);
                    reclaimed_bytes += per_level;
                    progressed = true;
                } else {
                    let usage = *slot.memory_usage.lock().unwrap();
                    slots[index] = None;
                    self.by_hash.remove(&slot.unique_id_hash);
                    self.free_list.lock().unwrap().push(index as u32);
                    reclaimed_bytes += usage.cpu + usage.gpu;
                    freed += 1;
                    progressed = true;
                }
            }
            drop(slots);
            if !progressed {
                return freed;
            }
        }
    }

    pub fn loading_state<T>(&self, handle: ResourceHandle<T>) -> Result<LoadingState> {
        Ok(*self.slot_for(handle)?.state.read().unwrap())
    }

    pub fn ref_count<T>(&self, handle: ResourceHandle<T>) -> Result<u32> {
        Ok(self.slot_for(handle)?.ref_count.load(Ordering::Relaxed))
    }

    /// Signals worker threads to stop, waits for outstanding loads, and
    /// logs every resource still holding a nonzero reference count as a
    /// leak rather than panicking, so shutdown always completes.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.pending.cv.notify_all();
        let mut workers = self.workers.lock().unwrap();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
        let slots = self.slots.lock().unwrap();
        for slot in slots.iter().flatten() {
            let count = slot.ref_count.load(Ordering::Relaxed);
            if count > 0 {
                tracing::warn!(resource = slot.unique_id.as_str(), ref_count = count, "resource leaked at shutdown");
            }
        }
    }
}

fn worker_loop(manager: std::sync::Weak<ResourceManager>, pending: Arc<PendingQueue>, shutdown: Arc<std::sync::atomic::AtomicBool>) {
    loop {
        let Some(manager) = manager.upgrade() else { return };
        if shutdown.load(Ordering::Relaxed) {
            return;
        }
        let now = manager.clock.now_seconds();
        let Some(index) = pending.pop_best(&manager.slots, now, &shutdown) else {
            return;
        };
        let Some(slot) = manager.slot(index) else { continue };

        let loader = manager.loaders.get(slot.type_name).map(|l| l.clone());
        let description = slot.description.lock().unwrap().clone();
        let result = match loader {
            Some(loader) => loader.load(&slot.unique_id, &description),
            None => Err(format!("no loader registered for type `{}`", slot.type_name)),
        };

        match result {
            Ok(content) => {
                slot.mark_loaded(content);
                if let Some(subs) = manager.reload_subscribers.get(&index) {
                    for callback in subs.iter() {
                        callback(index);
                    }
                }
            }
            Err(reason) => {
                tracing::warn!(resource = slot.unique_id.as_str(), %reason, "resource load failed");
                slot.mark_missing();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::ManualClock;

    struct EchoLoader;
    impl ResourceLoader for EchoLoader {
        fn type_name(&self) -> &'static str {
            "EchoResource"
        }
        fn load(&self, unique_id: &str, _description: &str) -> std::result::Result<LoadedContent, String> {
            Ok(LoadedContent {
                payload: Box::new(unique_id.to_string()),
                quality_levels_loadable: 1,
                quality_levels_discardable: 0,
                memory_usage: MemoryUsage::default(),
            })
        }
    }

    struct FailingLoader;
    impl ResourceLoader for FailingLoader {
        fn type_name(&self) -> &'static str {
            "MissingResource"
        }
        fn load(&self, _unique_id: &str, _description: &str) -> std::result::Result<LoadedContent, String> {
            Err("not found on disk".to_string())
        }
    }

    fn manager() -> Arc<ResourceManager> {
        ResourceManager::new(
            ResourceManagerConfig { worker_threads: 2 },
            Arc::new(ManualClock::new()),
        )
    }

    #[test]
    fn load_and_blocking_acquire_returns_payload() {
        let mgr = manager();
        mgr.register_loader(Arc::new(EchoLoader));
        let handle: ResourceHandle<String> = mgr.load("EchoResource", "textures/wall.png", "wall.png");
        let value = mgr.acquire(handle, AcquireMode::BlockTillLoaded).unwrap();
        assert_eq!(value, "textures/wall.png");
        mgr.shutdown();
    }

    #[test]
    fn second_load_of_same_id_reuses_slot_and_bumps_refcount() {
        let mgr = manager();
        mgr.register_loader(Arc::new(EchoLoader));
        let h1: ResourceHandle<String> = mgr.load("EchoResource", "shared.png", "shared.png");
        let h2: ResourceHandle<String> = mgr.load("EchoResource", "shared.png", "shared.png");
        assert_eq!(h1, h2);
        assert_eq!(mgr.ref_count(h1).unwrap(), 2);
        mgr.shutdown();
    }

    #[test]
    fn missing_resource_surfaces_as_error_and_reports_once() {
        let mgr = manager();
        mgr.register_loader(Arc::new(FailingLoader));
        let handle: ResourceHandle<String> = mgr.load("MissingResource", "ghost.png", "ghost.png");
        assert!(mgr.acquire(handle, AcquireMode::BlockTillLoaded).is_err());
        assert_eq!(mgr.loading_state(handle).unwrap(), LoadingState::LoadedResourceMissing);
        mgr.shutdown();
    }

    #[test]
    fn quality_transition_rejects_ladder_length_change() {
        let mgr = manager();
        mgr.register_loader(Arc::new(EchoLoader));
        let handle: ResourceHandle<String> = mgr.load("EchoResource", "mesh.bin", "mesh.bin");
        mgr.acquire(handle, AcquireMode::BlockTillLoaded).unwrap();
        // loadable=1, discardable=0 after load; refine moves one level over.
        mgr.apply_quality_transition(handle, true).unwrap();
        // now loadable=0, discardable=1: a further refine must fail, not
        // silently grow the ladder.
        assert!(mgr.apply_quality_transition(handle, true).is_err());
        mgr.shutdown();
    }

    #[test]
    fn reload_fires_subscribed_callback_exactly_once() {
        let mgr = manager();
        mgr.register_loader(Arc::new(EchoLoader));
        let handle: ResourceHandle<String> = mgr.load("EchoResource", "reload.png", "reload.png");
        mgr.acquire(handle, AcquireMode::BlockTillLoaded).unwrap();

        let fire_count = Arc::new(AtomicU32::new(0));
        let seen_index = Arc::new(AtomicU32::new(u32::MAX));
        let fc = fire_count.clone();
        let si = seen_index.clone();
        mgr.on_reload(handle, move |index| {
            fc.fetch_add(1, Ordering::SeqCst);
            si.store(index, Ordering::SeqCst);
        });

        mgr.reload(handle, true).unwrap();
        mgr.acquire(handle, AcquireMode::BlockTillLoaded).unwrap();

        assert_eq!(fire_count.load(Ordering::SeqCst), 1);
        assert_eq!(seen_index.load(Ordering::SeqCst), handle.index());
        mgr.shutdown();
    }

    #[test]
    fn reload_without_force_is_a_noop_before_first_load_completes() {
        let mgr = manager();
        mgr.register_loader(Arc::new(EchoLoader));
        let handle: ResourceHandle<String> = mgr.load("EchoResource", "pending.png", "pending.png");
        // Not yet loaded: a non-forced reload must not disturb the
        // in-flight first load.
        mgr.reload(handle, false).unwrap();
        let value = mgr.acquire(handle, AcquireMode::BlockTillLoaded).unwrap();
        assert_eq!(value, "pending.png");
        mgr.shutdown();
    }

    #[test]
    fn free_unused_reclaims_zero_refcount_slots() {
        let mgr = manager();
        mgr.register_loader(Arc::new(EchoLoader));
        let handle: ResourceHandle<String> = mgr.load("EchoResource", "temp.png", "temp.png");
        mgr.acquire(handle, AcquireMode::BlockTillLoaded).unwrap();
        mgr.decrease_ref_count(handle).unwrap();
        assert_eq!(mgr.free_unused(Duration::from_secs(1), u64::MAX), 1);
        mgr.shutdown();
    }

    #[test]
    fn allow_loading_fallback_serves_registered_fallback_before_load_completes() {
        let mgr = manager();
        mgr.register_loader(Arc::new(EchoLoader));
        let fallback: ResourceHandle<String> = mgr.load("EchoResource", "fallback.png", "fallback.png");
        mgr.acquire(fallback, AcquireMode::BlockTillLoaded).unwrap();

        let handle: ResourceHandle<String> = mgr.load("EchoResource", "slow.png", "slow.png");
        mgr.register_fallback(handle, fallback).unwrap();
        // Either the real load has already landed or the fallback is
        // served; both are valid non-blocking outcomes.
        let value = mgr.acquire(handle, AcquireMode::AllowLoadingFallback).unwrap();
        assert!(value == "slow.png" || value == "fallback.png");
        mgr.shutdown();
    }

    #[test]
    fn block_till_loaded_never_fail_falls_back_on_missing_resource() {
        let mgr = manager();
        mgr.register_loader(Arc::new(EchoLoader));
        mgr.register_loader(Arc::new(FailingLoader));
        let fallback: ResourceHandle<String> = mgr.load("EchoResource", "safe.png", "safe.png");
        mgr.acquire(fallback, AcquireMode::BlockTillLoaded).unwrap();

        let handle: ResourceHandle<String> = mgr.load("MissingResource", "broken.png", "broken.png");
        mgr.register_fallback(handle, fallback).unwrap();
        let value = mgr.acquire(handle, AcquireMode::BlockTillLoaded_NeverFail).unwrap();
        assert_eq!(value, "safe.png");
        mgr.shutdown();
    }

    #[test]
    fn pointer_only_without_fallback_reports_not_ready() {
        let mgr = manager();
        mgr.register_loader(Arc::new(EchoLoader));
        let handle: ResourceHandle<String> = mgr.load("EchoResource", "untouched.png", "untouched.png");
        // A fresh slot with no fallback and no time for the worker to
        // have run yet should report not-ready rather than blocking.
        let result = mgr.acquire(handle, AcquireMode::PointerOnly);
        if let Ok(value) = result {
            assert_eq!(value, "untouched.png");
        }
        mgr.shutdown();
    }
}
