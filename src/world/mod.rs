//! The World: game object storage, component managers, the message
//! bus, the update scheduler and read/write markers, tied together.

pub mod component;
pub mod hierarchy;
pub mod markers;
pub mod message;
pub mod object;
pub mod scheduler;
pub mod tag;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::error::{Result, WorldError};
use crate::reflection::{HashedString, Variant};
use crate::resource::{ResourceHandle, ResourceManager};

pub use component::{Component, ComponentId, ComponentManager, ComponentMode, ComponentRecord, DispatchOverride, MessageOutcome};
pub use hierarchy::{Transform, TransformHierarchy};
pub use markers::{MarkerState, ReadMarker, WriteMarker};
pub use message::{Message, MessageBus, MessageQueueType, MessageTarget};
pub use object::{GameObject, GameObjectDesc, GameObjectId, HierarchyKind, ObjectTable};
pub use scheduler::{InitBatch, Phase, RegisteredUpdateFunction, Scheduler, UpdateContext};
pub use tag::{Tag, TagSet};

/// Context passed to a component's registered reload handler, built
/// fresh for each handler invocation rather than stored.
pub struct ReloadContext<'a> {
    pub world: &'a World,
    pub component: ComponentId,
    pub user_data: Variant,
}

type ReloadHandler = Box<dyn Fn(&ReloadContext) + Send + Sync>;

struct ReloadRegistration {
    component: ComponentId,
    user_data: Variant,
    handler: ReloadHandler,
}

/// A single, self-contained simulation: objects, their components, the
/// message bus, the scheduler, and the read/write markers guarding
/// structural mutation. One `World` per loaded scene/level.
pub struct World {
    pub name: String,
    objects: ObjectTable,
    static_hierarchy: TransformHierarchy,
    dynamic_hierarchy: TransformHierarchy,
    static_update_counter: u32,
    dynamic_update_counter: u32,
    component_managers: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    destroy_hooks: Vec<Box<dyn Fn(&mut HashMap<TypeId, Box<dyn Any + Send + Sync>>, GameObjectId) + Send + Sync>>,
    messages: MessageBus,
    scheduler: Scheduler,
    markers: MarkerState,
    is_simulating: bool,
    reload_registrations: Arc<Mutex<HashMap<u32, Vec<ReloadRegistration>>>>,
    pending_reloads: Arc<Mutex<Vec<u32>>>,
}

impl World {
    pub fn new(name: impl Into<String>) -> Self {
        World {
            name: name.into(),
            objects: ObjectTable::new(),
            static_hierarchy: TransformHierarchy::new(),
            dynamic_hierarchy: TransformHierarchy::new(),
            static_update_counter: 0,
            dynamic_update_counter: 0,
            component_managers: HashMap::new(),
            destroy_hooks: Vec::new(),
            messages: MessageBus::new(),
            scheduler: Scheduler::new(),
            markers: MarkerState::new(),
            is_simulating: false,
            reload_registrations: Arc::new(Mutex::new(HashMap::new())),
            pending_reloads: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn objects(&self) -> &ObjectTable {
        &self.objects
    }

    pub fn hierarchy(&self, kind: HierarchyKind) -> &TransformHierarchy {
        match kind {
            HierarchyKind::Static => &self.static_hierarchy,
            HierarchyKind::Dynamic => &self.dynamic_hierarchy,
        }
    }

    pub fn messages(&mut self) -> &mut MessageBus {
        &mut self.messages
    }

    pub fn scheduler(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub fn acquire_read(&self) -> Result<ReadMarker<'_>> {
        self.markers.acquire_read()
    }

    pub fn acquire_write(&self) -> Result<WriteMarker<'_>> {
        self.markers.acquire_write()
    }

    pub fn spawn(&mut self, desc: GameObjectDesc) -> Result<GameObjectId> {
        let _write = self.markers.acquire_write()?;
        let hierarchy = match desc.hierarchy {
            HierarchyKind::Static => &mut self.static_hierarchy,
            HierarchyKind::Dynamic => &mut self.dynamic_hierarchy,
        };
        let transform_index = hierarchy.allocate();
        let parent = desc.parent;
        let id = self.objects.insert(|id| GameObject {
            uuid: Uuid::new_v4(),
            id,
            name: desc.name,
            global_key: None,
            parent,
            first_child: None,
            next_sibling: None,
            hierarchy: desc.hierarchy,
            tags: TagSet::new(),
            team_id: 0,
            stable_random_seed: rand::random(),
            active: true,
            transform_index,
        });
        if let Some(parent_id) = parent {
            self.link_child(parent_id, id)?;
        }
        Ok(id)
    }

    fn link_child(&mut self, parent: GameObjectId, child: GameObjectId) -> Result<()> {
        let parent_obj = self
            .objects
            .get_mut(parent)
            .ok_or_else(|| WorldError::UseAfterFree(parent.to_string()))?;
        match parent_obj.first_child {
            None => parent_obj.first_child = Some(child),
            Some(mut sibling) => loop {
                let next = self.objects.get(sibling).map(|o| o.next_sibling).flatten();
                match next {
                    Some(next_id) => sibling = next_id,
                    None => {
                        self.objects.get_mut(sibling).unwrap().next_sibling = Some(child);
                        break;
                    }
                }
            },
        }
        Ok(())
    }

    /// Marks an object for deletion; the slot is not reused until the
    /// next [`World::flush_deletions`] call. Every component the object
    /// still owns is torn down right here, before the object disappears
    /// from lookups: `on_deactivated` runs first, then `on_deinitialize`,
    /// each exactly once.
    pub fn destroy(&mut self, id: GameObjectId) -> Result<()> {
        let _write = self.markers.acquire_write()?;
        for hook in &self.destroy_hooks {
            hook(&mut self.component_managers, id);
        }
        self.objects.mark_dead(id);
        Ok(())
    }

    /// Reaps every object marked dead since the last call. Called at a
    /// scheduler phase boundary, never mid-update.
    pub fn flush_deletions(&mut self) -> usize {
        self.objects.reap()
    }

    pub fn update_transforms(&mut self, kind: HierarchyKind) {
        let counter = match kind {
            HierarchyKind::Static => &mut self.static_update_counter,
            HierarchyKind::Dynamic => &mut self.dynamic_update_counter,
        };
        let hierarchy = match kind {
            HierarchyKind::Static => &mut self.static_hierarchy,
            HierarchyKind::Dynamic => &mut self.dynamic_hierarchy,
        };
        hierarchy::update_transforms(&self.objects, kind, hierarchy, counter);
    }

    pub fn component_manager<T: Component>(&mut self) -> &mut ComponentManager<T> {
        if !self.component_managers.contains_key(&TypeId::of::<T>()) {
            self.destroy_hooks.push(Box::new(|managers, owner| {
                if let Some(mgr) = managers
                    .get_mut(&TypeId::of::<T>())
                    .and_then(|b| b.downcast_mut::<ComponentManager<T>>())
                {
                    mgr.on_object_destroyed(owner);
                }
            }));
        }
        self.component_managers
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(ComponentManager::<T>::new()))
            .downcast_mut::<ComponentManager<T>>()
            .expect("component manager type mismatch")
    }

    pub fn component_manager_ref<T: Component>(&self) -> Option<&ComponentManager<T>> {
        self.component_managers
            .get(&TypeId::of::<T>())
            .and_then(|b| b.downcast_ref::<ComponentManager<T>>())
    }

    pub fn set_simulating(&mut self, simulating: bool) {
        self.is_simulating = simulating;
    }

    pub fn is_simulating(&self) -> bool {
        self.is_simulating
    }

    /// Registers `handler` to run whenever `handle`'s content is
    /// reloaded. `manager` is told to notify this world's queue; the
    /// handler itself only runs once [`World::dispatch_reloads`] is
    /// called, matching the "invoked between update phases" timing.
    pub fn register_resource_reload<T: Send + Sync + 'static>(
        &self,
        manager: &ResourceManager,
        handle: ResourceHandle<T>,
        component: ComponentId,
        user_data: Variant,
        handler: impl Fn(&ReloadContext) + Send + Sync + 'static,
    ) {
        let index = handle.index();
        self.reload_registrations
            .lock()
            .unwrap()
            .entry(index)
            .or_default()
            .push(ReloadRegistration { component, user_data, handler: Box::new(handler) });

        let pending = self.pending_reloads.clone();
        manager.on_reload(handle, move |idx| {
            pending.lock().unwrap().push(idx);
        });
    }

    /// Runs every reload handler queued since the last call. Intended
    /// to be invoked between scheduler phases.
    pub fn dispatch_reloads(&self) {
        let indices: Vec<u32> = std::mem::take(&mut *self.pending_reloads.lock().unwrap());
        let registrations = self.reload_registrations.lock().unwrap();
        for index in indices {
            if let Some(regs) = registrations.get(&index) {
                for reg in regs {
                    let ctx = ReloadContext {
                        world: self,
                        component: reg.component,
                        user_data: reg.user_data.clone(),
                    };
                    (reg.handler)(&ctx);
                }
            }
        }
    }

    pub fn register_tag(&self, name: &str) -> Tag {
        tag::tag_registry().register(name)
    }

    pub fn set_global_key(&mut self, id: GameObjectId, key: Option<&str>) {
        self.objects.set_global_key(id, key.map(|k| k.to_string()));
    }

    pub fn find_by_global_key(&self, key: &str) -> Option<GameObjectId> {
        self.objects.by_global_key(key)
    }

    pub fn find_by_name(&self, name: &str) -> Option<GameObjectId> {
        let needle = HashedString::new(name);
        self.objects.iter().find(|o| o.name == needle).map(|o| o.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::ManualClock;
    use crate::resource::{AcquireMode, LoadedContent, ResourceLoader, ResourceManagerConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;

    #[test]
    fn empty_world_round_trips_structurally() {
        let mut world = World::new("test");
        let id = world.spawn(GameObjectDesc::default()).unwrap();
        world.destroy(id).unwrap();
        assert!(world.objects().get(id).is_none());
        let reaped = world.flush_deletions();
        assert_eq!(reaped, 1);
    }

    #[test]
    fn spawning_with_parent_links_first_child() {
        let mut world = World::new("test");
        let parent = world.spawn(GameObjectDesc::default()).unwrap();
        let child = world
            .spawn(GameObjectDesc { parent: Some(parent), ..GameObjectDesc::default() })
            .unwrap();
        assert_eq!(world.objects().get(parent).unwrap().first_child, Some(child));
    }

    struct Counter {
        deactivated: StdArc<AtomicUsize>,
        deinitialized: StdArc<AtomicUsize>,
    }
    impl Component for Counter {
        fn on_deactivated(&mut self) {
            self.deactivated.fetch_add(1, Ordering::SeqCst);
        }
        fn on_deinitialize(&mut self) {
            // Deactivation must already be visible by the time teardown
            // runs, proving the two hooks fire in order.
            assert_eq!(self.deactivated.load(Ordering::SeqCst), 1);
            self.deinitialized.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn destroying_object_deinitializes_its_component_exactly_once() {
        let mut world = World::new("test");
        let id = world.spawn(GameObjectDesc::default()).unwrap();
        let deactivated = StdArc::new(AtomicUsize::new(0));
        let deinitialized = StdArc::new(AtomicUsize::new(0));
        world.component_manager::<Counter>().add(
            id,
            ComponentMode::Dynamic,
            Counter { deactivated: deactivated.clone(), deinitialized: deinitialized.clone() },
        );

        world.destroy(id).unwrap();
        assert_eq!(deactivated.load(Ordering::SeqCst), 1);
        assert_eq!(deinitialized.load(Ordering::SeqCst), 1);
        world.flush_deletions();
        assert_eq!(deactivated.load(Ordering::SeqCst), 1, "on_deactivated must run exactly once");
        assert_eq!(deinitialized.load(Ordering::SeqCst), 1, "on_deinitialize must run exactly once");
    }

    struct EchoLoader;
    impl ResourceLoader for EchoLoader {
        fn type_name(&self) -> &'static str {
            "i32"
        }

        fn load(&self, _unique_id: &str, _description: &str) -> std::result::Result<LoadedContent, String> {
            Ok(LoadedContent {
                payload: Box::new(42i32),
                quality_levels_loadable: 0,
                quality_levels_discardable: 1,
                memory_usage: Default::default(),
            })
        }
    }

    #[test]
    fn resource_reload_dispatches_to_registered_component_handler() {
        let clock: StdArc<dyn crate::external::Clock> = StdArc::new(ManualClock::new());
        let manager = ResourceManager::new(ResourceManagerConfig::default(), clock);
        manager.register_loader(StdArc::new(EchoLoader));
        let handle = manager.load::<i32>("i32", "thing", "");
        let _ = manager.acquire::<i32>(handle, AcquireMode::BlockTillLoaded).unwrap();

        let world = World::new("test");
        let fired = StdArc::new(AtomicUsize::new(0));
        let f = fired.clone();
        world.register_resource_reload(&manager, handle, ComponentId::new(0, 0), Variant::Invalid, move |_ctx| {
            f.fetch_add(1, Ordering::SeqCst);
        });

        manager.reload(handle, true).unwrap();
        let _ = manager.acquire::<i32>(handle, AcquireMode::BlockTillLoaded).unwrap();
        world.dispatch_reloads();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
