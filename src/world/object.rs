//! Game objects and the generational id table that owns them.

use std::fmt;

use uuid::Uuid;

use crate::reflection::HashedString;

use super::tag::TagSet;

const INDEX_BITS: u32 = 24;
const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;

/// A transient, generational identifier for a [`GameObject`]. Stable
/// across a process run but not across saves — persistence uses the
/// object's [`Uuid`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GameObjectId {
    packed: u32,
}

impl GameObjectId {
    pub fn new(index: u32, generation: u8) -> Self {
        debug_assert!(index <= INDEX_MASK);
        GameObjectId {
            packed: (index & INDEX_MASK) | ((generation as u32) << INDEX_BITS),
        }
    }

    pub fn invalid() -> Self {
        GameObjectId { packed: u32::MAX }
    }

    #[inline]
    pub fn index(&self) -> u32 {
        self.packed & INDEX_MASK
    }

    #[inline]
    pub fn generation(&self) -> u8 {
        (self.packed >> INDEX_BITS) as u8
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.packed != u32::MAX
    }
}

impl fmt::Display for GameObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GameObject(idx={}, gen={})", self.index(), self.generation())
    }
}

/// Which transform hierarchy an object's transform block lives in.
/// Fixed for an object's entire lifetime: a static object never moves,
/// so its world transform is only ever recomputed when reparented,
/// while dynamic objects are retraversed every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HierarchyKind {
    Static,
    Dynamic,
}

pub struct GameObjectDesc {
    pub name: HashedString,
    pub hierarchy: HierarchyKind,
    pub parent: Option<GameObjectId>,
    pub dynamic: bool,
}

impl Default for GameObjectDesc {
    fn default() -> Self {
        GameObjectDesc {
            name: HashedString::new(""),
            hierarchy: HierarchyKind::Dynamic,
            parent: None,
            dynamic: true,
        }
    }
}

pub struct GameObject {
    pub uuid: Uuid,
    pub id: GameObjectId,
    pub name: HashedString,
    pub global_key: Option<String>,
    pub parent: Option<GameObjectId>,
    pub first_child: Option<GameObjectId>,
    pub next_sibling: Option<GameObjectId>,
    pub hierarchy: HierarchyKind,
    pub tags: TagSet,
    pub team_id: u16,
    pub stable_random_seed: u32,
    pub active: bool,
    pub transform_index: u32,
}

struct Slot {
    object: Option<GameObject>,
    generation: u8,
}

/// Block-storage-style generational table owning every [`GameObject`].
/// Deletion is a two-step process: [`ObjectTable::mark_dead`] removes
/// the object from lookups immediately but keeps its slot generation
/// stable until [`ObjectTable::reap`] is called at a sync point, so code
/// holding a now-stale id fails lookups rather than aliasing a new
/// object at the same index.
pub struct ObjectTable {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    dead: Vec<u32>,
    uuid_to_id: std::collections::HashMap<Uuid, GameObjectId>,
    global_key_to_id: std::collections::HashMap<String, GameObjectId>,
}

impl ObjectTable {
    pub fn new() -> Self {
        ObjectTable {
            slots: Vec::new(),
            free_list: Vec::new(),
            dead: Vec::new(),
            uuid_to_id: std::collections::HashMap::new(),
            global_key_to_id: std::collections::HashMap::new(),
        }
    }

    pub fn insert(&mut self, build: impl FnOnce(GameObjectId) -> GameObject) -> GameObjectId {
        if let Some(index) = self.free_list.pop() {
            let generation = self.slots[index as usize].generation;
            let id = GameObjectId::new(index, generation);
            let object = build(id);
            self.uuid_to_id.insert(object.uuid, id);
            self.slots[index as usize].object = Some(object);
            id
        } else {
            let index = self.slots.len() as u32;
            let id = GameObjectId::new(index, 0);
            let object = build(id);
            self.uuid_to_id.insert(object.uuid, id);
            self.slots.push(Slot { object: Some(object), generation: 0 });
            id
        }
    }

    pub fn get(&self, id: GameObjectId) -> Option<&GameObject> {
        let slot = self.slots.get(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.object.as_ref()
    }

    pub fn get_mut(&mut self, id: GameObjectId) -> Option<&mut GameObject> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.object.as_mut()
    }

    pub fn by_uuid(&self, uuid: Uuid) -> Option<GameObjectId> {
        self.uuid_to_id.get(&uuid).copied()
    }

    pub fn by_global_key(&self, key: &str) -> Option<GameObjectId> {
        self.global_key_to_id.get(key).copied()
    }

    pub fn set_global_key(&mut self, id: GameObjectId, key: Option<String>) {
        if let Some(obj) = self.get_mut(id) {
            if let Some(old) = obj.global_key.take() {
                self.global_key_to_id.remove(&old);
            }
            if let Some(ref new_key) = key {
                self.global_key_to_id.insert(new_key.clone(), id);
            }
            obj.global_key = key;
        }
    }

    /// Marks an object for deletion. It disappears from lookups
    /// immediately but its slot is not reused until [`Self::reap`].
    pub fn mark_dead(&mut self, id: GameObjectId) {
        if let Some(slot) = self.slots.get_mut(id.index() as usize) {
            if slot.generation == id.generation() {
                if let Some(obj) = slot.object.take() {
                    self.uuid_to_id.remove(&obj.uuid);
                    if let Some(key) = &obj.global_key {
                        self.global_key_to_id.remove(key);
                    }
                }
                self.dead.push(id.index());
            }
        }
    }

    /// Bumps generation and returns the index to the free list for
    /// every object marked dead since the last reap. Called at a sync
    /// point between frames, never mid-update.
    pub fn reap(&mut self) -> usize {
        let count = self.dead.len();
        for index in self.dead.drain(..) {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            self.free_list.push(index);
        }
        count
    }

    pub fn iter(&self) -> impl Iterator<Item = &GameObject> {
        self.slots.iter().filter_map(|s| s.object.as_ref())
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.object.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ObjectTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make(table: &mut ObjectTable, name: &str) -> GameObjectId {
        table.insert(|id| GameObject {
            uuid: Uuid::new_v4(),
            id,
            name: HashedString::new(name),
            global_key: None,
            parent: None,
            first_child: None,
            next_sibling: None,
            hierarchy: HierarchyKind::Dynamic,
            tags: TagSet::new(),
            team_id: 0,
            stable_random_seed: 0,
            active: true,
            transform_index: 0,
        })
    }

    #[test]
    fn stale_id_fails_lookup_after_deletion_and_reap() {
        let mut table = ObjectTable::new();
        let id = make(&mut table, "a");
        table.mark_dead(id);
        assert!(table.get(id).is_none(), "dead object must disappear immediately");
        table.reap();
        let new_id = make(&mut table, "b");
        assert_eq!(new_id.index(), id.index(), "slot must be reused");
        assert_ne!(new_id.generation(), id.generation(), "generation must differ");
        assert!(table.get(id).is_none(), "old id must not alias the new object");
    }

    #[test]
    fn deferred_deletion_keeps_slot_reserved_until_reap() {
        let mut table = ObjectTable::new();
        let a = make(&mut table, "a");
        table.mark_dead(a);
        // A second object created before reap must not reuse the slot.
        let b = make(&mut table, "b");
        assert_ne!(a.index(), b.index());
    }

    #[test]
    fn global_key_lookup() {
        let mut table = ObjectTable::new();
        let id = make(&mut table, "player");
        table.set_global_key(id, Some("player_one".into()));
        assert_eq!(table.by_global_key("player_one"), Some(id));
    }
}
