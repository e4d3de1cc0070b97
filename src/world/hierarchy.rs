//! Transform storage and propagation.
//!
//! Every object's transform lives in a double-buffered block: readers
//! (in particular `Async`-phase update functions, which must not race
//! the writer) always see the last fully-committed global matrix, while
//! the traversal that recomputes transforms this frame writes into the
//! other buffer and only flips the read side once the whole subtree is
//! done. `HierarchyKind` is orthogonal to double-buffering: it decides
//! *how often* an object's subtree gets retraversed at all (`Dynamic`
//! every frame, `Static` only after an explicit reparent/move).

use glam::{Mat4, Quat, Vec3};

use super::object::{GameObjectId, HierarchyKind, ObjectTable};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Transform {
    pub fn identity() -> Self {
        Transform {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }

    pub fn to_matrix(self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

struct TransformBlock {
    local: Transform,
    global: [Mat4; 2],
    current: u8,
    dirty: bool,
    last_update: u32,
}

impl TransformBlock {
    fn new() -> Self {
        TransformBlock {
            local: Transform::identity(),
            global: [Mat4::IDENTITY; 2],
            current: 0,
            dirty: true,
            last_update: 0,
        }
    }

    fn read(&self) -> Mat4 {
        self.global[self.current as usize]
    }

    /// Writes `value` into the back buffer and flips it to the front,
    /// so a concurrent reader either sees the old or the new value in
    /// full, never a half-written matrix.
    fn commit(&mut self, value: Mat4, update_counter: u32) {
        let back = 1 - self.current;
        self.global[back as usize] = value;
        self.current = back;
        self.last_update = update_counter;
        self.dirty = false;
    }
}

/// Owns the transform blocks for one hierarchy kind (`Static` or
/// `Dynamic`); an object's `transform_index` is only meaningful within
/// the hierarchy matching its `HierarchyKind`.
pub struct TransformHierarchy {
    blocks: Vec<TransformBlock>,
    free_list: Vec<u32>,
}

impl TransformHierarchy {
    pub fn new() -> Self {
        TransformHierarchy {
            blocks: Vec::new(),
            free_list: Vec::new(),
        }
    }

    pub fn allocate(&mut self) -> u32 {
        if let Some(index) = self.free_list.pop() {
            self.blocks[index as usize] = TransformBlock::new();
            index
        } else {
            let index = self.blocks.len() as u32;
            self.blocks.push(TransformBlock::new());
            index
        }
    }

    pub fn free(&mut self, index: u32) {
        self.free_list.push(index);
    }

    pub fn set_local(&mut self, index: u32, local: Transform) {
        if let Some(block) = self.blocks.get_mut(index as usize) {
            block.local = local;
            block.dirty = true;
        }
    }

    pub fn local(&self, index: u32) -> Transform {
        self.blocks[index as usize].local
    }

    pub fn global_matrix(&self, index: u32) -> Mat4 {
        self.blocks[index as usize].read()
    }

    pub fn last_update(&self, index: u32) -> u32 {
        self.blocks[index as usize].last_update
    }
}

impl Default for TransformHierarchy {
    fn default() -> Self {
        Self::new()
    }
}

/// Recomputes every dirty subtree's global transform: `global =
/// parent_global * local` for a child, `global = local` for a root.
/// Traverses depth-first from every parentless object via the
/// `first_child`/`next_sibling` links, matching each object's
/// `HierarchyKind` against `hierarchy`. Bumps `update_counter` once per
/// call; every touched block's `last_update` is stamped with the new
/// value so staleness is detectable without a full retraversal.
pub fn update_transforms(
    objects: &ObjectTable,
    hierarchy_kind: HierarchyKind,
    hierarchy: &mut TransformHierarchy,
    update_counter: &mut u32,
) {
    *update_counter += 1;
    let counter = *update_counter;

    let roots: Vec<GameObjectId> = objects
        .iter()
        .filter(|o| o.hierarchy == hierarchy_kind && o.parent.is_none())
        .map(|o| o.id)
        .collect();

    let mut stack: Vec<(GameObjectId, Mat4)> = roots.into_iter().map(|id| (id, Mat4::IDENTITY)).collect();

    while let Some((id, parent_global)) = stack.pop() {
        let Some(object) = objects.get(id) else { continue };
        if object.hierarchy != hierarchy_kind {
            continue;
        }
        let local_matrix = hierarchy.local(object.transform_index).to_matrix();
        let global = if object.parent.is_some() {
            parent_global * local_matrix
        } else {
            local_matrix
        };
        hierarchy.blocks[object.transform_index as usize].commit(global, counter);

        let mut child = object.first_child;
        while let Some(child_id) = child {
            let Some(child_obj) = objects.get(child_id) else { break };
            stack.push((child_id, global));
            child = child_obj.next_sibling;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflection::HashedString;
    use uuid::Uuid;

    fn spawn_object(objects: &mut ObjectTable, hierarchy: &mut TransformHierarchy, parent: Option<GameObjectId>, local: Transform) -> GameObjectId {
        let transform_index = hierarchy.allocate();
        let id = objects.insert(|id| crate::world::object::GameObject {
            uuid: Uuid::new_v4(),
            id,
            name: HashedString::new("obj"),
            global_key: None,
            parent,
            first_child: None,
            next_sibling: None,
            hierarchy: HierarchyKind::Dynamic,
            tags: super::super::tag::TagSet::new(),
            team_id: 0,
            stable_random_seed: 0,
            active: true,
            transform_index,
        });
        hierarchy.set_local(transform_index, local);
        if let Some(parent_id) = parent {
            let parent_obj = objects.get_mut(parent_id).unwrap();
            if parent_obj.first_child.is_none() {
                parent_obj.first_child = Some(id);
            } else {
                let mut sibling = parent_obj.first_child.unwrap();
                loop {
                    let next = objects.get(sibling).unwrap().next_sibling;
                    match next {
                        Some(n) => sibling = n,
                        None => break,
                    }
                }
                objects.get_mut(sibling).unwrap().next_sibling = Some(id);
            }
        }
        id
    }

    #[test]
    fn child_global_combines_parent_and_local() {
        let mut objects = ObjectTable::new();
        let mut hierarchy = TransformHierarchy::new();
        let mut counter = 0u32;

        let parent_local = Transform {
            translation: Vec3::new(10.0, 0.0, 0.0),
            ..Transform::identity()
        };
        let parent = spawn_object(&mut objects, &mut hierarchy, None, parent_local);

        let child_local = Transform {
            translation: Vec3::new(1.0, 0.0, 0.0),
            ..Transform::identity()
        };
        let child = spawn_object(&mut objects, &mut hierarchy, Some(parent), child_local);

        update_transforms(&objects, HierarchyKind::Dynamic, &mut hierarchy, &mut counter);

        let parent_transform_index = objects.get(parent).unwrap().transform_index;
        let child_transform_index = objects.get(child).unwrap().transform_index;

        let parent_global = hierarchy.global_matrix(parent_transform_index);
        let child_global = hierarchy.global_matrix(child_transform_index);

        assert_eq!(parent_global.transform_point3(Vec3::ZERO), Vec3::new(10.0, 0.0, 0.0));
        assert_eq!(child_global.transform_point3(Vec3::ZERO), Vec3::new(11.0, 0.0, 0.0));
    }

    #[test]
    fn update_counter_stamps_every_touched_block() {
        let mut objects = ObjectTable::new();
        let mut hierarchy = TransformHierarchy::new();
        let mut counter = 0u32;
        let root = spawn_object(&mut objects, &mut hierarchy, None, Transform::identity());
        update_transforms(&objects, HierarchyKind::Dynamic, &mut hierarchy, &mut counter);
        let idx = objects.get(root).unwrap().transform_index;
        assert_eq!(hierarchy.last_update(idx), 1);
    }
}
