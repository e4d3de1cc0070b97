//! Compact, growable bitset over globally registered tags.
//!
//! Tags are registered once in a process-wide registry, which hands out
//! a stable index per name; a `TagSet` stores only the bits for indices
//! it actually uses, growing by whole 64-bit blocks and starting at the
//! first block that has a set bit (so two tags at far-apart indices,
//! e.g. 3 and 200, only cost the blocks in between that are actually
//! touched, not the full range).

use std::sync::{OnceLock, RwLock};

use smallvec::SmallVec;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag {
    pub name: String,
    pub index: u32,
}

#[derive(Default)]
struct Registry {
    by_name: std::collections::HashMap<String, u32>,
    names: Vec<String>,
}

/// The process-wide tag registry. `register` is idempotent: registering
/// the same name twice returns the same index both times.
pub struct TagRegistry {
    inner: RwLock<Registry>,
}

impl TagRegistry {
    fn new() -> Self {
        TagRegistry {
            inner: RwLock::new(Registry::default()),
        }
    }

    pub fn register(&self, name: &str) -> Tag {
        if let Some(&index) = self.inner.read().unwrap().by_name.get(name) {
            return Tag { name: name.to_string(), index };
        }
        let mut inner = self.inner.write().unwrap();
        if let Some(&index) = inner.by_name.get(name) {
            return Tag { name: name.to_string(), index };
        }
        let index = inner.names.len() as u32;
        inner.names.push(name.to_string());
        inner.by_name.insert(name.to_string(), index);
        Tag { name: name.to_string(), index }
    }

    pub fn find(&self, name: &str) -> Option<Tag> {
        self.inner
            .read()
            .unwrap()
            .by_name
            .get(name)
            .map(|&index| Tag { name: name.to_string(), index })
    }
}

static REGISTRY: OnceLock<TagRegistry> = OnceLock::new();

pub fn tag_registry() -> &'static TagRegistry {
    REGISTRY.get_or_init(TagRegistry::new)
}

/// A 64-bit-block bitset. `blocks[0]` holds the first nonempty block
/// encountered, recorded as `first_block_index`, so a set containing
/// only high tag indices doesn't allocate the unused low blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    first_block_index: u32,
    blocks: SmallVec<[u64; 2]>,
}

const BITS_PER_BLOCK: u32 = 64;

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn block_and_bit(index: u32) -> (u32, u32) {
        (index / BITS_PER_BLOCK, index % BITS_PER_BLOCK)
    }

    pub fn set(&mut self, tag: &Tag) {
        let (block, bit) = Self::block_and_bit(tag.index);
        if self.blocks.is_empty() {
            self.first_block_index = block;
            self.blocks.push(0);
        } else if block < self.first_block_index {
            let shift = (self.first_block_index - block) as usize;
            self.blocks.insert_from_slice(0, &vec![0u64; shift]);
            self.first_block_index = block;
        } else {
            let needed = (block - self.first_block_index) as usize + 1;
            if needed > self.blocks.len() {
                self.blocks.resize(needed, 0);
            }
        }
        let local = (block - self.first_block_index) as usize;
        self.blocks[local] |= 1u64 << bit;
    }

    pub fn remove(&mut self, tag: &Tag) {
        if self.blocks.is_empty() {
            return;
        }
        let (block, bit) = Self::block_and_bit(tag.index);
        if block < self.first_block_index {
            return;
        }
        let local = (block - self.first_block_index) as usize;
        if local >= self.blocks.len() {
            return;
        }
        self.blocks[local] &= !(1u64 << bit);
    }

    pub fn is_set(&self, tag: &Tag) -> bool {
        let (block, bit) = Self::block_and_bit(tag.index);
        if block < self.first_block_index {
            return false;
        }
        let local = (block - self.first_block_index) as usize;
        self.blocks.get(local).map(|b| (b >> bit) & 1 != 0).unwrap_or(false)
    }

    pub fn is_any_set(&self, other: &TagSet) -> bool {
        for (i, &block) in self.blocks.iter().enumerate() {
            let global = self.first_block_index + i as u32;
            if global < other.first_block_index {
                continue;
            }
            let other_local = (global - other.first_block_index) as usize;
            if let Some(&other_block) = other.blocks.get(other_local) {
                if block & other_block != 0 {
                    return true;
                }
            }
        }
        false
    }

    pub fn num_tags_set(&self) -> u32 {
        self.blocks.iter().map(|b| b.count_ones()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|&b| b == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distant_indices_are_both_representable() {
        let registry = tag_registry();
        let low = Tag { name: "low".into(), index: 3 };
        let high = Tag { name: "high".into(), index: 200 };
        let _ = registry;

        let mut set = TagSet::new();
        set.set(&low);
        set.set(&high);
        assert!(set.is_set(&low));
        assert!(set.is_set(&high));
        assert_eq!(set.num_tags_set(), 2);
    }

    #[test]
    fn boundary_indices_zero_and_255() {
        let zero = Tag { name: "zero".into(), index: 0 };
        let top = Tag { name: "top".into(), index: 255 };
        let mut set = TagSet::new();
        set.set(&zero);
        set.set(&top);
        assert!(set.is_set(&zero));
        assert!(set.is_set(&top));
    }

    #[test]
    fn remove_clears_bit_without_affecting_others() {
        let a = Tag { name: "a".into(), index: 10 };
        let b = Tag { name: "b".into(), index: 11 };
        let mut set = TagSet::new();
        set.set(&a);
        set.set(&b);
        set.remove(&a);
        assert!(!set.is_set(&a));
        assert!(set.is_set(&b));
    }

    #[test]
    fn is_any_set_detects_overlap_across_offset_sets() {
        let a = Tag { name: "a".into(), index: 5 };
        let b = Tag { name: "b".into(), index: 500 };
        let mut set1 = TagSet::new();
        set1.set(&a);
        let mut set2 = TagSet::new();
        set2.set(&b);
        set2.set(&a);
        assert!(set1.is_any_set(&set2));
    }

    #[test]
    fn registering_same_name_twice_yields_same_index() {
        let registry = tag_registry();
        let t1 = registry.register("world.test.unique-tag-name");
        let t2 = registry.register("world.test.unique-tag-name");
        assert_eq!(t1.index, t2.index);
    }
}
