//! Process-wide interned strings.
//!
//! `HashedString` owns both a string and its 64-bit hash, deduplicated
//! through a global table. Two `HashedString`s built from equal content
//! always end up pointing at the same table entry, so equality is a
//! hash/pointer compare rather than a byte compare. `TempHashedString`
//! carries only the hash and is meant for hot-path lookups where owning
//! the string is unnecessary; it never allocates and never touches the
//! table, but can theoretically collide.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use xxhash_rust::xxh3::xxh3_64;

struct InternedEntry {
    value: Box<str>,
}

/// The backing table. A `DashMap` gives us sharded locking instead of the
/// single `nsMap` the original relies on for pointer stability; we get
/// the same stability guarantee because entries are heap-allocated once
/// behind an `Arc` and never moved afterward, only inserted or swept.
static TABLE: OnceLock<DashMap<u64, Arc<InternedEntry>>> = OnceLock::new();

fn table() -> &'static DashMap<u64, Arc<InternedEntry>> {
    TABLE.get_or_init(DashMap::new)
}

/// An interned, reference-counted string plus its hash. Liveness is
/// tracked purely through `Arc::strong_count` on the table's own copy of
/// the entry — every live `HashedString` holds a clone of that `Arc`, so
/// `#[derive(Clone)]`/`Drop` on the `Arc` already keep the count correct
/// with no separate counter to keep in sync.
#[derive(Clone)]
pub struct HashedString {
    hash: u64,
    entry: Arc<InternedEntry>,
}

impl HashedString {
    /// Interns `s`, creating a new table entry if this content hasn't
    /// been seen before, or cloning the existing entry's `Arc`.
    pub fn new(s: impl AsRef<str>) -> Self {
        let s = s.as_ref();
        let hash = xxh3_64(s.as_bytes());
        let entry = table()
            .entry(hash)
            .or_insert_with(|| Arc::new(InternedEntry { value: s.into() }))
            .clone();
        HashedString { hash, entry }
    }

    #[inline]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.entry.value
    }

    pub fn to_temp(&self) -> TempHashedString {
        TempHashedString { hash: self.hash }
    }

    /// Sweeps table entries with no remaining external reference.
    /// Surviving entries are never relocated, so any `TempHashedString`
    /// captured before a sweep stays a valid lookup key after it. An
    /// entry's only reference once no `HashedString` holds it is the
    /// table's own, so `strong_count() <= 1` is exactly "unused".
    pub fn clear_unused() -> usize {
        let t = table();
        let dead: Vec<u64> = t
            .iter()
            .filter(|kv| Arc::strong_count(kv.value()) <= 1)
            .map(|kv| *kv.key())
            .collect();
        for hash in &dead {
            // Re-check under removal: another thread may have interned
            // (and thus re-referenced) this hash between the scan above
            // and this remove.
            t.remove_if(hash, |_, v| Arc::strong_count(v) <= 1);
        }
        dead.len()
    }
}

impl PartialEq for HashedString {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}
impl Eq for HashedString {}

impl Hash for HashedString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl fmt::Debug for HashedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashedString({:?})", self.as_str())
    }
}

impl fmt::Display for HashedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bare 64-bit hash used for comparisons against a `HashedString`
/// without needing the owning string. Equality is hash-only: two
/// different strings that collide will compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TempHashedString {
    hash: u64,
}

impl TempHashedString {
    pub fn new(s: impl AsRef<str>) -> Self {
        TempHashedString {
            hash: xxh3_64(s.as_ref().as_bytes()),
        }
    }

    /// Builds a `TempHashedString` from an already-computed hash, used
    /// when deserializing one without re-hashing anything.
    #[inline]
    pub fn from_hash(hash: u64) -> Self {
        TempHashedString { hash }
    }

    #[inline]
    pub fn hash(&self) -> u64 {
        self.hash
    }
}

impl PartialEq<HashedString> for TempHashedString {
    fn eq(&self, other: &HashedString) -> bool {
        self.hash == other.hash
    }
}

impl PartialEq<TempHashedString> for HashedString {
    fn eq(&self, other: &TempHashedString) -> bool {
        self.hash == other.hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_content_shares_hash() {
        let a = HashedString::new("entity.position");
        let b = HashedString::new("entity.position");
        assert_eq!(a, b);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn temp_compares_by_hash_only() {
        let a = HashedString::new("foo");
        let t = TempHashedString::new("foo");
        assert_eq!(t, a);
    }

    #[test]
    fn clear_unused_does_not_invalidate_live_entries() {
        let kept = HashedString::new("kept.alive");
        {
            let _temp = HashedString::new("transient.value");
        }
        HashedString::clear_unused();
        let again = HashedString::new("kept.alive");
        assert_eq!(kept, again);
    }
}
