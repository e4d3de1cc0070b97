//! Blackboards: simple named-value stores shared between components,
//! scripts and tools. Globals are created on demand and keyed by name in
//! a process-wide registry; locals are owned directly by whatever holds
//! them (typically a `World`).

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use bitflags::bitflags;

use crate::error::{BlackboardError, Result};
use crate::reflection::{HashedString, Variant};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u16 {
        const SAVE = 1 << 0;
        const ON_CHANGE_EVENT = 1 << 1;
        const USER_FLAG_0 = 1 << 2;
        const USER_FLAG_1 = 1 << 3;
        const USER_FLAG_2 = 1 << 4;
        const USER_FLAG_3 = 1 << 5;
        const USER_FLAG_4 = 1 << 6;
        const USER_FLAG_5 = 1 << 7;
        const USER_FLAG_6 = 1 << 8;
        const USER_FLAG_7 = 1 << 9;
        const INVALID = 1 << 15;
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Variant,
    pub flags: EntryFlags,
    pub change_counter: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryEvent {
    ValueChanged,
    FlagsChanged,
    EntryRemoved,
}

type EntryListener = Box<dyn Fn(&str, EntryEvent) + Send + Sync>;

/// A named collection of entries with per-entry change tracking and a
/// single board-wide change counter that advances on every mutation.
pub struct Blackboard {
    name: String,
    entries: HashMap<String, Entry>,
    change_counter: u32,
    listeners: Vec<EntryListener>,
}

impl Blackboard {
    pub fn new(name: impl Into<String>) -> Self {
        Blackboard {
            name: name.into(),
            entries: HashMap::new(),
            change_counter: 0,
            listeners: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn on_entry_event(&mut self, listener: impl Fn(&str, EntryEvent) + Send + Sync + 'static) {
        self.listeners.push(Box::new(listener));
    }

    fn fire(&self, name: &str, event: EntryEvent) {
        for listener in &self.listeners {
            listener(name, event);
        }
    }

    pub fn has_entry(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn set_entry_value(&mut self, name: &str, value: Variant, default_flags: EntryFlags) {
        match self.entries.get_mut(name) {
            Some(entry) => {
                let changed = entry.value != value;
                entry.value = value;
                if changed {
                    entry.change_counter += 1;
                    self.change_counter += 1;
                    if entry.flags.contains(EntryFlags::ON_CHANGE_EVENT) {
                        self.fire(name, EntryEvent::ValueChanged);
                    }
                }
            }
            None => {
                self.entries.insert(
                    name.to_string(),
                    Entry { value, flags: default_flags, change_counter: 0 },
                );
                self.change_counter += 1;
            }
        }
    }

    pub fn get_entry(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name)
    }

    pub fn get_entry_value(&self, name: &str) -> Result<Variant> {
        self.entries
            .get(name)
            .map(|e| e.value.clone())
            .ok_or_else(|| BlackboardError::UnknownEntry(name.to_string()).into())
    }

    pub fn get_entry_flags(&self, name: &str) -> Result<EntryFlags> {
        self.entries
            .get(name)
            .map(|e| e.flags)
            .ok_or_else(|| BlackboardError::UnknownEntry(name.to_string()).into())
    }

    pub fn set_entry_flags(&mut self, name: &str, flags: EntryFlags) -> Result<()> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| BlackboardError::UnknownEntry(name.to_string()))?;
        if entry.flags != flags {
            entry.flags = flags;
            self.fire(name, EntryEvent::FlagsChanged);
        }
        Ok(())
    }

    pub fn remove_entry(&mut self, name: &str) -> Result<()> {
        self.entries
            .remove(name)
            .ok_or_else(|| BlackboardError::UnknownEntry(name.to_string()))?;
        self.change_counter += 1;
        self.fire(name, EntryEvent::EntryRemoved);
        Ok(())
    }

    pub fn remove_all_entries(&mut self) {
        let names: Vec<String> = self.entries.keys().cloned().collect();
        self.entries.clear();
        for name in names {
            self.change_counter += 1;
            self.fire(&name, EntryEvent::EntryRemoved);
        }
    }

    pub fn increment_entry_value(&mut self, name: &str, amount: f64) -> Result<()> {
        self.nudge_entry(name, amount)
    }

    pub fn decrement_entry_value(&mut self, name: &str, amount: f64) -> Result<()> {
        self.nudge_entry(name, -amount)
    }

    fn nudge_entry(&mut self, name: &str, delta: f64) -> Result<()> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| BlackboardError::UnknownEntry(name.to_string()))?;
        let current = entry
            .value
            .as_f64()
            .ok_or_else(|| BlackboardError::NotNumeric(name.to_string()))?;
        let updated = entry.value.with_f64(current + delta).expect("numeric variant converts back");
        let changed = entry.value != updated;
        entry.value = updated;
        if changed {
            entry.change_counter += 1;
            self.change_counter += 1;
            if entry.flags.contains(EntryFlags::ON_CHANGE_EVENT) {
                self.fire(name, EntryEvent::ValueChanged);
            }
        }
        Ok(())
    }

    pub fn all_entries(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn change_counter(&self) -> u32 {
        self.change_counter
    }

    pub fn entry_change_counter(&self, name: &str) -> Result<u32> {
        self.entries
            .get(name)
            .map(|e| e.change_counter)
            .ok_or_else(|| BlackboardError::UnknownEntry(name.to_string()).into())
    }
}

static GLOBAL_BOARDS: OnceLock<RwLock<HashMap<u64, Arc<RwLock<Blackboard>>>>> = OnceLock::new();

fn global_boards() -> &'static RwLock<HashMap<u64, Arc<RwLock<Blackboard>>>> {
    GLOBAL_BOARDS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Finds or creates the process-wide global blackboard keyed by `name`.
pub fn get_or_create_global(name: &str) -> Arc<RwLock<Blackboard>> {
    let key = HashedString::new(name).hash();
    if let Some(existing) = global_boards().read().unwrap().get(&key) {
        return existing.clone();
    }
    let mut boards = global_boards().write().unwrap();
    boards
        .entry(key)
        .or_insert_with(|| Arc::new(RwLock::new(Blackboard::new(name))))
        .clone()
}

pub fn find_global(name: &str) -> Option<Arc<RwLock<Blackboard>>> {
    let key = HashedString::new(name).hash();
    global_boards().read().unwrap().get(&key).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_changed_fires_only_on_distinct_value_with_flag_set() {
        let fired = Arc::new(std::sync::Mutex::new(0));
        let mut board = Blackboard::new("test");
        board.set_entry_value("hp", Variant::Int32(100), EntryFlags::ON_CHANGE_EVENT);
        let f = fired.clone();
        board.on_entry_event(move |_, event| {
            if event == EntryEvent::ValueChanged {
                *f.lock().unwrap() += 1;
            }
        });

        board.set_entry_value("hp", Variant::Int32(100), EntryFlags::ON_CHANGE_EVENT);
        assert_eq!(*fired.lock().unwrap(), 0, "same value must not fire");

        board.set_entry_value("hp", Variant::Int32(90), EntryFlags::ON_CHANGE_EVENT);
        assert_eq!(*fired.lock().unwrap(), 1);
    }

    #[test]
    fn value_changed_does_not_fire_without_flag() {
        let fired = Arc::new(std::sync::Mutex::new(0));
        let mut board = Blackboard::new("test");
        board.set_entry_value("hp", Variant::Int32(100), EntryFlags::empty());
        let f = fired.clone();
        board.on_entry_event(move |_, _| *f.lock().unwrap() += 1);
        board.set_entry_value("hp", Variant::Int32(50), EntryFlags::empty());
        assert_eq!(*fired.lock().unwrap(), 0);
    }

    #[test]
    fn increment_and_decrement_preserve_numeric_type() {
        let mut board = Blackboard::new("test");
        board.set_entry_value("score", Variant::Int32(10), EntryFlags::empty());
        board.increment_entry_value("score", 5.0).unwrap();
        assert_eq!(board.get_entry_value("score").unwrap(), Variant::Int32(15));
        board.decrement_entry_value("score", 3.0).unwrap();
        assert_eq!(board.get_entry_value("score").unwrap(), Variant::Int32(12));
    }

    #[test]
    fn increment_on_non_numeric_entry_fails() {
        let mut board = Blackboard::new("test");
        board.set_entry_value("name", Variant::String("x".into()), EntryFlags::empty());
        assert!(board.increment_entry_value("name", 1.0).is_err());
    }

    #[test]
    fn global_lookup_returns_same_instance_for_same_name() {
        let a = get_or_create_global("world.test.shared-board");
        let b = find_global("world.test.shared-board").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn remove_entry_fails_on_unknown_name() {
        let mut board = Blackboard::new("test");
        assert!(board.remove_entry("missing").is_err());
    }

    #[test]
    fn removing_an_entry_bumps_the_blackboard_change_counter() {
        let mut board = Blackboard::new("test");
        board.set_entry_value("hp", Variant::Int32(10), EntryFlags::empty());
        let before = board.change_counter();
        board.remove_entry("hp").unwrap();
        assert!(board.change_counter() > before);
    }

    #[test]
    fn remove_all_entries_bumps_the_change_counter_per_entry() {
        let mut board = Blackboard::new("test");
        board.set_entry_value("a", Variant::Int32(1), EntryFlags::empty());
        board.set_entry_value("b", Variant::Int32(2), EntryFlags::empty());
        let before = board.change_counter();
        board.remove_all_entries();
        assert_eq!(board.change_counter(), before + 2);
    }
}
