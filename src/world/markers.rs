//! Read/write locking for world structure.
//!
//! `Async`-phase update functions run under a [`ReadMarker`] and must
//! not mutate object/component structure; everything else (spawning,
//! deleting, reparenting) runs under a [`WriteMarker`]. The write marker
//! is re-entrant on the thread that holds it (a component's update
//! function may itself trigger nested structural changes) but refuses
//! to acquire while any reader is active.

use std::thread::ThreadId;

use parking_lot::Mutex;

use crate::error::{Result, WorldError};

struct State {
    write_thread: Option<ThreadId>,
    write_count: u32,
    read_count: u32,
}

/// Owns the world's read/write counters. One instance per `World`.
pub struct MarkerState {
    inner: Mutex<State>,
}

impl MarkerState {
    pub fn new() -> Self {
        MarkerState {
            inner: Mutex::new(State {
                write_thread: None,
                write_count: 0,
                read_count: 0,
            }),
        }
    }

    pub fn acquire_read(&self) -> Result<ReadMarker<'_>> {
        let mut state = self.inner.lock();
        if state.write_count > 0 {
            return Err(WorldError::ReadWhileWriting.into());
        }
        state.read_count += 1;
        Ok(ReadMarker { state: self })
    }

    pub fn acquire_write(&self) -> Result<WriteMarker<'_>> {
        let this_thread = std::thread::current().id();
        let mut state = self.inner.lock();
        if state.read_count > 0 && state.write_thread != Some(this_thread) {
            return Err(WorldError::WriteWhileReading.into());
        }
        match state.write_thread {
            Some(owner) if owner == this_thread => {
                state.write_count += 1;
            }
            Some(_) => return Err(WorldError::WriteWhileReading.into()),
            None => {
                state.write_thread = Some(this_thread);
                state.write_count = 1;
            }
        }
        Ok(WriteMarker { state: self })
    }

    fn release_read(&self) {
        let mut state = self.inner.lock();
        state.read_count -= 1;
    }

    fn release_write(&self) {
        let mut state = self.inner.lock();
        state.write_count -= 1;
        if state.write_count == 0 {
            state.write_thread = None;
        }
    }
}

impl Default for MarkerState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ReadMarker<'a> {
    state: &'a MarkerState,
}

impl Drop for ReadMarker<'_> {
    fn drop(&mut self) {
        self.state.release_read();
    }
}

pub struct WriteMarker<'a> {
    state: &'a MarkerState,
}

impl Drop for WriteMarker<'_> {
    fn drop(&mut self) {
        self.state.release_write();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_marker_is_reentrant_on_owning_thread() {
        let markers = MarkerState::new();
        let outer = markers.acquire_write().unwrap();
        let inner = markers.acquire_write().unwrap();
        drop(inner);
        drop(outer);
    }

    #[test]
    fn write_fails_while_read_active() {
        let markers = MarkerState::new();
        let _read = markers.acquire_read().unwrap();
        assert!(markers.acquire_write().is_err());
    }

    #[test]
    fn read_fails_while_write_active() {
        let markers = MarkerState::new();
        let _write = markers.acquire_write().unwrap();
        assert!(markers.acquire_read().is_err());
    }

    #[test]
    fn independent_reads_stack() {
        let markers = MarkerState::new();
        let r1 = markers.acquire_read().unwrap();
        let r2 = markers.acquire_read().unwrap();
        drop(r1);
        drop(r2);
        let _write = markers.acquire_write().unwrap();
    }
}
