//! Fixed-capacity integer id allocator.
//!
//! Ids are `1..=capacity`; `0` is never handed out and doubles as the
//! "released" marker on sessions and resources. Returned ids are reused
//! last-in first-out.

use parking_lot::Mutex;

use crate::error::{AccelError, Result};

/// Id type shared by sessions and resources.
pub type Id = u32;

#[derive(Debug)]
struct PoolState {
    /// Stack of ids; `free[next..]` are available.
    free: Vec<Id>,
    next: usize,
}

#[derive(Debug)]
pub struct IdPool {
    capacity: usize,
    state: Mutex<PoolState>,
}

impl IdPool {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity > Id::MAX as usize {
            return Err(AccelError::InvalidArgument(format!(
                "id pool capacity {capacity} out of range"
            )));
        }

        Ok(Self {
            capacity,
            state: Mutex::new(PoolState {
                free: (1..=capacity as Id).collect(),
                next: 0,
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pop the next free id.
    pub fn get(&self) -> Result<Id> {
        let mut state = self.state.lock();
        if state.next >= state.free.len() {
            return Err(AccelError::TooManyUsers(format!(
                "all {} ids in use",
                self.capacity
            )));
        }
        let id = state.free[state.next];
        state.next += 1;
        Ok(id)
    }

    /// Return an id. It is the next one `get` hands out.
    pub fn put(&self, id: Id) -> Result<()> {
        if id == 0 || id as usize > self.capacity {
            return Err(AccelError::InvalidArgument(format!(
                "id {id} outside 1..={}",
                self.capacity
            )));
        }

        let mut state = self.state.lock();
        if state.next == 0 {
            return Err(AccelError::PermissionDenied(format!(
                "id {id} returned with no ids outstanding"
            )));
        }
        state.next -= 1;
        let slot = state.next;
        state.free[slot] = id;
        Ok(())
    }

    /// Number of ids currently handed out.
    pub fn in_use(&self) -> usize {
        self.state.lock().next
    }
}
