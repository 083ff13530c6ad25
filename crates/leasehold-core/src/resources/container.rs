//! Per-thread bookkeeping of held locks.

use std::{
    collections::HashMap,
    fmt,
    thread::{self, ThreadId},
};

use parking_lot::Mutex;

use super::lock::{same_lock, SharedResourceLock};

/// Records which thread holds which of a registry's locks.
///
/// Entries for a thread are only added or removed by that thread, so queries for
/// the current thread are consistent even outside a transform.
#[derive(Default)]
pub struct ResourceLockContainer {
    held: Mutex<HashMap<ThreadId, Vec<SharedResourceLock>>>,
}

impl ResourceLockContainer {
    /// Create an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock_acquired(&self, lock: &SharedResourceLock) {
        self.held
            .lock()
            .entry(thread::current().id())
            .or_default()
            .push(SharedResourceLock::clone(lock));
    }

    pub(crate) fn lock_released(&self, lock: &SharedResourceLock) {
        let mut held = self.held.lock();
        let thread_id = thread::current().id();
        if let Some(locks) = held.get_mut(&thread_id) {
            locks.retain(|candidate| !same_lock(candidate, lock));
            if locks.is_empty() {
                held.remove(&thread_id);
            }
        }
    }

    /// Locks held by the calling thread, oldest first.
    pub fn locks_held_by_current_thread(&self) -> Vec<SharedResourceLock> {
        self.held
            .lock()
            .get(&thread::current().id())
            .cloned()
            .unwrap_or_default()
    }

    /// Whether the calling thread holds any lock of this container.
    pub fn holds_lock(&self) -> bool {
        self.held.lock().contains_key(&thread::current().id())
    }

    /// Whether any thread holds a lock of this container.
    pub fn has_open_locks(&self) -> bool {
        !self.held.lock().is_empty()
    }

    /// Display names of every held lock, for leak diagnostics.
    pub fn open_lock_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .held
            .lock()
            .values()
            .flatten()
            .map(|lock| lock.display_name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Whether `lock` reports this container as its owner.
    pub fn owns(&self, lock: &SharedResourceLock) -> bool {
        lock.container()
            .is_some_and(|container| std::ptr::eq(container, self))
    }
}

impl fmt::Debug for ResourceLockContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Held locks point back at this container, so only names are printed.
        f.debug_struct("ResourceLockContainer")
            .field("open_locks", &self.open_lock_names())
            .finish()
    }
}
