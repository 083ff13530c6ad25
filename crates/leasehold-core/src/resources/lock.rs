//! The resource lock primitive and the per-transform lock state.
//!
//! Every read or write of lock ownership takes a [`ResourceLockState`]. The only
//! way to obtain one is inside a transform run by
//! [`ResourceLockCoordinationService::with_state_lock`], so ownership is never
//! observed or changed outside the coordination mutex.
//!
//! [`ResourceLockCoordinationService::with_state_lock`]: super::ResourceLockCoordinationService::with_state_lock

use std::{any::Any, fmt, sync::Arc, thread};

use strum::Display;

use super::container::ResourceLockContainer;
use crate::Result;

/// A lock shared between registries, services and transforms.
pub type SharedResourceLock = Arc<dyn ResourceLock>;

/// A lockable resource with at most one owning thread.
///
/// Implementors supply the acquire/release hooks. Tracking (already-held
/// short-cut, rollback, container bookkeeping, wake-ups) is done by
/// [`ResourceLockState::try_lock`] and [`ResourceLockState::unlock`].
pub trait ResourceLock: Send + Sync + fmt::Debug {
    /// Name used in diagnostics and as registry key.
    fn display_name(&self) -> &str;

    /// Whether any thread holds this lock.
    fn is_locked(&self, state: &ResourceLockState) -> bool;

    /// Whether the calling thread holds this lock.
    fn is_locked_by_current_thread(&self, state: &ResourceLockState) -> bool;

    /// Attempt to take the lock for the calling thread without blocking.
    ///
    /// Only called when the calling thread does not already hold the lock.
    fn acquire_lock(&self, state: &ResourceLockState) -> Result<bool>;

    /// Give the lock up. Only called while the lock is held.
    fn release_lock(&self, state: &ResourceLockState) -> Result<()>;

    /// The container tracking which thread holds this lock, if any.
    fn container(&self) -> Option<&ResourceLockContainer> {
        None
    }

    /// Type-erase for recovery of the concrete lock type.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Compare two shared locks by identity.
pub fn same_lock(a: &SharedResourceLock, b: &SharedResourceLock) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a).cast::<()>(),
        Arc::as_ptr(b).cast::<()>(),
    )
}

/// Whether `lock` is one of `locks`.
pub fn contains_lock(locks: &[SharedResourceLock], lock: &SharedResourceLock) -> bool {
    locks.iter().any(|candidate| same_lock(candidate, lock))
}

/// Outcome of one invocation of a state-lock transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Disposition {
    /// The transform is done.
    Finished,
    /// Locks were unavailable: roll back and wait for a state change.
    Retry,
    /// Give up without a cause; locks taken in this attempt are rolled back.
    Failed,
}

/// Lock state visible to one attempt of a transform.
///
/// Records the locks acquired during the attempt so they can be rolled back,
/// and whether any previously held lock was released (which wakes waiters).
#[derive(Debug)]
pub struct ResourceLockState {
    acquired: Vec<SharedResourceLock>,
    released_held_lock: bool,
}

impl ResourceLockState {
    pub(crate) const fn new() -> Self {
        Self {
            acquired: Vec::new(),
            released_held_lock: false,
        }
    }

    /// Try to take `lock` for the calling thread.
    ///
    /// Returns `true` when the lock is now held, including when it already was.
    pub fn try_lock(&mut self, lock: &SharedResourceLock) -> Result<bool> {
        if lock.is_locked_by_current_thread(self) {
            return Ok(true);
        }
        if !lock.acquire_lock(self)? {
            tracing::trace!(lock = %lock.display_name(), "lock unavailable");
            return Ok(false);
        }
        tracing::debug!(
            thread = %current_thread_name(),
            lock = %lock.display_name(),
            "acquired lock"
        );
        if let Some(container) = lock.container() {
            container.lock_acquired(lock);
        }
        self.acquired.push(Arc::clone(lock));
        Ok(true)
    }

    /// Release `lock` if it is held. Unlocking a free lock is a no-op.
    pub fn unlock(&mut self, lock: &SharedResourceLock) -> Result<()> {
        if !lock.is_locked(self) {
            return Ok(());
        }
        lock.release_lock(self)?;
        tracing::debug!(
            thread = %current_thread_name(),
            lock = %lock.display_name(),
            "released lock"
        );
        if let Some(container) = lock.container() {
            container.lock_released(lock);
        }
        match self.acquired.iter().position(|held| same_lock(held, lock)) {
            Some(idx) => {
                self.acquired.remove(idx);
            }
            None => self.released_held_lock = true,
        }
        Ok(())
    }

    /// Roll back every lock acquired so far in this attempt.
    pub fn release_locks(&mut self) -> Result<()> {
        let acquired = std::mem::take(&mut self.acquired);
        let mut first_error = None;
        for lock in acquired.iter().rev() {
            let released = lock.release_lock(self).map(|()| {
                if let Some(container) = lock.container() {
                    container.lock_released(lock);
                }
            });
            if let Err(err) = released {
                tracing::warn!(lock = %lock.display_name(), error = %err, "rollback failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Locks acquired so far in this attempt.
    pub fn acquired(&self) -> &[SharedResourceLock] {
        &self.acquired
    }

    pub(crate) const fn has_released_held_lock(&self) -> bool {
        self.released_held_lock
    }

    pub(crate) fn commit(&mut self) {
        self.acquired.clear();
    }
}

impl Drop for ResourceLockState {
    fn drop(&mut self) {
        // Only non-empty when a transform unwound mid-attempt.
        if !self.acquired.is_empty() {
            if let Err(err) = self.release_locks() {
                tracing::error!(error = %err, "failed to roll back locks after panic");
            }
        }
    }
}

pub(crate) fn current_thread_name() -> String {
    let current = thread::current();
    current
        .name()
        .map_or_else(|| format!("{:?}", current.id()), str::to_string)
}
