//! Transactional coordination of lock state.
//!
//! All lock acquisitions and releases in the crate run as transforms of a
//! single [`ResourceLockCoordinationService`]. A transform sees a consistent
//! lock state, takes or releases any number of locks, and reports a
//! [`Disposition`]. A `Retry` rolls back whatever the attempt acquired, parks the
//! thread until some other thread releases a lock, and runs the transform again.
//!
//! Because no transform ever waits while holding a strict subset of the locks it
//! asked for, acquiring several locks in different orders cannot deadlock.

use std::{
    cell::RefCell,
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::{Condvar, Mutex};

use super::lock::{Disposition, ResourceLockState, SharedResourceLock};
use crate::{Error, Result};

static NEXT_SERVICE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static ACTIVE_TRANSFORMS: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// Serializes every lock-state change behind one mutex and one broadcast condition.
#[derive(Debug)]
pub struct ResourceLockCoordinationService {
    id: u64,
    lock: Mutex<()>,
    state_changed: Condvar,
}

impl Default for ResourceLockCoordinationService {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceLockCoordinationService {
    /// Create a coordination service.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_SERVICE_ID.fetch_add(1, Ordering::Relaxed),
            lock: Mutex::new(()),
            state_changed: Condvar::new(),
        }
    }

    /// Run `transform` under the state lock until it finishes or fails.
    ///
    /// Returns `Ok(true)` for [`Disposition::Finished`] and `Ok(false)` for
    /// [`Disposition::Failed`]. An error returned by the transform rolls back the
    /// attempt and is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns the transform's error, or `IllegalState` when called from inside a
    /// transform of the same service.
    pub fn with_state_lock<F>(&self, mut transform: F) -> Result<bool>
    where
        F: FnMut(&mut ResourceLockState) -> Result<Disposition>,
    {
        let _scope = TransformScope::enter(self.id)?;
        let mut guard = self.lock.lock();
        let _unwind = NotifyOnUnwind {
            state_changed: &self.state_changed,
        };
        loop {
            let mut state = ResourceLockState::new();
            match transform(&mut state) {
                Ok(Disposition::Finished) => {
                    state.commit();
                    self.maybe_notify(&state);
                    return Ok(true);
                }
                Ok(Disposition::Retry) => {
                    state.release_locks()?;
                    self.maybe_notify(&state);
                    drop(state);
                    self.state_changed.wait(&mut guard);
                }
                Ok(Disposition::Failed) => {
                    state.release_locks()?;
                    self.maybe_notify(&state);
                    return Ok(false);
                }
                Err(err) => {
                    if let Err(rollback) = state.release_locks() {
                        tracing::error!(error = %rollback, "rollback after failed transform failed");
                    }
                    self.maybe_notify(&state);
                    return Err(err);
                }
            }
        }
    }

    /// Wake every thread waiting for a lock-state change.
    pub fn notify_state_change(&self) {
        let _guard = self.lock.lock();
        self.state_changed.notify_all();
    }

    fn maybe_notify(&self, state: &ResourceLockState) {
        if state.has_released_held_lock() {
            self.state_changed.notify_all();
        }
    }
}

/// Wakes waiters when a transform panics.
///
/// The unwinding attempt may have released locks held before it started, and
/// its rollback runs in `ResourceLockState::drop`. Dropped before the state
/// mutex guard, so waiters see the rolled-back state.
struct NotifyOnUnwind<'a> {
    state_changed: &'a Condvar,
}

impl Drop for NotifyOnUnwind<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.state_changed.notify_all();
        }
    }
}

/// Marks the current thread as running a transform of one service.
struct TransformScope {
    service_id: u64,
}

impl TransformScope {
    fn enter(service_id: u64) -> Result<Self> {
        ACTIVE_TRANSFORMS.with(|active| {
            let mut active = active.borrow_mut();
            if active.contains(&service_id) {
                return Err(Error::illegal_state(
                    "cannot run a state-lock transform from inside another transform of the same coordination service",
                ));
            }
            active.push(service_id);
            Ok(Self { service_id })
        })
    }
}

impl Drop for TransformScope {
    fn drop(&mut self) {
        ACTIVE_TRANSFORMS.with(|active| {
            active.borrow_mut().retain(|id| *id != self.service_id);
        });
    }
}

/// Transform taking every lock in order, retrying until all are held at once.
pub fn lock(
    locks: &[SharedResourceLock],
) -> impl FnMut(&mut ResourceLockState) -> Result<Disposition> + '_ {
    move |state| {
        for lock in locks {
            if !state.try_lock(lock)? {
                return Ok(Disposition::Retry);
            }
        }
        Ok(Disposition::Finished)
    }
}

/// Transform taking every lock in order, failing if any is unavailable.
pub fn try_lock(
    locks: &[SharedResourceLock],
) -> impl FnMut(&mut ResourceLockState) -> Result<Disposition> + '_ {
    move |state| {
        for lock in locks {
            if !state.try_lock(lock)? {
                return Ok(Disposition::Failed);
            }
        }
        Ok(Disposition::Finished)
    }
}

/// Transform releasing every lock.
pub fn unlock(
    locks: &[SharedResourceLock],
) -> impl FnMut(&mut ResourceLockState) -> Result<Disposition> + '_ {
    move |state| {
        for lock in locks {
            state.unlock(lock)?;
        }
        Ok(Disposition::Finished)
    }
}
