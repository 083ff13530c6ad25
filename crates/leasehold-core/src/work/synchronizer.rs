//! Mutual exclusion for worker threads that does not starve other workers.

use std::{
    fmt,
    sync::Arc,
    thread::{self, ThreadId},
};

use parking_lot::{Condvar, Mutex};

use super::service::WorkerLeaseService;
use crate::{resources::current_thread_name, Error, Result};

/// A re-entrant lock usable only by worker threads.
///
/// A worker that has to wait for the synchronizer gives up its worker lease and
/// project locks while it waits, so the owner can always make progress.
#[derive(Clone)]
pub struct Synchronizer<S> {
    service: S,
    state: Arc<OwnerState>,
}

#[derive(Default)]
struct OwnerState {
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
}

impl<S> Synchronizer<S> {
    pub fn new(service: S) -> Self {
        Self {
            service,
            state: Arc::new(OwnerState::default()),
        }
    }
}

impl<S> Synchronizer<S>
where
    S: WorkerLeaseService,
{
    /// Run `action` while owning the synchronizer.
    pub fn with_lock<T, F>(&self, action: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        if !self.service.is_worker_thread() {
            return Err(Error::no_worker_lease(format!(
                "thread '{}' is not registered as a worker thread",
                current_thread_name()
            )));
        }
        let previous = self.take_ownership()?;
        let _release = OwnershipGuard {
            state: &self.state,
            previous,
        };
        action()
    }

    fn take_ownership(&self) -> Result<Option<ThreadId>> {
        let current = thread::current().id();
        {
            let mut owner = self.state.owner.lock();
            match *owner {
                None => {
                    *owner = Some(current);
                    return Ok(None);
                }
                Some(held) if held == current => return Ok(Some(current)),
                Some(_) => {}
            }
        }

        self.service.blocking(|| {
            let mut owner = self.state.owner.lock();
            while owner.is_some() {
                self.state.released.wait(&mut owner);
            }
            *owner = Some(current);
            Ok(())
        })?;
        Ok(None)
    }
}

impl<S> fmt::Debug for Synchronizer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronizer")
            .field("owner", &*self.state.owner.lock())
            .finish_non_exhaustive()
    }
}

/// Restores the previous owner (the same thread when re-entered, else none).
struct OwnershipGuard<'a> {
    state: &'a OwnerState,
    previous: Option<ThreadId>,
}

impl Drop for OwnershipGuard<'_> {
    fn drop(&mut self) {
        *self.state.owner.lock() = self.previous;
        self.state.released.notify_all();
    }
}
