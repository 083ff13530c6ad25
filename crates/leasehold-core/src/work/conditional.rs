//! Deferred executions gated by a resource lock.

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::{Condvar, Mutex};

use crate::{resources::SharedResourceLock, Error, Result};

/// Work that may only run while its resource lock is held.
///
/// The queue takes the lock, calls [`execute`](Self::execute), releases the
/// lock and then calls [`complete`](Self::complete). Waiters blocked in
/// [`await_result`](Self::await_result) wake on completion.
pub trait ConditionalExecution<T>: Send + Sync {
    /// The lock that must be held while the execution runs.
    fn resource_lock(&self) -> &SharedResourceLock;

    /// Run the computation. Later calls do nothing.
    fn execute(&self);

    /// Mark the execution done and wake every waiter.
    fn complete(&self);

    fn is_complete(&self) -> bool;

    /// Block until completion, then return the value or the failure.
    fn await_result(&self) -> Result<T>;

    /// Record `error` as the outcome without running the computation.
    ///
    /// Does nothing when a result already exists.
    fn fail(&self, error: Error);

    /// Cancel the execution. Returns `false` when a result already exists.
    fn cancel(&self) -> bool;

    fn is_cancelled(&self) -> bool;
}

/// Cooperative cancellation flag handed to a running computation.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

type Work<T> = Box<dyn FnOnce(&CancellationToken) -> anyhow::Result<T> + Send>;

struct Slot<T> {
    work: Option<Work<T>>,
    result: Option<Result<T>>,
    completed: bool,
}

/// The standard [`ConditionalExecution`]: a closure run at most once.
pub struct DeferredExecution<T> {
    lock: SharedResourceLock,
    token: CancellationToken,
    slot: Mutex<Slot<T>>,
    finished: Condvar,
}

impl<T> DeferredExecution<T>
where
    T: Clone + Send + 'static,
{
    pub fn new<F>(lock: SharedResourceLock, work: F) -> Self
    where
        F: FnOnce(&CancellationToken) -> anyhow::Result<T> + Send + 'static,
    {
        Self {
            lock,
            token: CancellationToken::new(),
            slot: Mutex::new(Slot {
                work: Some(Box::new(work)),
                result: None,
                completed: false,
            }),
            finished: Condvar::new(),
        }
    }

    /// Shared handle, ready to submit to a queue.
    pub fn shared<F>(lock: SharedResourceLock, work: F) -> Arc<Self>
    where
        F: FnOnce(&CancellationToken) -> anyhow::Result<T> + Send + 'static,
    {
        Arc::new(Self::new(lock, work))
    }
}

impl<T> ConditionalExecution<T> for DeferredExecution<T>
where
    T: Clone + Send + 'static,
{
    fn resource_lock(&self) -> &SharedResourceLock {
        &self.lock
    }

    fn execute(&self) {
        let work = {
            let mut slot = self.slot.lock();
            if slot.result.is_some() {
                return;
            }
            slot.work.take()
        };
        let Some(work) = work else {
            return;
        };

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| work(&self.token))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(Error::failure(err)),
            Err(payload) => Err(Error::from_panic(payload.as_ref())),
        };

        let mut slot = self.slot.lock();
        if slot.result.is_none() {
            slot.result = Some(outcome);
        } else {
            tracing::debug!(lock = %self.lock.display_name(), "discarding output of cancelled execution");
        }
    }

    fn complete(&self) {
        let mut slot = self.slot.lock();
        slot.completed = true;
        self.finished.notify_all();
    }

    fn is_complete(&self) -> bool {
        self.slot.lock().completed
    }

    fn await_result(&self) -> Result<T> {
        let mut slot = self.slot.lock();
        while !slot.completed {
            self.finished.wait(&mut slot);
        }
        slot.result.clone().unwrap_or_else(|| {
            Err(Error::illegal_state(
                "execution completed without producing a result",
            ))
        })
    }

    fn fail(&self, error: Error) {
        let mut slot = self.slot.lock();
        if slot.result.is_some() {
            return;
        }
        tracing::debug!(lock = %self.lock.display_name(), error = %error, "execution failed before it could run");
        slot.work = None;
        slot.result = Some(Err(error));
    }

    fn cancel(&self) -> bool {
        let mut slot = self.slot.lock();
        if slot.result.is_some() {
            return false;
        }
        self.token.cancel();
        slot.work = None;
        slot.result = Some(Err(Error::cancelled(format!(
            "execution gated by '{}' was cancelled",
            self.lock.display_name()
        ))));
        true
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl<T> fmt::Debug for DeferredExecution<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.lock();
        f.debug_struct("DeferredExecution")
            .field("lock", &self.lock.display_name())
            .field("started", &slot.work.is_none())
            .field("completed", &slot.completed)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}
