//! A worker pool that runs each execution once its resource lock is free.
//!
//! Pool threads are spawned lazily, up to the configured maximum. A worker
//! scans the pending executions in submission order inside a coordination
//! transform and takes the first whose lock it can acquire. When nothing is
//! ready the transform retries, which parks the worker until some lock is
//! released or new work arrives.
//!
//! Lock order: the coordination mutex is always taken before the queue mutex.

use std::{
    collections::VecDeque,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use parking_lot::{Condvar, Mutex};
use strum::Display;

use super::{
    conditional::ConditionalExecution,
    executor::{ExecutorFactory, ManagedExecutor},
};
use crate::{
    config::Config,
    resources::{coordination, Disposition, ResourceLockCoordinationService, SharedResourceLock},
    Error, Result,
};

/// A submitted execution.
pub type SharedExecution<T> = Arc<dyn ConditionalExecution<T>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum QueueState {
    Working,
    Stopped,
}

/// Bounded pool of workers gated by per-execution resource locks.
pub struct ConditionalExecutionQueue<T> {
    inner: Arc<QueueInner<T>>,
}

struct QueueInner<T> {
    display_name: String,
    max_workers: usize,
    coordination: Arc<ResourceLockCoordinationService>,
    executor: Arc<dyn ManagedExecutor>,
    queue: Mutex<Pending<T>>,
    work_available: Condvar,
}

struct Pending<T> {
    state: QueueState,
    executions: VecDeque<SharedExecution<T>>,
    workers: usize,
}

impl<T> ConditionalExecutionQueue<T>
where
    T: Send + 'static,
{
    /// Create a queue running at most `max_workers` executions at once.
    pub fn new(
        display_name: impl Into<String>,
        max_workers: usize,
        executor_factory: &dyn ExecutorFactory,
        coordination: Arc<ResourceLockCoordinationService>,
    ) -> Result<Self> {
        if max_workers == 0 {
            return Err(Error::invalid_config(
                "a conditional execution queue needs at least one worker",
            ));
        }
        let display_name = display_name.into();
        let executor = executor_factory.create(&display_name);
        Ok(Self {
            inner: Arc::new(QueueInner {
                display_name,
                max_workers,
                coordination,
                executor,
                queue: Mutex::new(Pending {
                    state: QueueState::Working,
                    executions: VecDeque::new(),
                    workers: 0,
                }),
                work_available: Condvar::new(),
            }),
        })
    }

    /// Create a queue sized by the configured queue worker count.
    pub fn from_config(
        display_name: impl Into<String>,
        config: &Config,
        executor_factory: &dyn ExecutorFactory,
        coordination: Arc<ResourceLockCoordinationService>,
    ) -> Result<Self> {
        Self::new(
            display_name,
            config.queue_max_workers(),
            executor_factory,
            coordination,
        )
    }

    /// Queue `execution` to run once its lock is available.
    pub fn submit(&self, execution: SharedExecution<T>) -> Result<()> {
        {
            let mut queue = self.inner.queue.lock();
            if queue.state == QueueState::Stopped {
                return Err(Error::illegal_state(format!(
                    "cannot submit to queue '{}' after it has been stopped",
                    self.inner.display_name
                )));
            }
            if queue.workers < self.inner.max_workers {
                let inner = Arc::clone(&self.inner);
                self.inner
                    .executor
                    .execute(Box::new(move || QueueInner::run_worker(&inner)))?;
                queue.workers += 1;
                tracing::debug!(
                    queue = %self.inner.display_name,
                    workers = queue.workers,
                    "started queue worker"
                );
            }
            queue.executions.push_back(execution);
            self.inner.work_available.notify_all();
        }
        // Workers parked in a retry re-scan the queue on a state change.
        self.inner.coordination.notify_state_change();
        Ok(())
    }

    /// Stop accepting work, drain the pool and cancel what could not run.
    ///
    /// Executions already pending still run if their lock is free when a
    /// worker looks at them. The rest are cancelled and completed so nobody
    /// waits on them forever.
    pub fn stop(&self) -> Result<()> {
        {
            let mut queue = self.inner.queue.lock();
            if queue.state == QueueState::Stopped {
                return Ok(());
            }
            queue.state = QueueState::Stopped;
            self.inner.work_available.notify_all();
        }
        self.inner.coordination.notify_state_change();
        self.inner.executor.stop()?;

        let leftovers: Vec<SharedExecution<T>> =
            self.inner.queue.lock().executions.drain(..).collect();
        if !leftovers.is_empty() {
            tracing::warn!(
                queue = %self.inner.display_name,
                count = leftovers.len(),
                "cancelling executions left in stopped queue"
            );
        }
        for execution in leftovers {
            execution.cancel();
            execution.complete();
        }
        tracing::debug!(queue = %self.inner.display_name, "queue stopped");
        Ok(())
    }

    pub fn state(&self) -> QueueState {
        self.inner.queue.lock().state
    }

    /// Pool threads currently running.
    pub fn worker_count(&self) -> usize {
        self.inner.queue.lock().workers
    }

    pub fn pending_count(&self) -> usize {
        self.inner.queue.lock().executions.len()
    }
}

impl<T> QueueInner<T>
where
    T: Send + 'static,
{
    fn run_worker(self: &Arc<Self>) {
        let _exit = WorkerExit { inner: self };
        tracing::debug!(queue = %self.display_name, "queue worker running");
        loop {
            if !self.wait_for_work() {
                return;
            }
            match self.next_ready_execution() {
                Ok(Some(execution)) => self.run_batch(execution),
                Ok(None) => {
                    if self.queue.lock().state == QueueState::Stopped {
                        return;
                    }
                }
                Err(err) => {
                    tracing::error!(queue = %self.display_name, error = %err, "queue worker failed to select work");
                    return;
                }
            }
        }
    }

    /// Block until work is pending. Returns `false` once the queue is stopped
    /// and empty.
    fn wait_for_work(&self) -> bool {
        let mut queue = self.queue.lock();
        while queue.state == QueueState::Working && queue.executions.is_empty() {
            self.work_available.wait(&mut queue);
        }
        !(queue.state == QueueState::Stopped && queue.executions.is_empty())
    }

    /// Take the first pending execution whose lock can be acquired.
    ///
    /// An execution whose lock refuses acquisition with an error is removed,
    /// failed with that error and completed; the scan goes on with the rest.
    fn next_ready_execution(&self) -> Result<Option<SharedExecution<T>>> {
        let mut selected = None;
        let mut rejected: Vec<(SharedExecution<T>, Error)> = Vec::new();
        self.coordination.with_state_lock(|state| {
            let mut queue = self.queue.lock();
            let mut index = 0;
            while let Some(execution) = queue.executions.get(index) {
                match state.try_lock(execution.resource_lock()) {
                    Ok(true) => {
                        selected = queue.executions.remove(index);
                        return Ok(Disposition::Finished);
                    }
                    Ok(false) => index += 1,
                    Err(err) => {
                        if let Some(execution) = queue.executions.remove(index) {
                            rejected.push((execution, err));
                        }
                    }
                }
            }
            if rejected.is_empty()
                && !queue.executions.is_empty()
                && queue.state == QueueState::Working
            {
                Ok(Disposition::Retry)
            } else {
                Ok(Disposition::Finished)
            }
        })?;

        for (execution, err) in rejected {
            tracing::error!(
                queue = %self.display_name,
                lock = %execution.resource_lock().display_name(),
                error = %err,
                "failed to acquire execution lock"
            );
            execution.fail(err);
            execution.complete();
        }
        Ok(selected)
    }

    /// Run `first`, then keep running ready executions until none is left.
    fn run_batch(&self, first: SharedExecution<T>) {
        let mut next = Some(first);
        while let Some(execution) = next {
            self.run_execution(&execution);
            next = match self.next_ready_execution() {
                Ok(found) => found,
                Err(err) => {
                    tracing::error!(queue = %self.display_name, error = %err, "failed to select next execution");
                    None
                }
            };
        }
    }

    fn run_execution(&self, execution: &SharedExecution<T>) {
        if panic::catch_unwind(AssertUnwindSafe(|| execution.execute())).is_err() {
            tracing::error!(queue = %self.display_name, "execution panicked outside its own handler");
        }
        let lock: SharedResourceLock = Arc::clone(execution.resource_lock());
        if let Err(err) = self
            .coordination
            .with_state_lock(coordination::unlock(&[lock]))
        {
            tracing::error!(queue = %self.display_name, error = %err, "failed to release execution lock");
        }
        execution.complete();
    }
}

/// Decrements the worker count however the worker loop ends.
struct WorkerExit<'a, T> {
    inner: &'a QueueInner<T>,
}

impl<T> Drop for WorkerExit<'_, T> {
    fn drop(&mut self) {
        let mut queue = self.inner.queue.lock();
        queue.workers = queue.workers.saturating_sub(1);
        tracing::debug!(queue = %self.inner.display_name, workers = queue.workers, "queue worker exiting");
    }
}

impl<T> Drop for ConditionalExecutionQueue<T> {
    fn drop(&mut self) {
        let running = self.inner.queue.lock().state == QueueState::Working;
        if running {
            {
                let mut queue = self.inner.queue.lock();
                queue.state = QueueState::Stopped;
                self.inner.work_available.notify_all();
            }
            self.inner.coordination.notify_state_change();
            if let Err(err) = self.inner.executor.stop() {
                tracing::error!(queue = %self.inner.display_name, error = %err, "failed to stop queue on drop");
            }
            for execution in self.inner.queue.lock().executions.drain(..) {
                execution.cancel();
                execution.complete();
            }
        }
    }
}

impl<T> fmt::Debug for ConditionalExecutionQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.inner.queue.lock();
        f.debug_struct("ConditionalExecutionQueue")
            .field("display_name", &self.inner.display_name)
            .field("state", &queue.state)
            .field("workers", &queue.workers)
            .field("pending", &queue.executions.len())
            .finish()
    }
}
