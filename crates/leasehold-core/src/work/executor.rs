//! Named thread pools for queue workers.
//!
//! A [`ManagedExecutor`] tracks the handle of every thread it spawns so that
//! `stop()` can join all of them. Finished handles are pruned as new jobs are
//! submitted, which keeps the registry from growing without bound.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use parking_lot::Mutex;

use crate::{config::Config, Error, Result};

/// A unit of work run on an executor thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs on threads it owns and joins them on stop.
pub trait ManagedExecutor: Send + Sync + fmt::Debug {
    /// Run `job` on a new executor thread.
    fn execute(&self, job: Job) -> Result<()>;

    /// Threads that have not finished yet.
    fn active_count(&self) -> usize;

    /// Join every thread.
    ///
    /// Fails when called from one of the executor's own threads, or when a job
    /// panicked.
    fn stop(&self) -> Result<()>;
}

/// Creates executors for named work queues.
pub trait ExecutorFactory: Send + Sync {
    fn create(&self, display_name: &str) -> Arc<dyn ManagedExecutor>;
}

/// Spawns one OS thread per job, named `<display name> Thread <n>`.
#[derive(Debug, Clone, Default)]
pub struct DefaultExecutorFactory {
    thread_prefix: Option<String>,
}

impl DefaultExecutorFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix every thread name with the configured prefix.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            thread_prefix: Some(config.threads.name_prefix.clone()),
        }
    }
}

impl ExecutorFactory for DefaultExecutorFactory {
    fn create(&self, display_name: &str) -> Arc<dyn ManagedExecutor> {
        let name = self.thread_prefix.as_ref().map_or_else(
            || display_name.to_string(),
            |prefix| format!("{prefix} {display_name}"),
        );
        Arc::new(ThreadExecutor::new(name))
    }
}

/// Executor that spawns a named thread per job.
pub struct ThreadExecutor {
    display_name: String,
    threads: Mutex<Vec<JoinHandle<()>>>,
    next_thread: AtomicUsize,
    stopped: AtomicBool,
}

impl ThreadExecutor {
    #[must_use]
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            threads: Mutex::new(Vec::new()),
            next_thread: AtomicUsize::new(1),
            stopped: AtomicBool::new(false),
        }
    }

    /// Remove handles of finished threads, returning how many were removed.
    pub fn cleanup_completed(&self) -> usize {
        let mut threads = self.threads.lock();
        let initial_count = threads.len();
        threads.retain(|handle| !handle.is_finished());
        initial_count.saturating_sub(threads.len())
    }

    fn owns_current_thread(&self) -> bool {
        let current = thread::current().id();
        self.threads
            .lock()
            .iter()
            .any(|handle| handle.thread().id() == current)
    }
}

impl ManagedExecutor for ThreadExecutor {
    fn execute(&self, job: Job) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::illegal_state(format!(
                "executor '{}' has been stopped",
                self.display_name
            )));
        }
        self.cleanup_completed();

        let index = self.next_thread.fetch_add(1, Ordering::Relaxed);
        let name = format!("{} Thread {index}", self.display_name);
        let handle = thread::Builder::new().name(name).spawn(job)?;
        self.threads.lock().push(handle);
        Ok(())
    }

    fn active_count(&self) -> usize {
        self.threads
            .lock()
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    fn stop(&self) -> Result<()> {
        if self.owns_current_thread() {
            return Err(Error::illegal_state(format!(
                "cannot stop executor '{}' from one of its own threads",
                self.display_name
            )));
        }
        self.stopped.store(true, Ordering::Release);

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.threads.lock());
        let mut panicked = None;
        for handle in handles {
            let name = handle.thread().name().map(str::to_string);
            if let Err(payload) = handle.join() {
                tracing::error!(thread = ?name, "executor thread panicked");
                panicked.get_or_insert_with(|| Error::from_panic(payload.as_ref()));
            }
        }
        tracing::debug!(executor = %self.display_name, "executor stopped");
        panicked.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for ThreadExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadExecutor")
            .field("display_name", &self.display_name)
            .field("threads", &self.threads.lock().len())
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}
