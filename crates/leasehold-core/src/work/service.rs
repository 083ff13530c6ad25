//! The worker lease service.
//!
//! [`DefaultWorkerLeaseService`] ties the coordination service, the lease tree
//! and the project lock registry together. Every method that takes locks on the
//! caller's behalf gives them back when it returns, including when the action
//! panics.
//!
//! Acquiring project locks follows one protocol everywhere: first *try* to take
//! them; when that fails, give up the calling thread's worker leases and wait
//! for leases and locks together. A thread never blocks on a project lock while
//! holding a worker lease someone else might need.

use std::{fmt, sync::Arc};

use itertools::Itertools;

use super::{
    lease::{LeaseTree, WorkerLease, WorkerLeaseCompletion},
    synchronizer::Synchronizer,
};
use crate::{
    config::{Config, ParallelismConfig},
    resources::{
        contains_lock, coordination, current_thread_name, Disposition, ExclusiveAccessResourceLock,
        IdentityPath, ProjectLockRegistry, ResourceLockCoordinationService, SharedResourceLock,
    },
    Error, Result,
};

/// Registration of threads as workers.
pub trait WorkerThreadRegistry {
    /// Run `action` as a worker, acquiring a worker lease for the duration if the
    /// calling thread does not hold one already.
    fn run_as_worker_thread<T, F>(&self, action: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>;

    /// Whether the calling thread holds a worker lease.
    fn is_worker_thread(&self) -> bool;
}

/// Access to project locks.
pub trait ProjectLeaseRegistry {
    fn get_project_lock(
        &self,
        build_path: &IdentityPath,
        project_path: &IdentityPath,
    ) -> Arc<ExclusiveAccessResourceLock>;

    /// Project locks held by the calling thread.
    fn get_current_project_locks(&self) -> Vec<SharedResourceLock>;

    /// Run `action` holding the project's lock, blocking until it is available.
    fn with_project_lock<T, F>(
        &self,
        build_path: &IdentityPath,
        project_path: &IdentityPath,
        action: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Result<T>;

    /// Run `action` holding the project's lock, or return `None` if it is busy.
    fn try_with_project_lock<T, F>(
        &self,
        build_path: &IdentityPath,
        project_path: &IdentityPath,
        action: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce() -> Result<T>;

    /// Run `action` with the calling thread's project locks released.
    fn without_project_lock<T, F>(&self, action: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>;

    fn allow_uncontrolled_access_to_any_project<T, F>(&self, action: F) -> T
    where
        F: FnOnce() -> T;

    fn is_allowed_uncontrolled_access_to_any_project(&self) -> bool;
}

/// Worker leases and the locks taken alongside them.
pub trait WorkerLeaseService: WorkerThreadRegistry + ProjectLeaseRegistry {
    /// Create an unacquired lease under the calling thread's current lease, or
    /// under the root when it holds none.
    fn get_worker_lease(&self) -> Arc<WorkerLease>;

    /// The lease most recently acquired by the calling thread.
    fn get_current_worker_lease(&self) -> Result<Arc<WorkerLease>>;

    /// Create an unacquired root lease.
    fn new_worker_lease(&self) -> Arc<WorkerLease>;

    /// Make the calling thread a worker until the completion is finished.
    fn start_worker(&self) -> Result<WorkerLeaseCompletion>;

    /// As [`Self::start_worker`], or a no-op completion for existing workers.
    fn maybe_start_worker(&self) -> Result<WorkerLeaseCompletion>;

    /// Run `action` holding every lock in `locks`.
    fn with_locks<T, F>(&self, locks: &[SharedResourceLock], action: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>;

    /// Run `action` with `locks`, all held by the caller, temporarily released.
    fn without_locks<T, F>(&self, locks: &[SharedResourceLock], action: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>;

    fn without_lock<T, F>(&self, lock: &SharedResourceLock, action: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.without_locks(std::slice::from_ref(lock), action)
    }

    /// Swap `current` for `new` while `action` runs.
    fn with_replaced_locks<T, F>(
        &self,
        current: &[SharedResourceLock],
        new: &[SharedResourceLock],
        action: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Result<T>;

    /// Run a blocking `action` with the calling thread's project locks and worker
    /// leases released.
    fn blocking<T, F>(&self, action: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>;

    /// A worker-only mutual exclusion helper bound to this service.
    fn new_resource(&self) -> Synchronizer<Self>
    where
        Self: Clone + Sized,
    {
        Synchronizer::new(self.clone())
    }

    fn max_worker_count(&self) -> usize;

    /// Fail if any worker lease or project lock is still held.
    fn stop(&self) -> Result<()>;
}

/// The standard lease service. Clones share all state.
#[derive(Clone)]
pub struct DefaultWorkerLeaseService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    coordination: Arc<ResourceLockCoordinationService>,
    tree: Arc<LeaseTree>,
    projects: ProjectLockRegistry,
}

impl DefaultWorkerLeaseService {
    /// Create a service granting at most `parallelism.max_workers` leases.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` when `max_workers` is zero; no lease could ever be
    /// granted.
    pub fn new(
        coordination: Arc<ResourceLockCoordinationService>,
        parallelism: ParallelismConfig,
    ) -> Result<Self> {
        if parallelism.max_workers == 0 {
            return Err(Error::invalid_config(
                "a worker lease service needs at least one worker",
            ));
        }
        tracing::debug!(
            max_workers = parallelism.max_workers,
            parallel_projects = parallelism.parallel_projects,
            "starting worker lease service"
        );
        Ok(Self {
            inner: Arc::new(ServiceInner {
                tree: LeaseTree::new(Arc::clone(&coordination), parallelism.max_workers),
                projects: ProjectLockRegistry::new(parallelism.parallel_projects),
                coordination,
            }),
        })
    }

    /// Create a service with its own coordination service.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            Arc::new(ResourceLockCoordinationService::new()),
            config.parallelism,
        )
    }

    /// The coordination service every lock of this service goes through.
    pub fn coordination(&self) -> &Arc<ResourceLockCoordinationService> {
        &self.inner.coordination
    }

    /// Worker leases currently granted by the root.
    pub fn leases_in_use(&self) -> Result<usize> {
        let mut in_use = 0;
        self.inner.coordination.with_state_lock(|state| {
            in_use = self.inner.tree.root.leases_in_use(state);
            Ok(Disposition::Finished)
        })?;
        Ok(in_use)
    }

    fn current_worker_leases(&self) -> Vec<SharedResourceLock> {
        self.inner.tree.leases.shared_locks_held_by_current_thread()
    }

    fn contains_project_locks(&self, locks: &[SharedResourceLock]) -> bool {
        let container = self.inner.projects.container();
        locks.iter().any(|lock| container.owns(lock))
    }

    fn lock_all(&self, locks: &[SharedResourceLock]) -> Result<()> {
        self.inner
            .coordination
            .with_state_lock(coordination::lock(locks))
            .map(|_| ())
    }

    fn try_lock_all(&self, locks: &[SharedResourceLock]) -> Result<bool> {
        self.inner
            .coordination
            .with_state_lock(coordination::try_lock(locks))
    }

    fn unlock_all(&self, locks: &[SharedResourceLock]) -> Result<()> {
        self.inner
            .coordination
            .with_state_lock(coordination::unlock(locks))
            .map(|_| ())
    }

    /// Take `locks`, giving up worker leases while waiting for project locks.
    fn acquire_locks(&self, locks: &[SharedResourceLock]) -> Result<()> {
        if self.contains_project_locks(locks) {
            if !self.try_lock_all(locks)? {
                self.release_worker_leases_and_wait_for(locks)?;
            }
            Ok(())
        } else {
            self.lock_all(locks)
        }
    }

    fn release_worker_leases_and_wait_for(&self, locks: &[SharedResourceLock]) -> Result<()> {
        let worker_leases = self.current_worker_leases();
        tracing::debug!(
            thread = %current_thread_name(),
            leases = worker_leases.len(),
            locks = %locks.iter().map(|lock| lock.display_name()).join(", "),
            "releasing worker leases while waiting for locks"
        );
        let all_locks: Vec<SharedResourceLock> = worker_leases
            .iter()
            .chain(locks.iter())
            .cloned()
            .collect();
        self.unlock_all(&worker_leases)?;
        self.lock_all(&all_locks)
    }

    /// The subset of `locks` not already held by the calling thread.
    fn locks_not_held(&self, locks: &[SharedResourceLock]) -> Result<Vec<SharedResourceLock>> {
        let mut missing = Vec::new();
        self.inner.coordination.with_state_lock(|state| {
            missing = locks
                .iter()
                .filter(|lock| !lock.is_locked_by_current_thread(state))
                .cloned()
                .collect();
            Ok(Disposition::Finished)
        })?;
        Ok(missing)
    }

    fn with_lease<T, F>(&self, lease: &Arc<WorkerLease>, action: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let shared: Vec<SharedResourceLock> = vec![Arc::clone(lease) as SharedResourceLock];
        self.lock_all(&shared)?;
        let release = Restore::new("release worker lease", || self.unlock_all(&shared));
        finish(action(), release)
    }
}

impl WorkerThreadRegistry for DefaultWorkerLeaseService {
    fn run_as_worker_thread<T, F>(&self, action: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        if self.is_worker_thread() {
            return action();
        }
        let lease = self.new_worker_lease();
        self.with_lease(&lease, action)
    }

    fn is_worker_thread(&self) -> bool {
        self.inner.tree.leases.container().holds_lock()
    }
}

impl ProjectLeaseRegistry for DefaultWorkerLeaseService {
    fn get_project_lock(
        &self,
        build_path: &IdentityPath,
        project_path: &IdentityPath,
    ) -> Arc<ExclusiveAccessResourceLock> {
        self.inner.projects.get_project_lock(build_path, project_path)
    }

    fn get_current_project_locks(&self) -> Vec<SharedResourceLock> {
        self.inner.projects.current_project_locks()
    }

    fn with_project_lock<T, F>(
        &self,
        build_path: &IdentityPath,
        project_path: &IdentityPath,
        action: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let lock: SharedResourceLock = self.get_project_lock(build_path, project_path);
        self.with_locks(&[lock], action)
    }

    fn try_with_project_lock<T, F>(
        &self,
        build_path: &IdentityPath,
        project_path: &IdentityPath,
        action: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce() -> Result<T>,
    {
        let lock: SharedResourceLock = self.get_project_lock(build_path, project_path);
        let locks = [lock];
        let missing = self.locks_not_held(&locks)?;
        if missing.is_empty() {
            return action().map(Some);
        }
        if !self.try_lock_all(&missing)? {
            tracing::debug!(project = %project_path, "project lock busy");
            return Ok(None);
        }
        let release = Restore::new("release project lock", || self.unlock_all(&missing));
        finish(action(), release).map(Some)
    }

    fn without_project_lock<T, F>(&self, action: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let locks = self.get_current_project_locks();
        self.without_locks(&locks, action)
    }

    fn allow_uncontrolled_access_to_any_project<T, F>(&self, action: F) -> T
    where
        F: FnOnce() -> T,
    {
        self.inner.projects.allow_uncontrolled_access(action)
    }

    fn is_allowed_uncontrolled_access_to_any_project(&self) -> bool {
        self.inner.projects.is_allowed_uncontrolled_access()
    }
}

impl WorkerLeaseService for DefaultWorkerLeaseService {
    fn get_worker_lease(&self) -> Arc<WorkerLease> {
        let held = self.inner.tree.leases.locks_held_by_current_thread();
        match held.last() {
            Some(current) => {
                let parent = Arc::clone(current) as Arc<dyn super::lease::LeaseHolder>;
                self.inner.tree.new_lease(parent)
            }
            None => self.inner.tree.new_root_lease(),
        }
    }

    fn get_current_worker_lease(&self) -> Result<Arc<WorkerLease>> {
        self.inner
            .tree
            .leases
            .locks_held_by_current_thread()
            .pop()
            .ok_or_else(|| {
                Error::no_worker_lease(format!(
                    "no worker lease associated with thread '{}'",
                    current_thread_name()
                ))
            })
    }

    fn new_worker_lease(&self) -> Arc<WorkerLease> {
        self.inner.tree.new_root_lease()
    }

    fn start_worker(&self) -> Result<WorkerLeaseCompletion> {
        if self.is_worker_thread() {
            return Err(Error::illegal_state(format!(
                "thread '{}' is already a worker thread",
                current_thread_name()
            )));
        }
        let lease = self.new_worker_lease();
        self.lock_all(&[Arc::clone(&lease) as SharedResourceLock])?;
        tracing::debug!(lease = %lease, "worker started");
        Ok(WorkerLeaseCompletion::new(lease))
    }

    fn maybe_start_worker(&self) -> Result<WorkerLeaseCompletion> {
        if self.is_worker_thread() {
            Ok(WorkerLeaseCompletion::noop())
        } else {
            self.start_worker()
        }
    }

    fn with_locks<T, F>(&self, locks: &[SharedResourceLock], action: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let to_acquire = self.locks_not_held(locks)?;
        if to_acquire.is_empty() {
            return action();
        }
        self.acquire_locks(&to_acquire)?;
        let release = Restore::new("release locks", || self.unlock_all(&to_acquire));
        finish(action(), release)
    }

    fn without_locks<T, F>(&self, locks: &[SharedResourceLock], action: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        if locks.is_empty() {
            return action();
        }
        self.inner.coordination.with_state_lock(|state| {
            if let Some(lock) = locks
                .iter()
                .find(|lock| !lock.is_locked_by_current_thread(state))
            {
                return Err(Error::illegal_state(format!(
                    "lock '{}' is not held by the current thread",
                    lock.display_name()
                )));
            }
            for lock in locks {
                state.unlock(lock)?;
            }
            Ok(Disposition::Finished)
        })?;

        let reacquire = Restore::new("reacquire locks", || {
            if self.try_lock_all(locks)? {
                Ok(())
            } else {
                self.release_worker_leases_and_wait_for(locks)
            }
        });
        finish(action(), reacquire)
    }

    fn with_replaced_locks<T, F>(
        &self,
        current: &[SharedResourceLock],
        new: &[SharedResourceLock],
        action: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        if new.iter().all(|lock| contains_lock(current, lock)) {
            return action();
        }
        self.unlock_all(current)?;
        let restore_current = Restore::new("reacquire replaced locks", || {
            self.acquire_locks(current)
        });
        self.acquire_locks(new)?;
        let release_new = Restore::new("release replacement locks", || self.unlock_all(new));
        let result = finish(action(), release_new);
        finish(result, restore_current)
    }

    fn blocking<T, F>(&self, action: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let locks: Vec<SharedResourceLock> = self
            .get_current_project_locks()
            .into_iter()
            .chain(self.current_worker_leases())
            .collect();
        self.without_locks(&locks, action)
    }

    fn max_worker_count(&self) -> usize {
        self.inner.tree.root.max_workers()
    }

    fn stop(&self) -> Result<()> {
        self.inner.coordination.with_state_lock(|_state| {
            let leases = self.inner.tree.leases.container();
            if leases.has_open_locks() {
                return Err(Error::illegal_state(format!(
                    "some worker leases have not been marked as completed: {}",
                    leases.open_lock_names().join(", ")
                )));
            }
            let projects = self.inner.projects.container();
            if projects.has_open_locks() {
                return Err(Error::illegal_state(format!(
                    "some project locks have not been released: {}",
                    projects.open_lock_names().join(", ")
                )));
            }
            Ok(Disposition::Finished)
        })?;
        tracing::debug!("worker lease service stopped");
        Ok(())
    }
}

impl fmt::Debug for DefaultWorkerLeaseService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultWorkerLeaseService")
            .field("tree", &self.inner.tree)
            .field("projects", &self.inner.projects)
            .finish()
    }
}

/// Undoes a lock change when dropped, unless finished explicitly first.
struct Restore<F>
where
    F: FnMut() -> Result<()>,
{
    what: &'static str,
    restore: Option<F>,
}

impl<F> Restore<F>
where
    F: FnMut() -> Result<()>,
{
    const fn new(what: &'static str, restore: F) -> Self {
        Self {
            what,
            restore: Some(restore),
        }
    }

    fn finish(mut self) -> Result<()> {
        self.restore.take().map_or(Ok(()), |mut restore| restore())
    }
}

impl<F> Drop for Restore<F>
where
    F: FnMut() -> Result<()>,
{
    fn drop(&mut self) {
        if let Some(mut restore) = self.restore.take() {
            if let Err(err) = restore() {
                tracing::error!(step = self.what, error = %err, "failed to restore locks while unwinding");
            }
        }
    }
}

/// Run the restore step, preferring the action's error over the restore's.
fn finish<T, F>(result: Result<T>, restore: Restore<F>) -> Result<T>
where
    F: FnMut() -> Result<()>,
{
    let restored = restore.finish();
    let value = result?;
    restored?;
    Ok(value)
}
