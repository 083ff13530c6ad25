//! A lease service view that cannot be stopped.

use std::sync::Arc;

use super::{
    lease::{WorkerLease, WorkerLeaseCompletion},
    service::{ProjectLeaseRegistry, WorkerLeaseService, WorkerThreadRegistry},
};
use crate::{
    resources::{ExclusiveAccessResourceLock, IdentityPath, SharedResourceLock},
    Result,
};

/// Forwards everything to the delegate except [`WorkerLeaseService::stop`].
///
/// Handed to nested sessions that share their parent's lease service and
/// must not end it.
#[derive(Debug, Clone)]
pub struct StopShieldingWorkerLeaseService<S> {
    delegate: S,
}

impl<S> StopShieldingWorkerLeaseService<S> {
    pub const fn new(delegate: S) -> Self {
        Self { delegate }
    }

    pub const fn delegate(&self) -> &S {
        &self.delegate
    }
}

impl<S: WorkerThreadRegistry> WorkerThreadRegistry for StopShieldingWorkerLeaseService<S> {
    fn run_as_worker_thread<T, F>(&self, action: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.delegate.run_as_worker_thread(action)
    }

    fn is_worker_thread(&self) -> bool {
        self.delegate.is_worker_thread()
    }
}

impl<S: ProjectLeaseRegistry> ProjectLeaseRegistry for StopShieldingWorkerLeaseService<S> {
    fn get_project_lock(
        &self,
        build_path: &IdentityPath,
        project_path: &IdentityPath,
    ) -> Arc<ExclusiveAccessResourceLock> {
        self.delegate.get_project_lock(build_path, project_path)
    }

    fn get_current_project_locks(&self) -> Vec<SharedResourceLock> {
        self.delegate.get_current_project_locks()
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
        self.delegate
            .with_project_lock(build_path, project_path, action)
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
        self.delegate
            .try_with_project_lock(build_path, project_path, action)
    }

    fn without_project_lock<T, F>(&self, action: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.delegate.without_project_lock(action)
    }

    fn allow_uncontrolled_access_to_any_project<T, F>(&self, action: F) -> T
    where
        F: FnOnce() -> T,
    {
        self.delegate.allow_uncontrolled_access_to_any_project(action)
    }

    fn is_allowed_uncontrolled_access_to_any_project(&self) -> bool {
        self.delegate.is_allowed_uncontrolled_access_to_any_project()
    }
}

impl<S: WorkerLeaseService> WorkerLeaseService for StopShieldingWorkerLeaseService<S> {
    fn get_worker_lease(&self) -> Arc<WorkerLease> {
        self.delegate.get_worker_lease()
    }

    fn get_current_worker_lease(&self) -> Result<Arc<WorkerLease>> {
        self.delegate.get_current_worker_lease()
    }

    fn new_worker_lease(&self) -> Arc<WorkerLease> {
        self.delegate.new_worker_lease()
    }

    fn start_worker(&self) -> Result<WorkerLeaseCompletion> {
        self.delegate.start_worker()
    }

    fn maybe_start_worker(&self) -> Result<WorkerLeaseCompletion> {
        self.delegate.maybe_start_worker()
    }

    fn with_locks<T, F>(&self, locks: &[SharedResourceLock], action: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.delegate.with_locks(locks, action)
    }

    fn without_locks<T, F>(&self, locks: &[SharedResourceLock], action: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.delegate.without_locks(locks, action)
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
        self.delegate.with_replaced_locks(current, new, action)
    }

    fn blocking<T, F>(&self, action: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.delegate.blocking(action)
    }

    fn max_worker_count(&self) -> usize {
        self.delegate.max_worker_count()
    }

    fn stop(&self) -> Result<()> {
        tracing::debug!("ignoring stop of shielded worker lease service");
        Ok(())
    }
}
