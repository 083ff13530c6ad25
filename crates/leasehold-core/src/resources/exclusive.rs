//! A plain exclusive resource lock.

use std::{
    any::Any,
    fmt,
    sync::Arc,
    thread::{self, ThreadId},
};

use parking_lot::Mutex;

use super::{
    container::ResourceLockContainer,
    lock::{ResourceLock, ResourceLockState},
};
use crate::{Error, Result};

/// A lock owned by at most one thread, released only by its owner.
///
/// Used for project locks and to gate conditional executions.
pub struct ExclusiveAccessResourceLock {
    display_name: String,
    container: Option<Arc<ResourceLockContainer>>,
    // Only mutated from inside coordination transforms.
    owner: Mutex<Option<ThreadId>>,
}

impl ExclusiveAccessResourceLock {
    /// Create a lock tracked by `container`.
    pub fn new(display_name: &str, container: Arc<ResourceLockContainer>) -> Self {
        Self {
            display_name: display_name.to_string(),
            container: Some(container),
            owner: Mutex::new(None),
        }
    }

    /// Create a lock that belongs to no registry.
    pub fn untracked(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            container: None,
            owner: Mutex::new(None),
        }
    }
}

impl ResourceLock for ExclusiveAccessResourceLock {
    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn is_locked(&self, _state: &ResourceLockState) -> bool {
        self.owner.lock().is_some()
    }

    fn is_locked_by_current_thread(&self, _state: &ResourceLockState) -> bool {
        *self.owner.lock() == Some(thread::current().id())
    }

    fn acquire_lock(&self, _state: &ResourceLockState) -> Result<bool> {
        let mut owner = self.owner.lock();
        if owner.is_some() {
            return Ok(false);
        }
        *owner = Some(thread::current().id());
        Ok(true)
    }

    fn release_lock(&self, _state: &ResourceLockState) -> Result<()> {
        let mut owner = self.owner.lock();
        if *owner != Some(thread::current().id()) {
            return Err(Error::illegal_state(format!(
                "cannot release lock '{}' from a thread that does not hold it",
                self.display_name
            )));
        }
        *owner = None;
        Ok(())
    }

    fn container(&self) -> Option<&ResourceLockContainer> {
        self.container.as_deref()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl fmt::Debug for ExclusiveAccessResourceLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusiveAccessResourceLock")
            .field("display_name", &self.display_name)
            .field("owner", &*self.owner.lock())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ExclusiveAccessResourceLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{
        coordination, Disposition, ResourceLockCoordinationService, SharedResourceLock,
    };

    #[test]
    fn test_only_one_thread_owns_the_lock() -> Result<()> {
        let service = Arc::new(ResourceLockCoordinationService::new());
        let lock: SharedResourceLock = Arc::new(ExclusiveAccessResourceLock::untracked("x"));

        assert!(service.with_state_lock(coordination::try_lock(&[Arc::clone(&lock)]))?);

        let other = {
            let service = Arc::clone(&service);
            let lock = Arc::clone(&lock);
            thread::spawn(move || service.with_state_lock(coordination::try_lock(&[lock])))
        };
        let acquired_elsewhere = other.join().map_err(|_| Error::illegal_state("join"))??;
        assert!(!acquired_elsewhere);

        service.with_state_lock(coordination::unlock(&[lock]))?;
        Ok(())
    }

    #[test]
    fn test_try_lock_twice_on_owner_thread_succeeds() -> Result<()> {
        let service = ResourceLockCoordinationService::new();
        let lock: SharedResourceLock = Arc::new(ExclusiveAccessResourceLock::untracked("x"));

        assert!(service.with_state_lock(coordination::try_lock(&[Arc::clone(&lock)]))?);
        assert!(service.with_state_lock(coordination::try_lock(&[Arc::clone(&lock)]))?);
        service.with_state_lock(coordination::unlock(&[lock]))?;
        Ok(())
    }

    #[test]
    fn test_release_from_other_thread_is_illegal() -> Result<()> {
        let service = Arc::new(ResourceLockCoordinationService::new());
        let lock: SharedResourceLock = Arc::new(ExclusiveAccessResourceLock::untracked("x"));
        service.with_state_lock(coordination::lock(&[Arc::clone(&lock)]))?;

        let other = {
            let service = Arc::clone(&service);
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                service.with_state_lock(|state| {
                    lock.release_lock(state)?;
                    Ok(Disposition::Finished)
                })
            })
        };
        let result = other.join().map_err(|_| Error::illegal_state("join"))?;
        assert!(matches!(result, Err(Error::IllegalState(_))));

        service.with_state_lock(coordination::unlock(&[lock]))?;
        Ok(())
    }

    #[test]
    fn test_debug_does_not_print_container() {
        let container = Arc::new(ResourceLockContainer::new());
        let lock = ExclusiveAccessResourceLock::new(":app", container);
        let rendered = format!("{lock:?}");
        assert!(rendered.contains(":app"));
        assert!(!rendered.contains("ResourceLockContainer"));
    }
}
