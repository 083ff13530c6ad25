//! Lazily populated, name-keyed lock caches.

use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::Mutex;

use super::{
    container::ResourceLockContainer,
    lock::{ResourceLock, SharedResourceLock},
};

/// Cache of lock objects keyed by display name.
///
/// Locks are created on first request through a factory closure and reused for
/// the lifetime of the registry. Every lock created here reports the registry's
/// [`ResourceLockContainer`], which is how the registry answers "which of my
/// locks does this thread hold".
pub struct ResourceLockRegistry<L> {
    container: Arc<ResourceLockContainer>,
    locks: Mutex<HashMap<String, Arc<L>>>,
}

impl<L> Default for ResourceLockRegistry<L> {
    fn default() -> Self {
        Self {
            container: Arc::new(ResourceLockContainer::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<L> ResourceLockRegistry<L>
where
    L: ResourceLock + 'static,
{
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The container shared by every lock of this registry.
    pub fn container(&self) -> &Arc<ResourceLockContainer> {
        &self.container
    }

    /// Return the lock registered under `display_name`, creating it if needed.
    ///
    /// The factory receives the name and the registry's container.
    pub fn get_or_register<F>(&self, display_name: &str, factory: F) -> Arc<L>
    where
        F: FnOnce(&str, Arc<ResourceLockContainer>) -> L,
    {
        let mut locks = self.locks.lock();
        if let Some(existing) = locks.get(display_name) {
            return Arc::clone(existing);
        }
        let lock = Arc::new(factory(display_name, Arc::clone(&self.container)));
        locks.insert(display_name.to_string(), Arc::clone(&lock));
        tracing::trace!(lock = %display_name, "registered lock");
        lock
    }

    /// The lock registered under `display_name`, if any.
    pub fn get(&self, display_name: &str) -> Option<Arc<L>> {
        self.locks.lock().get(display_name).cloned()
    }

    /// Drop registrations for which `keep` returns false.
    pub fn retain<F>(&self, mut keep: F)
    where
        F: FnMut(&Arc<L>) -> bool,
    {
        self.locks.lock().retain(|_, lock| keep(lock));
    }

    /// Number of registered locks.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }

    /// This registry's locks held by the calling thread, oldest first.
    pub fn locks_held_by_current_thread(&self) -> Vec<Arc<L>> {
        self.container
            .locks_held_by_current_thread()
            .into_iter()
            .filter_map(|lock| lock.into_any().downcast::<L>().ok())
            .collect()
    }

    /// Same as [`Self::locks_held_by_current_thread`], type-erased.
    pub fn shared_locks_held_by_current_thread(&self) -> Vec<SharedResourceLock> {
        self.container.locks_held_by_current_thread()
    }

    /// Whether any thread holds one of this registry's locks.
    pub fn has_open_locks(&self) -> bool {
        self.container.has_open_locks()
    }
}

impl<L> fmt::Debug for ResourceLockRegistry<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLockRegistry")
            .field("registered", &self.locks.lock().len())
            .field("container", &self.container)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        resources::{coordination, ExclusiveAccessResourceLock, ResourceLockCoordinationService},
        Result,
    };

    #[test]
    fn test_get_or_register_is_idempotent() {
        let registry = ResourceLockRegistry::<ExclusiveAccessResourceLock>::new();
        let first = registry.get_or_register(":app", ExclusiveAccessResourceLock::new);
        let second = registry.get_or_register(":app", |_, _| {
            ExclusiveAccessResourceLock::untracked("never created")
        });

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert_eq!(second.display_name(), ":app");
    }

    #[test]
    fn test_locks_held_by_current_thread_are_typed() -> Result<()> {
        let coordination = ResourceLockCoordinationService::new();
        let registry = ResourceLockRegistry::<ExclusiveAccessResourceLock>::new();
        let app: SharedResourceLock = registry.get_or_register(":app", ExclusiveAccessResourceLock::new);
        let lib: SharedResourceLock = registry.get_or_register(":lib", ExclusiveAccessResourceLock::new);

        coordination.with_state_lock(coordination::lock(&[Arc::clone(&app)]))?;

        let held = registry.locks_held_by_current_thread();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].display_name(), ":app");
        assert!(registry.has_open_locks());

        coordination.with_state_lock(coordination::unlock(&[app, lib]))?;
        assert!(registry.locks_held_by_current_thread().is_empty());
        assert!(!registry.has_open_locks());
        Ok(())
    }

    #[test]
    fn test_retain_prunes_registrations() {
        let registry = ResourceLockRegistry::<ExclusiveAccessResourceLock>::new();
        registry.get_or_register("a", ExclusiveAccessResourceLock::new);
        registry.get_or_register("b", ExclusiveAccessResourceLock::new);

        registry.retain(|lock| lock.display_name() == "b");

        assert!(registry.get("a").is_none());
        assert!(registry.get("b").is_some());
    }
}
