//! One exclusive lock per project, or per build when projects run serially.

use std::{
    collections::HashMap,
    fmt,
    sync::Arc,
    thread::{self, ThreadId},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{
    container::ResourceLockContainer, exclusive::ExclusiveAccessResourceLock,
    lock::SharedResourceLock, registry::ResourceLockRegistry,
};

/// Fully qualified identity of a build or project, e.g. `:` or `:app:lib`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityPath(String);

impl IdentityPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for IdentityPath {
    fn from(path: String) -> Self {
        Self(path)
    }
}

/// Hands out project locks.
///
/// With parallel project execution every project gets its own lock. Without it,
/// all projects of a build share the build's lock, so at most one project of the
/// build is touched at a time.
#[derive(Debug)]
pub struct ProjectLockRegistry {
    locks: ResourceLockRegistry<ExclusiveAccessResourceLock>,
    parallel: bool,
    uncontrolled: Mutex<HashMap<ThreadId, usize>>,
}

impl ProjectLockRegistry {
    #[must_use]
    pub fn new(parallel: bool) -> Self {
        Self {
            locks: ResourceLockRegistry::new(),
            parallel,
            uncontrolled: Mutex::new(HashMap::new()),
        }
    }

    /// Whether projects of one build may be locked independently.
    pub const fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// The lock guarding `project_path`.
    pub fn get_project_lock(
        &self,
        build_path: &IdentityPath,
        project_path: &IdentityPath,
    ) -> Arc<ExclusiveAccessResourceLock> {
        let key = if self.parallel {
            project_path
        } else {
            build_path
        };
        self.locks
            .get_or_register(key.as_str(), ExclusiveAccessResourceLock::new)
    }

    /// Project locks held by the calling thread, oldest first.
    pub fn current_project_locks(&self) -> Vec<SharedResourceLock> {
        self.locks.shared_locks_held_by_current_thread()
    }

    /// Whether any thread holds a project lock.
    pub fn has_open_locks(&self) -> bool {
        self.locks.has_open_locks()
    }

    pub fn container(&self) -> &Arc<ResourceLockContainer> {
        self.locks.container()
    }

    /// Run `action` with the calling thread allowed to touch any project state.
    pub fn allow_uncontrolled_access<T>(&self, action: impl FnOnce() -> T) -> T {
        let thread_id = thread::current().id();
        *self.uncontrolled.lock().entry(thread_id).or_default() += 1;
        let _reset = UncontrolledAccessGuard {
            uncontrolled: &self.uncontrolled,
            thread_id,
        };
        action()
    }

    /// Whether the calling thread is inside [`Self::allow_uncontrolled_access`].
    pub fn is_allowed_uncontrolled_access(&self) -> bool {
        self.uncontrolled
            .lock()
            .contains_key(&thread::current().id())
    }
}

struct UncontrolledAccessGuard<'a> {
    uncontrolled: &'a Mutex<HashMap<ThreadId, usize>>,
    thread_id: ThreadId,
}

impl Drop for UncontrolledAccessGuard<'_> {
    fn drop(&mut self) {
        let mut uncontrolled = self.uncontrolled.lock();
        if let Some(depth) = uncontrolled.get_mut(&self.thread_id) {
            *depth -= 1;
            if *depth == 0 {
                uncontrolled.remove(&self.thread_id);
            }
        }
    }
}
