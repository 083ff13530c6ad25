//! Resource locks and their coordination.
//!
//! # Module Structure
//!
//! - `lock`: the [`ResourceLock`] trait and the per-transform [`ResourceLockState`]
//! - `coordination`: the [`ResourceLockCoordinationService`] and the `lock` /
//!   `try_lock` / `unlock` transforms
//! - `container`: which thread holds which of a registry's locks
//! - `registry`: name-keyed lock caches
//! - `exclusive`: the plain exclusive lock
//! - `project_locks`: project locks keyed by identity path

mod container;
pub mod coordination;
mod exclusive;
mod lock;
mod project_locks;
mod registry;

pub use container::ResourceLockContainer;
pub use coordination::ResourceLockCoordinationService;
pub use exclusive::ExclusiveAccessResourceLock;
pub(crate) use lock::current_thread_name;
pub use lock::{
    contains_lock, same_lock, Disposition, ResourceLock, ResourceLockState, SharedResourceLock,
};
pub use project_locks::{IdentityPath, ProjectLockRegistry};
pub use registry::ResourceLockRegistry;
