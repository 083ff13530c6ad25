//! The worker lease tree.
//!
//! A fixed-capacity [`Root`] hands out leases to top-level workers. A
//! [`WorkerLease`] may in turn grant child leases: its first child borrows the
//! parent's slot, every further child is paid for by the root.

use std::{
    any::Any,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    thread::{self, ThreadId},
};

use parking_lot::Mutex;

use crate::{
    resources::{
        coordination, ResourceLock, ResourceLockContainer, ResourceLockCoordinationService,
        ResourceLockRegistry, ResourceLockState, SharedResourceLock,
    },
    Error, Result,
};

/// Something that can grant a bounded number of child leases.
///
/// Both methods are only called from inside coordination transforms.
pub trait LeaseHolder: Send + Sync + fmt::Debug {
    fn holder_name(&self) -> &str;

    /// Grant one more child lease if capacity allows.
    fn grant_lease(&self, state: &ResourceLockState) -> bool;

    /// Take back a child lease granted earlier.
    fn release_lease(&self, state: &ResourceLockState);
}

/// The top of the lease tree, bounded by the maximum worker count.
#[derive(Debug)]
pub struct Root {
    max_workers: usize,
    in_use: Mutex<usize>,
}

impl Root {
    #[must_use]
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers,
            in_use: Mutex::new(0),
        }
    }

    pub const fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Leases currently granted by the root.
    pub fn leases_in_use(&self, _state: &ResourceLockState) -> usize {
        *self.in_use.lock()
    }
}

impl LeaseHolder for Root {
    fn holder_name(&self) -> &str {
        "root"
    }

    fn grant_lease(&self, _state: &ResourceLockState) -> bool {
        let mut in_use = self.in_use.lock();
        if *in_use < self.max_workers {
            *in_use += 1;
            tracing::trace!(in_use = *in_use, max = self.max_workers, "root granted lease");
            true
        } else {
            tracing::trace!(max = self.max_workers, "root at capacity");
            false
        }
    }

    fn release_lease(&self, _state: &ResourceLockState) {
        let mut in_use = self.in_use.lock();
        *in_use = in_use.saturating_sub(1);
    }
}

/// Shared state behind every lease of one lease service.
pub(crate) struct LeaseTree {
    pub(crate) coordination: Arc<ResourceLockCoordinationService>,
    pub(crate) root: Arc<Root>,
    pub(crate) leases: ResourceLockRegistry<WorkerLease>,
    next_worker_id: AtomicU64,
}

impl LeaseTree {
    pub(crate) fn new(
        coordination: Arc<ResourceLockCoordinationService>,
        max_workers: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            coordination,
            root: Arc::new(Root::new(max_workers)),
            leases: ResourceLockRegistry::new(),
            next_worker_id: AtomicU64::new(1),
        })
    }

    /// Create and register an unacquired lease owned by the calling thread.
    pub(crate) fn new_lease(self: &Arc<Self>, parent: Arc<dyn LeaseHolder>) -> Arc<WorkerLease> {
        let worker_id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let display_name = format!("{}.{worker_id}", parent.holder_name());

        // Leases referenced only by the registry are neither held nor in use.
        self.leases.retain(|lease| Arc::strong_count(lease) > 1);

        let tree = Arc::downgrade(self);
        self.leases
            .get_or_register(&display_name, move |name, container| WorkerLease {
                display_name: name.to_string(),
                owner: thread::current().id(),
                parent,
                root: Arc::clone(&self.root),
                coordination: Arc::clone(&self.coordination),
                container,
                tree,
                state: Mutex::new(LeaseState::default()),
            })
    }

    pub(crate) fn new_root_lease(self: &Arc<Self>) -> Arc<WorkerLease> {
        let root: Arc<dyn LeaseHolder> = Arc::clone(&self.root) as Arc<dyn LeaseHolder>;
        self.new_lease(root)
    }
}

impl fmt::Debug for LeaseTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseTree")
            .field("root", &self.root)
            .field("leases", &self.leases)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct LeaseState {
    active: bool,
    children: usize,
}

/// Permission for one thread to do work concurrently with others.
///
/// A lease belongs to the thread that created it and can only be acquired and
/// released there.
pub struct WorkerLease {
    display_name: String,
    owner: ThreadId,
    parent: Arc<dyn LeaseHolder>,
    root: Arc<Root>,
    coordination: Arc<ResourceLockCoordinationService>,
    container: Arc<ResourceLockContainer>,
    tree: Weak<LeaseTree>,
    state: Mutex<LeaseState>,
}

impl WorkerLease {
    /// Create an unacquired child lease owned by the calling thread.
    pub fn create_child(self: &Arc<Self>) -> Result<Arc<Self>> {
        let tree = self.tree.upgrade().ok_or_else(|| {
            Error::illegal_state(format!(
                "cannot create a child of lease '{}': its lease service is gone",
                self.display_name
            ))
        })?;
        let parent: Arc<dyn LeaseHolder> = Arc::clone(self) as Arc<dyn LeaseHolder>;
        Ok(tree.new_lease(parent))
    }

    /// Create a child lease and block until it is granted.
    pub fn start_child(self: &Arc<Self>) -> Result<WorkerLeaseCompletion> {
        let child = self.create_child()?;
        let shared: SharedResourceLock = Arc::clone(&child) as SharedResourceLock;
        self.coordination
            .with_state_lock(coordination::lock(&[shared]))?;
        Ok(WorkerLeaseCompletion::new(child))
    }

    /// Name of the parent holder.
    pub fn parent_name(&self) -> &str {
        self.parent.holder_name()
    }

    /// Child leases currently granted by this lease.
    pub fn children(&self, _state: &ResourceLockState) -> usize {
        self.state.lock().children
    }

    fn check_owner(&self, operation: &str) -> Result<()> {
        if thread::current().id() == self.owner {
            Ok(())
        } else {
            Err(Error::unsupported(format!(
                "cannot {operation} worker lease '{}' from a thread other than its owner",
                self.display_name
            )))
        }
    }
}

impl LeaseHolder for WorkerLease {
    fn holder_name(&self) -> &str {
        &self.display_name
    }

    fn grant_lease(&self, state: &ResourceLockState) -> bool {
        let borrowed = {
            let mut lease = self.state.lock();
            if lease.children == 0 {
                lease.children = 1;
                true
            } else {
                false
            }
        };
        if borrowed {
            tracing::trace!(lease = %self.display_name, "first child borrows parent lease");
            return true;
        }
        if self.root.grant_lease(state) {
            self.state.lock().children += 1;
            true
        } else {
            false
        }
    }

    fn release_lease(&self, state: &ResourceLockState) {
        let remaining = {
            let mut lease = self.state.lock();
            lease.children = lease.children.saturating_sub(1);
            lease.children
        };
        if remaining > 0 {
            self.root.release_lease(state);
        }
    }
}

impl ResourceLock for WorkerLease {
    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn is_locked(&self, _state: &ResourceLockState) -> bool {
        self.state.lock().active
    }

    fn is_locked_by_current_thread(&self, state: &ResourceLockState) -> bool {
        self.is_locked(state) && thread::current().id() == self.owner
    }

    fn acquire_lock(&self, state: &ResourceLockState) -> Result<bool> {
        self.check_owner("acquire")?;
        if self.state.lock().active {
            return Ok(false);
        }
        if !self.parent.grant_lease(state) {
            tracing::trace!(lease = %self.display_name, "worker lease not available");
            return Ok(false);
        }
        self.state.lock().active = true;
        Ok(true)
    }

    fn release_lock(&self, state: &ResourceLockState) -> Result<()> {
        self.check_owner("release")?;
        {
            let mut lease = self.state.lock();
            if lease.children != 0 {
                return Err(Error::illegal_state(format!(
                    "cannot release worker lease '{}' while it has {} active child lease(s)",
                    self.display_name, lease.children
                )));
            }
            lease.active = false;
        }
        self.parent.release_lease(state);
        Ok(())
    }

    fn container(&self) -> Option<&ResourceLockContainer> {
        Some(&self.container)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl fmt::Debug for WorkerLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WorkerLease")
            .field("display_name", &self.display_name)
            .field("owner", &self.owner)
            .field("parent", &self.parent.holder_name())
            .field("active", &state.active)
            .field("children", &state.children)
            .finish()
    }
}

impl fmt::Display for WorkerLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name)
    }
}

/// Handle to an acquired lease; finishing it releases the lease.
///
/// Dropping an unfinished completion releases the lease too, with a warning.
#[must_use = "an unfinished completion releases its lease when dropped"]
#[derive(Debug)]
pub struct WorkerLeaseCompletion {
    lease: Option<Arc<WorkerLease>>,
}

impl WorkerLeaseCompletion {
    pub(crate) const fn new(lease: Arc<WorkerLease>) -> Self {
        Self { lease: Some(lease) }
    }

    /// A completion that releases nothing.
    pub(crate) const fn noop() -> Self {
        Self { lease: None }
    }

    /// The lease this completion releases, if any.
    pub fn lease(&self) -> Option<&Arc<WorkerLease>> {
        self.lease.as_ref()
    }

    /// Release the lease.
    pub fn lease_finish(mut self) -> Result<()> {
        self.lease.take().map_or(Ok(()), |lease| release(&lease))
    }
}

impl Drop for WorkerLeaseCompletion {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            tracing::warn!(lease = %lease, "worker lease completion dropped without lease_finish");
            if let Err(err) = release(&lease) {
                tracing::error!(lease = %lease, error = %err, "failed to release worker lease");
            }
        }
    }
}

fn release(lease: &Arc<WorkerLease>) -> Result<()> {
    let shared: SharedResourceLock = Arc::clone(lease) as SharedResourceLock;
    lease
        .coordination
        .with_state_lock(coordination::unlock(&[shared]))
        .map(|_| ())
}
