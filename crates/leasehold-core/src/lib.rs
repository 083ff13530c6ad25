//! # Leasehold Core
//!
//! Worker leases, resource locks and lock-gated work queues for an in-process
//! build executor.
//!
//! ## Laws (Compiler Enforced)
//!
//! - No `unwrap()` - returns `Result` instead
//! - No `expect()` - returns `Result` instead
//! - No `panic!()` - returns `Result` instead
//! - No `unsafe` - safe Rust only
//! - No `todo!()` / `unimplemented!()` - complete implementations only
//!
//! ## Concurrency Model
//!
//! Every change of lock ownership happens inside a transform run by a
//! [`ResourceLockCoordinationService`]: one mutex, one broadcast condition.
//! A transform that cannot get all the locks it wants returns
//! [`Disposition::Retry`]; whatever it acquired is rolled back and the thread
//! waits until another thread releases a lock. No thread ever waits while
//! holding part of a lock set, so lock sets acquired in different orders do not
//! deadlock.
//!
//! Worker leases bound how many threads do work at once. They form a tree below
//! a fixed-capacity [`Root`]; see [`WorkerLeaseService`].
//!
//! ## Error Handling
//!
//! All fallible operations return `Result<T, Error>`. Contract violations
//! (illegal state, unsupported operations, worker-only calls off a worker
//! thread) are reported as errors; contention never is.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![forbid(unsafe_code)]

pub mod config;
mod error;
pub mod resources;
pub mod work;

pub use config::Config;
pub use error::{Error, ExecutionFailure, Result};
pub use resources::{
    Disposition, ExclusiveAccessResourceLock, IdentityPath, ProjectLockRegistry, ResourceLock,
    ResourceLockContainer, ResourceLockCoordinationService, ResourceLockRegistry,
    ResourceLockState, SharedResourceLock,
};
pub use work::{
    CancellationToken, ConditionalExecution, ConditionalExecutionQueue, DefaultExecutorFactory,
    DefaultWorkerLeaseService, DeferredExecution, ExecutorFactory, LeaseHolder, ManagedExecutor,
    ProjectLeaseRegistry, Root, StopShieldingWorkerLeaseService, Synchronizer, WorkerLease,
    WorkerLeaseCompletion, WorkerLeaseService, WorkerThreadRegistry,
};
