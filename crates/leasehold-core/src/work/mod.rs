//! Worker leases and the work that runs under them.
//!
//! # Module Structure
//!
//! - `lease`: the lease tree ([`Root`], [`WorkerLease`]) and lease completions
//! - `service`: the lease service traits and [`DefaultWorkerLeaseService`]
//! - `stop_shielding`: a service view whose `stop()` is a no-op
//! - `synchronizer`: worker-only mutual exclusion
//! - `executor`: named thread pools
//! - `conditional`: lock-gated deferred executions
//! - `queue`: the [`ConditionalExecutionQueue`]

pub mod conditional;
pub mod executor;
mod lease;
pub mod queue;
mod service;
mod stop_shielding;
mod synchronizer;

pub use conditional::{CancellationToken, ConditionalExecution, DeferredExecution};
pub use executor::{DefaultExecutorFactory, ExecutorFactory, Job, ManagedExecutor, ThreadExecutor};
pub use lease::{LeaseHolder, Root, WorkerLease, WorkerLeaseCompletion};
pub use queue::{ConditionalExecutionQueue, QueueState, SharedExecution};
pub use service::{
    DefaultWorkerLeaseService, ProjectLeaseRegistry, WorkerLeaseService, WorkerThreadRegistry,
};
pub use stop_shielding::StopShieldingWorkerLeaseService;
pub use synchronizer::Synchronizer;
