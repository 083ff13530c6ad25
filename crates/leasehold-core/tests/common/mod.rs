//! Common test utilities and relaxed clippy settings for leasehold-core integration tests

#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

use std::{sync::Arc, thread::JoinHandle};

use leasehold_core::{
    config::ParallelismConfig, DefaultWorkerLeaseService, Error, ResourceLockCoordinationService,
    Result,
};
use tracing_subscriber::EnvFilter;

/// Route `tracing` output to the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A lease service with its own coordination service.
pub fn lease_service(max_workers: usize, parallel_projects: bool) -> DefaultWorkerLeaseService {
    init_tracing();
    DefaultWorkerLeaseService::new(
        Arc::new(ResourceLockCoordinationService::new()),
        ParallelismConfig {
            max_workers,
            parallel_projects,
        },
    )
    .expect("test parallelism is valid")
}

/// Join a test thread, turning a panic into an error.
pub fn join<T>(handle: JoinHandle<Result<T>>) -> Result<T> {
    handle
        .join()
        .map_err(|payload| Error::from_panic(payload.as_ref()))?
}
