//! Conditional execution queue scenarios.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use common::{init_tracing, join};
use leasehold_core::{
    ConditionalExecution, ConditionalExecutionQueue, DefaultExecutorFactory, DeferredExecution,
    Error, ExclusiveAccessResourceLock, ResourceLockCoordinationService, Result,
    SharedResourceLock,
};

fn queue<T: Send + 'static>(max_workers: usize) -> Result<ConditionalExecutionQueue<T>> {
    init_tracing();
    ConditionalExecutionQueue::new(
        "scenario queue",
        max_workers,
        &DefaultExecutorFactory::new(),
        Arc::new(ResourceLockCoordinationService::new()),
    )
}

/// GIVEN: five executions gated by one shared lock and a pool of three workers
/// WHEN: all five are submitted at once
/// THEN: they run one at a time and every one of them completes
#[test]
fn test_shared_lock_serializes_executions() -> Result<()> {
    let queue = queue::<usize>(3)?;
    let gate: SharedResourceLock = Arc::new(ExclusiveAccessResourceLock::untracked("compiler"));
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let executions: Vec<_> = (0..5)
        .map(|i| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            DeferredExecution::shared(Arc::clone(&gate), move |_| {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(5));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(i)
            })
        })
        .collect();

    for execution in &executions {
        queue.submit(execution.clone())?;
    }
    for (i, execution) in executions.iter().enumerate() {
        assert_eq!(execution.await_result()?, i);
        assert!(execution.is_complete());
    }

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert!(queue.worker_count() <= 3);
    queue.stop()
}

/// GIVEN: executions gated by distinct locks
/// WHEN: they are submitted to a pool of three
/// THEN: up to three of them run at the same time
#[test]
fn test_distinct_locks_run_in_parallel() -> Result<()> {
    let queue = queue::<()>(3)?;
    let barrier = Arc::new(std::sync::Barrier::new(3));

    let executions: Vec<_> = (0..3)
        .map(|i| {
            let barrier = Arc::clone(&barrier);
            let lock: SharedResourceLock =
                Arc::new(ExclusiveAccessResourceLock::untracked(format!("task-{i}")));
            DeferredExecution::shared(lock, move |_| {
                barrier.wait();
                Ok(())
            })
        })
        .collect();

    for execution in &executions {
        queue.submit(execution.clone())?;
    }
    for execution in &executions {
        execution.await_result()?;
    }
    queue.stop()
}

/// GIVEN: one execution and several threads waiting on it
/// WHEN: the queue runs it
/// THEN: the work runs once and every waiter sees its value
#[test]
fn test_execution_runs_once_for_many_waiters() -> Result<()> {
    let queue = queue::<String>(2)?;
    let runs = Arc::new(AtomicUsize::new(0));
    let execution = {
        let runs = Arc::clone(&runs);
        let lock: SharedResourceLock = Arc::new(ExclusiveAccessResourceLock::untracked("output"));
        DeferredExecution::shared(lock, move |_| {
            runs.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(10));
            Ok("artifact.jar".to_string())
        })
    };

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let execution = Arc::clone(&execution);
            thread::spawn(move || execution.await_result())
        })
        .collect();
    queue.submit(execution.clone())?;

    for waiter in waiters {
        assert_eq!(join(waiter)?, "artifact.jar");
    }
    execution.execute();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    queue.stop()
}

/// GIVEN: an execution whose lock is held outside the queue
/// WHEN: the queue is stopped
/// THEN: the execution is cancelled and its waiters are released
#[test]
fn test_stop_releases_waiters_of_blocked_execution() -> Result<()> {
    init_tracing();
    let coordination = Arc::new(ResourceLockCoordinationService::new());
    let queue = ConditionalExecutionQueue::<u8>::new(
        "blocked",
        2,
        &DefaultExecutorFactory::new(),
        Arc::clone(&coordination),
    )?;
    let lock: SharedResourceLock = Arc::new(ExclusiveAccessResourceLock::untracked("held"));
    coordination.with_state_lock(leasehold_core::resources::coordination::lock(&[Arc::clone(
        &lock,
    )]))?;

    let execution = DeferredExecution::shared(Arc::clone(&lock), |_| Ok(1_u8));
    let waiter = {
        let execution = Arc::clone(&execution);
        thread::spawn(move || execution.await_result())
    };
    queue.submit(execution.clone())?;
    thread::sleep(Duration::from_millis(20));
    queue.stop()?;

    assert!(matches!(join(waiter), Err(Error::Cancelled(_))));
    assert!(execution.is_cancelled());
    coordination.with_state_lock(leasehold_core::resources::coordination::unlock(&[lock]))?;
    Ok(())
}
