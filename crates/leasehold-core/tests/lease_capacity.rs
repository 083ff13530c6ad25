//! Worker lease capacity scenarios.
//!
//! - Saturation: with two worker slots, a third thread waits until a slot frees
//! - Containment: children never outlive their parent
//! - Borrowing: a parent lends its slot to its first child only

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc, Barrier,
    },
    thread,
    time::Duration,
};

use common::{join, lease_service};
use leasehold_core::{
    resources::coordination, Error, Result, SharedResourceLock, WorkerLeaseService,
    WorkerThreadRegistry,
};
use proptest::prelude::*;

// ═══════════════════════════════════════════════════════════════════════════
// SATURATION
// ═══════════════════════════════════════════════════════════════════════════

/// GIVEN: a service with two worker slots and two threads holding them
/// WHEN: a third thread asks to run as a worker
/// THEN: it runs only after one of the first two has finished
#[test]
fn test_third_worker_waits_for_free_slot() -> Result<()> {
    let service = lease_service(2, true);
    let holding = Arc::new(Barrier::new(3));
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Arc::new(parking_lot::Mutex::new(release_rx));
    let concurrent = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let holders: Vec<_> = (0..2)
        .map(|_| {
            let service = service.clone();
            let holding = Arc::clone(&holding);
            let release_rx = Arc::clone(&release_rx);
            let concurrent = Arc::clone(&concurrent);
            let peak = Arc::clone(&peak);
            thread::spawn(move || {
                service.run_as_worker_thread(|| {
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    holding.wait();
                    let _ = release_rx.lock().recv();
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
        })
        .collect();

    holding.wait();
    assert_eq!(service.leases_in_use()?, 2);

    let third_ran = Arc::new(AtomicUsize::new(0));
    let third = {
        let service = service.clone();
        let third_ran = Arc::clone(&third_ran);
        let concurrent = Arc::clone(&concurrent);
        let peak = Arc::clone(&peak);
        thread::spawn(move || {
            service.run_as_worker_thread(|| {
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                third_ran.fetch_add(1, Ordering::SeqCst);
                concurrent.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert_eq!(third_ran.load(Ordering::SeqCst), 0, "third worker ran while saturated");

    release_tx.send(()).map_err(|e| Error::illegal_state(e.to_string()))?;
    join(third)?;
    assert_eq!(third_ran.load(Ordering::SeqCst), 1);

    release_tx.send(()).map_err(|e| Error::illegal_state(e.to_string()))?;
    for holder in holders {
        join(holder)?;
    }

    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert_eq!(service.leases_in_use()?, 0);
    service.stop()
}

// ═══════════════════════════════════════════════════════════════════════════
// CONTAINMENT AND BORROWING
// ═══════════════════════════════════════════════════════════════════════════

/// GIVEN: a worker with an active child lease
/// WHEN: the worker tries to release its own lease first
/// THEN: the release is rejected until the child is finished
#[test]
fn test_parent_cannot_release_before_children() -> Result<()> {
    let service = lease_service(2, true);
    let completion = service.start_worker()?;
    let parent = service.get_current_worker_lease()?;
    let child = parent.start_child()?;

    let parent_lock: SharedResourceLock = parent.clone();
    let result = service
        .coordination()
        .with_state_lock(coordination::unlock(&[Arc::clone(&parent_lock)]));
    assert!(matches!(result, Err(Error::IllegalState(_))));

    child.lease_finish()?;
    completion.lease_finish()?;
    service.stop()
}

/// GIVEN: a single worker slot held by a parent
/// WHEN: the parent starts a first and then a second child
/// THEN: the first child borrows the parent's slot, the second cannot be granted
#[test]
fn test_first_child_borrows_parent_slot() -> Result<()> {
    let service = lease_service(1, true);
    let completion = service.start_worker()?;
    let parent = service.get_current_worker_lease()?;

    let first = parent.start_child()?;
    assert_eq!(service.leases_in_use()?, 1);

    let second = parent.create_child()?;
    let second_lock: SharedResourceLock = second;
    let granted = service
        .coordination()
        .with_state_lock(coordination::try_lock(&[second_lock]))?;
    assert!(!granted, "second child must be paid for by a full root");

    first.lease_finish()?;
    completion.lease_finish()?;
    service.stop()
}

/// GIVEN: a worker lease created on one thread
/// WHEN: another thread tries to acquire it
/// THEN: the attempt is rejected as unsupported
#[test]
fn test_lease_is_bound_to_creating_thread() -> Result<()> {
    let service = lease_service(2, true);
    let lease: SharedResourceLock = service.new_worker_lease();

    let other = {
        let service = service.clone();
        thread::spawn(move || {
            service
                .coordination()
                .with_state_lock(coordination::lock(&[lease]))
        })
    };

    assert!(matches!(join(other), Err(Error::UnsupportedOperation(_))));
    service.stop()
}

// ═══════════════════════════════════════════════════════════════════════════
// PROPERTIES
// ═══════════════════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Root usage equals the number of granted top-level workers plus every
    /// child beyond the first, and never exceeds capacity.
    #[test]
    fn prop_root_usage_matches_lease_arithmetic(
        max_workers in 1_usize..6,
        requested_children in 0_usize..6,
    ) {
        let service = lease_service(max_workers, true);
        let completion = service.start_worker().unwrap();
        let parent = service.get_current_worker_lease().unwrap();

        let mut children = Vec::new();
        for _ in 0..requested_children {
            let child: SharedResourceLock = parent.create_child().unwrap();
            let granted = service
                .coordination()
                .with_state_lock(coordination::try_lock(&[Arc::clone(&child)]))
                .unwrap();
            if !granted {
                break;
            }
            children.push(child);
        }

        let in_use = service.leases_in_use().unwrap();
        let paid_children = children.len().saturating_sub(1);
        prop_assert_eq!(in_use, 1 + paid_children);
        prop_assert!(in_use <= max_workers);
        prop_assert_eq!(
            children.len(),
            requested_children.min(max_workers)
        );

        for child in children.iter().rev() {
            service
                .coordination()
                .with_state_lock(coordination::unlock(&[Arc::clone(child)]))
                .unwrap();
        }
        prop_assert_eq!(service.leases_in_use().unwrap(), 1);

        completion.lease_finish().unwrap();
        prop_assert_eq!(service.leases_in_use().unwrap(), 0);
        prop_assert!(service.stop().is_ok());
    }
}
