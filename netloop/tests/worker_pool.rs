use netloop::Error;
use netloop::runtime::WorkerPool;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[test]
fn test_runs_every_task() {
    let mut pool = WorkerPool::new(4, 16).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..200 {
        let counter = counter.clone();
        pool.submit(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }

    pool.shutdown();
    assert_eq!(counter.load(Ordering::SeqCst), 200);
}

#[test]
fn test_submit_blocks_when_queue_full() {
    let pool = Arc::new(WorkerPool::new(1, 1).unwrap());
    let (release, gate) = mpsc::channel::<()>();
    let (started_tx, started_rx) = mpsc::channel::<()>();

    // Occupy the only worker.
    pool.submit(move || {
        started_tx.send(()).unwrap();
        gate.recv().unwrap();
    })
    .unwrap();
    started_rx.recv().unwrap();

    // Fill the queue.
    pool.submit(|| {}).unwrap();
    assert_eq!(pool.queued(), 1);

    let returned = Arc::new(AtomicBool::new(false));
    let submitter = {
        let pool = pool.clone();
        let returned = returned.clone();
        thread::spawn(move || {
            pool.submit(|| {}).unwrap();
            returned.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(150));
    assert!(
        !returned.load(Ordering::SeqCst),
        "submit returned while the queue was full"
    );

    release.send(()).unwrap();
    submitter.join().unwrap();
    assert!(returned.load(Ordering::SeqCst));
}

#[test]
fn test_panicking_task_does_not_kill_worker() {
    let mut pool = WorkerPool::new(1, 4).unwrap();
    let ran = Arc::new(AtomicUsize::new(0));

    pool.submit(|| panic!("task failure")).unwrap();

    for _ in 0..3 {
        let ran = ran.clone();
        pool.submit(move || {
            ran.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }

    pool.shutdown();
    assert_eq!(ran.load(Ordering::SeqCst), 3);
}

#[test]
fn test_shutdown_drains_queued_tasks() {
    let mut pool = WorkerPool::new(1, 8).unwrap();
    let done = Arc::new(AtomicUsize::new(0));

    for _ in 0..8 {
        let done = done.clone();
        pool.submit(move || {
            thread::sleep(Duration::from_millis(5));
            done.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }

    pool.shutdown();
    assert_eq!(done.load(Ordering::SeqCst), 8);
}

#[test]
fn test_submit_after_shutdown_is_rejected() {
    let mut pool = WorkerPool::new(2, 2).unwrap();
    pool.shutdown();

    let err = pool.submit(|| {}).unwrap_err();
    assert!(matches!(err, Error::PoolClosed));

    // Second shutdown is a no-op.
    pool.shutdown();
}

#[test]
fn test_tasks_spread_over_workers() {
    let mut pool = WorkerPool::new(4, 16).unwrap();
    assert_eq!(pool.worker_count(), 4);
    assert_eq!(pool.capacity(), 16);

    let names = Arc::new(Mutex::new(HashSet::new()));
    let barrier = Arc::new(std::sync::Barrier::new(4));

    for _ in 0..4 {
        let names = names.clone();
        let barrier = barrier.clone();
        pool.submit(move || {
            barrier.wait();
            let name = thread::current().name().unwrap_or_default().to_owned();
            names.lock().unwrap().insert(name);
        })
        .unwrap();
    }

    pool.shutdown();

    let names = names.lock().unwrap();
    assert_eq!(names.len(), 4);
    assert!(names.iter().all(|n| n.starts_with("netloop-worker-")));
}
