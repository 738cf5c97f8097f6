//! Elastic pool behavior: execution, growth bounds, shutdown.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use work_scheduler::{FnWork, Scheduler, ThreadPoolScheduler, ThreadPoolSettings, Work, WorkRef};

fn settings(min: usize, max: usize) -> ThreadPoolSettings {
    ThreadPoolSettings {
        min_thread: min,
        max_thread: max,
        ..ThreadPoolSettings::default()
    }
}

#[test]
fn pool_executes_every_admitted_item() {
    common::init();

    let pool = ThreadPoolScheduler::new("exec", settings(1, 4)).unwrap();
    pool.start();

    let count = Arc::new(AtomicUsize::new(0));
    let items: Vec<WorkRef> = (0..10)
        .map(|i| common::counted(&format!("item-{i}"), &count))
        .collect();
    for item in &items {
        assert!(pool.add_work(Arc::clone(item)));
    }
    for item in &items {
        assert!(
            item.state().wait_finish_for(Duration::from_secs(10)),
            "item {} did not complete",
            item.name()
        );
    }

    assert_eq!(count.load(Ordering::SeqCst), 10);
    pool.shutdown();
}

#[test]
fn worker_count_never_exceeds_the_ceiling() {
    common::init();

    let pool = ThreadPoolScheduler::new("bounded", settings(0, 2)).unwrap();
    pool.start();

    let in_flight = Arc::new(AtomicUsize::new(0));
    let high_water = Arc::new(AtomicUsize::new(0));
    let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(16);

    let items: Vec<WorkRef> = (0..8)
        .map(|i| {
            common::gated(
                &format!("gated-{i}"),
                release_rx.clone(),
                &in_flight,
                &high_water,
            )
        })
        .collect();
    for item in &items {
        assert!(pool.add_work(Arc::clone(item)));
        assert!(pool.worker_count() <= 2);
    }

    // let the admissions settle while the workers sit blocked
    thread::sleep(Duration::from_millis(200));
    assert!(pool.worker_count() <= 2);

    for _ in 0..items.len() {
        release_tx.send(()).unwrap();
    }
    for item in &items {
        assert!(item.state().wait_finish_for(Duration::from_secs(10)));
    }

    assert!(high_water.load(Ordering::SeqCst) <= 2);
    pool.shutdown();
}

#[test]
fn admission_grows_a_starved_pool() {
    common::init();

    // min 0: activation spawns nobody, the first admission must
    let pool = ThreadPoolScheduler::new("lazy", settings(0, 3)).unwrap();
    pool.start();
    assert_eq!(pool.worker_count(), 0);

    let count = Arc::new(AtomicUsize::new(0));
    let item = common::counted("first", &count);
    assert!(pool.add_work(Arc::clone(&item)));
    assert!(item.state().wait_finish_for(Duration::from_secs(10)));
    assert_eq!(count.load(Ordering::SeqCst), 1);
    pool.shutdown();
}

#[test]
fn shutdown_joins_workers_and_latches_admission() {
    common::init();

    let pool = ThreadPoolScheduler::new("stopping", settings(2, 4)).unwrap();
    pool.start();
    thread::sleep(Duration::from_millis(100));
    assert!(pool.worker_count() >= 2);

    pool.shutdown();
    assert_eq!(pool.worker_count(), 0);
    assert!(!pool.add_work(Arc::new(FnWork::new("late", || Ok(())))));
}

#[test]
fn shutdown_returns_promptly_with_idle_workers() {
    common::init();

    let pool = ThreadPoolScheduler::new("prompt", settings(3, 3)).unwrap();
    pool.start();
    thread::sleep(Duration::from_millis(100));

    let begun = Instant::now();
    pool.shutdown();
    assert!(begun.elapsed() < Duration::from_secs(5));
}

#[test]
fn panicking_payload_takes_only_its_worker() {
    common::init();

    let pool = ThreadPoolScheduler::new("panicky", settings(1, 3)).unwrap();
    pool.start();

    let bomb: WorkRef = Arc::new(FnWork::new("bomb", || panic!("payload blew up")));
    assert!(pool.add_work(Arc::clone(&bomb)));
    assert!(bomb.state().wait_finish_for(Duration::from_secs(10)));
    assert!(bomb.state().has_failure());

    // the pool still executes later admissions
    let count = Arc::new(AtomicUsize::new(0));
    let survivor = common::counted("survivor", &count);
    assert!(pool.add_work(Arc::clone(&survivor)));
    assert!(survivor.state().wait_finish_for(Duration::from_secs(10)));
    assert_eq!(count.load(Ordering::SeqCst), 1);
    pool.shutdown();
}
