//! Self-submitting scheduler composed over a thread pool.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use work_scheduler::{
    cancel_work, ReactivatingScheduler, Scheduler, ThreadPoolScheduler, ThreadPoolSettings, Work,
    WorkRef,
};

fn pool(name: &str) -> Arc<ThreadPoolScheduler> {
    let pool = ThreadPoolScheduler::new(
        name,
        ThreadPoolSettings {
            min_thread: 1,
            max_thread: 4,
            ..ThreadPoolSettings::default()
        },
    )
    .unwrap();
    pool.start();
    pool
}

#[test]
fn admitted_items_execute_on_the_outer_pool() {
    common::init();

    let outer = pool("re-outer");
    let scheduler = ReactivatingScheduler::new("re", outer.clone(), true);

    let count = Arc::new(AtomicUsize::new(0));
    let items: Vec<WorkRef> = (0..5)
        .map(|i| common::counted(&format!("forwarded-{i}"), &count))
        .collect();
    for item in &items {
        assert!(scheduler.add_work(Arc::clone(item)));
    }
    for item in &items {
        assert!(
            item.state().wait_finish_for(Duration::from_secs(10)),
            "item {} did not complete",
            item.name()
        );
    }
    assert_eq!(count.load(Ordering::SeqCst), 5);
    outer.shutdown();
}

#[test]
fn burst_admissions_all_complete() {
    common::init();

    let outer = pool("burst-outer");
    let scheduler = ReactivatingScheduler::new("burst", outer.clone(), true);

    let count = Arc::new(AtomicUsize::new(0));
    let items: Vec<WorkRef> = (0..50)
        .map(|i| common::counted(&format!("burst-{i}"), &count))
        .collect();

    let threads: Vec<_> = items
        .chunks(10)
        .map(|chunk| {
            let scheduler = Arc::clone(&scheduler);
            let chunk: Vec<WorkRef> = chunk.to_vec();
            std::thread::spawn(move || {
                for item in chunk {
                    assert!(scheduler.add_work(item));
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    for item in &items {
        assert!(item.state().wait_finish_for(Duration::from_secs(10)));
    }
    assert_eq!(count.load(Ordering::SeqCst), 50);
    outer.shutdown();
}

#[test]
fn cancelled_items_are_skipped_not_run() {
    common::init();

    let outer = pool("skip-outer");
    let scheduler = ReactivatingScheduler::new("skip", outer.clone(), true);

    let doomed_count = Arc::new(AtomicUsize::new(0));
    let doomed = common::counted("doomed", &doomed_count);
    assert!(cancel_work(&doomed));

    let live_count = Arc::new(AtomicUsize::new(0));
    let live = common::counted("live", &live_count);

    assert!(scheduler.add_work(Arc::clone(&doomed)));
    assert!(scheduler.add_work(Arc::clone(&live)));
    assert!(live.state().wait_finish_for(Duration::from_secs(10)));

    assert_eq!(doomed_count.load(Ordering::SeqCst), 0);
    assert_eq!(live_count.load(Ordering::SeqCst), 1);
    outer.shutdown();
}
