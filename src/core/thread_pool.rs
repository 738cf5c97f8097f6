//! Elastic worker-pool scheduler.
//!
//! Workers block in `poll_work` and execute dispatched items via `run_work`.
//! The pool grows on demand up to `max_thread`: an admission that finds no
//! idle worker spawns one, and the initial head count is sized from the queue
//! depth at activation. Workers are never force-killed; they exit when
//! polling observes cancellation, and a panicking payload takes its worker
//! down with it (a drop guard deregisters the worker either way).

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::config::ThreadPoolSettings;
use crate::core::error::{AppResult, SchedulerError};
use crate::core::notify::WorkListener;
use crate::core::scheduler::{Scheduler, SchedulerCore};
use crate::core::work::{run_work, Work, WorkRef, WorkState};
use crate::util::WorkThreadFactory;

/// Scheduler executing dispatched items on an elastic pool of named worker
/// threads.
pub struct ThreadPoolScheduler {
    core: SchedulerCore,
    min_thread: usize,
    max_thread: usize,
    workers: Mutex<HashMap<u64, JoinHandle<()>>>,
    next_worker_id: AtomicU64,
    idle_workers: AtomicUsize,
    active: AtomicBool,
    factory: WorkThreadFactory,
    self_weak: Weak<ThreadPoolScheduler>,
}

impl ThreadPoolScheduler {
    /// Creates an inactive pool. Workers are not spawned until the first
    /// activation ([`Scheduler::schedule_works`]).
    pub fn new(
        name: impl Into<String>,
        settings: ThreadPoolSettings,
    ) -> Result<Arc<Self>, SchedulerError> {
        let name = name.into();
        let factory = WorkThreadFactory::new(name.clone());
        Self::with_factory(name, settings, factory)
    }

    /// Creates an inactive pool with an explicit thread factory.
    pub fn with_factory(
        name: impl Into<String>,
        settings: ThreadPoolSettings,
        factory: WorkThreadFactory,
    ) -> Result<Arc<Self>, SchedulerError> {
        settings.validate()?;
        let name = name.into();
        let pool = Arc::new_cyclic(|weak: &Weak<ThreadPoolScheduler>| {
            let core = SchedulerCore::new(name, settings.scheduler.schedule_by_sequence);
            core.set_check_work_interval(settings.scheduler.check_work_interval());
            core.bind_listener(weak.clone() as Weak<dyn WorkListener>);
            Self {
                core,
                min_thread: settings.min_thread,
                max_thread: settings.max_thread,
                workers: Mutex::new(HashMap::new()),
                next_worker_id: AtomicU64::new(1),
                idle_workers: AtomicUsize::new(0),
                active: AtomicBool::new(false),
                factory,
                self_weak: weak.clone(),
            }
        });
        Ok(pool)
    }

    /// Workers kept even when the queue is empty.
    pub fn min_thread(&self) -> usize {
        self.min_thread
    }

    /// Hard ceiling on live workers.
    pub fn max_thread(&self) -> usize {
        self.max_thread
    }

    /// Live workers right now (snapshot).
    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Workers currently blocked waiting for work (snapshot).
    pub fn idle_worker_count(&self) -> usize {
        self.idle_workers.load(Ordering::SeqCst)
    }

    /// Whether the pool has been activated.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Activates the pool, sizing the initial worker head count from the
    /// current queue depth.
    pub fn start(&self) {
        self.schedule_works();
    }

    fn initial_worker_count(&self, depth: usize) -> usize {
        let sized = if depth <= self.min_thread {
            self.min_thread
        } else if depth > self.max_thread * 2 {
            self.max_thread
        } else {
            self.min_thread + (depth - self.min_thread) / 2
        };
        let sized = sized.min(self.max_thread);
        if depth > 0 {
            sized.max(1)
        } else {
            sized
        }
    }

    /// Spawns one worker unless the pool is already at its ceiling. The
    /// worker map lock is held across spawn and insert so a concurrent exit
    /// cannot race the registration.
    fn spawn_worker(&self) {
        let mut workers = self.workers.lock();
        if workers.len() >= self.max_thread {
            return;
        }
        let worker_id = self.next_worker_id.fetch_add(1, Ordering::SeqCst);
        let weak = self.self_weak.clone();
        match self.factory.spawn(move || worker_loop(weak, worker_id)) {
            Ok(handle) => {
                workers.insert(worker_id, handle);
                debug!(
                    pool = %self.core.state().name(),
                    worker_id,
                    live = workers.len(),
                    "worker spawned"
                );
            }
            Err(err) => {
                error!(
                    pool = %self.core.state().name(),
                    error = %err,
                    "failed to spawn worker"
                );
            }
        }
    }

    fn remove_worker(&self, worker_id: u64) {
        let mut workers = self.workers.lock();
        workers.remove(&worker_id);
        debug!(
            pool = %self.core.state().name(),
            worker_id,
            live = workers.len(),
            "worker exited"
        );
    }

    fn grow_if_starved(&self) {
        if self.is_active()
            && self.idle_workers.load(Ordering::SeqCst) == 0
            && self.worker_count() < self.max_thread
        {
            self.spawn_worker();
        }
    }
}

fn worker_loop(pool: Weak<ThreadPoolScheduler>, worker_id: u64) {
    // Deregisters the worker on every exit path, panics included.
    let _exit = WorkerExit {
        pool: pool.clone(),
        worker_id,
    };
    loop {
        let Some(owner) = pool.upgrade() else { break };
        owner.idle_workers.fetch_add(1, Ordering::SeqCst);
        let dispatched = owner.poll_work();
        owner.idle_workers.fetch_sub(1, Ordering::SeqCst);
        match dispatched {
            Some(work) => {
                drop(owner);
                execute_dispatched(&pool, work);
            }
            None => break,
        }
    }
}

/// Runs one dispatched item. A run refused only because another thread is
/// mid-execution goes back on the queue; dropping it would strand a nested
/// scheduler re-submitted while its previous drain is still unwinding.
fn execute_dispatched(pool: &Weak<ThreadPoolScheduler>, work: WorkRef) {
    if run_work(&work) {
        return;
    }
    let state = work.state();
    let busy_refusal = !state.is_cancelled()
        && !state.is_finished()
        && !(state.schedule_only_once() && state.is_scheduled());
    if busy_refusal {
        if let Some(owner) = pool.upgrade() {
            debug!(
                pool = %owner.core.state().name(),
                work = %state.name(),
                "dispatch raced an in-flight execution; requeueing"
            );
            owner.schedule_work(work);
        }
    }
}

struct WorkerExit {
    pool: Weak<ThreadPoolScheduler>,
    worker_id: u64,
}

impl Drop for WorkerExit {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.remove_worker(self.worker_id);
        }
    }
}

impl std::fmt::Debug for ThreadPoolScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPoolScheduler")
            .field("name", &self.core.state().name())
            .field("min_thread", &self.min_thread)
            .field("max_thread", &self.max_thread)
            .finish_non_exhaustive()
    }
}

impl WorkListener for ThreadPoolScheduler {}

impl Work for ThreadPoolScheduler {
    fn state(&self) -> &WorkState {
        self.core.state()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn do_work(&self) -> AppResult<()> {
        self.schedule_works();
        Ok(())
    }
}

impl Scheduler for ThreadPoolScheduler {
    fn core(&self) -> &SchedulerCore {
        &self.core
    }

    fn add_work(&self, work: WorkRef) -> bool {
        if !self.core.admit(self, work) {
            return false;
        }
        self.grow_if_starved();
        true
    }

    /// Executes a handed-off item on the pool by re-enqueueing it onto the
    /// pool's own queue, so items forwarded by a composing scheduler run on
    /// pool workers like directly-admitted ones.
    fn schedule_work(&self, work: WorkRef) {
        let name = work.name().to_owned();
        if !self.add_work(work) {
            warn!(
                pool = %self.core.state().name(),
                work = %name,
                "forwarded work dropped; pool is not accepting"
            );
        }
    }

    /// Activation: the first call marks the pool active and spawns the
    /// initial workers; later calls only grow the pool when every worker is
    /// busy. Draining is done by the workers, never by the caller.
    fn schedule_works(&self) {
        if self.state().is_cancelled() {
            return;
        }
        if !self.active.swap(true, Ordering::SeqCst) {
            let initial = self.initial_worker_count(self.core.work_count());
            debug!(
                pool = %self.core.state().name(),
                initial,
                "pool activated"
            );
            for _ in 0..initial {
                self.spawn_worker();
            }
        } else if self.has_work() {
            self.grow_if_starved();
        }
    }

    /// Stops the pool: latches admission, cancels, wakes blocked pollers,
    /// then joins every worker thread. A worker calling shutdown skips its
    /// own handle.
    fn shutdown(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.core.shutdown_core();
        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock();
            workers.drain().map(|(_, handle)| handle).collect()
        };
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!(pool = %self.core.state().name(), "worker exited by panic");
            }
        }
    }
}
