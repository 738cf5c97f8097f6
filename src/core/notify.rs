//! Per-item listener registry broadcasting lifecycle events.
//!
//! Listeners are held as weak references and broadcast iterates a snapshot,
//! so callbacks may register or remove listeners while an event is being
//! delivered. Delivery order is registration order, synchronous on the
//! notifying thread.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::core::work::WorkRef;

/// Observer of a work item's lifecycle.
///
/// All methods default to no-ops so implementations only override the events
/// they care about. Schedulers implement this to observe the items they admit.
pub trait WorkListener: Send + Sync {
    /// The item entered its execution region.
    fn work_started(&self, _work: &WorkRef) {}

    /// The item's readiness gate (`can_execute`) refused execution.
    fn work_aborted(&self, _work: &WorkRef) {}

    /// The item was cancelled before reaching a finished state.
    fn work_cancelled(&self, _work: &WorkRef) {}

    /// The item reached its finished state. Failures, if any, are available
    /// through the item's own state (`has_failure`/`failure_message`).
    fn work_finished(&self, _work: &WorkRef) {}
}

/// Registry of [`WorkListener`]s for one work item.
///
/// Listeners are stored weakly: the registry never keeps a listener alive,
/// and entries whose owner has been dropped are pruned during broadcast.
#[derive(Default)]
pub struct WorkEventNotification {
    listeners: RwLock<Vec<Weak<dyn WorkListener>>>,
}

impl WorkEventNotification {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener if it is not already present (pointer identity).
    pub fn add_listener<L: WorkListener + 'static>(&self, listener: &Arc<L>) {
        let weak = Arc::downgrade(listener);
        let weak: Weak<dyn WorkListener> = weak;
        self.add_weak(weak);
    }

    /// Registers an already-weak listener handle, deduplicated by pointer.
    pub(crate) fn add_weak(&self, weak: Weak<dyn WorkListener>) {
        let mut listeners = self.listeners.write();
        if !listeners.iter().any(|existing| existing.ptr_eq(&weak)) {
            listeners.push(weak);
        }
    }

    /// Removes a listener. Returns whether it was registered.
    pub fn remove_listener<L: WorkListener + 'static>(&self, listener: &Arc<L>) -> bool {
        let weak = Arc::downgrade(listener);
        let weak: Weak<dyn WorkListener> = weak;
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|existing| !existing.ptr_eq(&weak));
        listeners.len() < before
    }

    /// Number of live registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Takes a stable snapshot for iteration and prunes dead entries.
    fn snapshot(&self) -> Vec<Arc<dyn WorkListener>> {
        let mut saw_dead = false;
        let live: Vec<Arc<dyn WorkListener>> = self
            .listeners
            .read()
            .iter()
            .filter_map(|weak| {
                let upgraded = weak.upgrade();
                if upgraded.is_none() {
                    saw_dead = true;
                }
                upgraded
            })
            .collect();
        if saw_dead {
            self.listeners.write().retain(|weak| weak.strong_count() > 0);
        }
        live
    }

    /// Broadcasts the started event.
    pub fn notify_started(&self, work: &WorkRef) {
        for listener in self.snapshot() {
            listener.work_started(work);
        }
    }

    /// Broadcasts the aborted event.
    pub fn notify_aborted(&self, work: &WorkRef) {
        for listener in self.snapshot() {
            listener.work_aborted(work);
        }
    }

    /// Broadcasts the cancelled event.
    pub fn notify_cancelled(&self, work: &WorkRef) {
        for listener in self.snapshot() {
            listener.work_cancelled(work);
        }
    }

    /// Broadcasts the finished event.
    pub fn notify_finished(&self, work: &WorkRef) {
        for listener in self.snapshot() {
            listener.work_finished(work);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::work::FnWork;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        started: AtomicUsize,
        finished: AtomicUsize,
    }

    impl CountingListener {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                started: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
            })
        }
    }

    impl WorkListener for CountingListener {
        fn work_started(&self, _work: &WorkRef) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn work_finished(&self, _work: &WorkRef) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sample_work() -> WorkRef {
        Arc::new(FnWork::new("sample", || Ok(())))
    }

    #[test]
    fn add_listener_is_idempotent() {
        let registry = WorkEventNotification::new();
        let listener = CountingListener::new();
        registry.add_listener(&listener);
        registry.add_listener(&listener);
        assert_eq!(registry.listener_count(), 1);

        let work = sample_work();
        registry.notify_started(&work);
        assert_eq!(listener.started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_listener_stops_delivery() {
        let registry = WorkEventNotification::new();
        let listener = CountingListener::new();
        registry.add_listener(&listener);
        assert!(registry.remove_listener(&listener));
        assert!(!registry.remove_listener(&listener));

        let work = sample_work();
        registry.notify_finished(&work);
        assert_eq!(listener.finished.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dropped_listeners_are_pruned() {
        let registry = WorkEventNotification::new();
        let listener = CountingListener::new();
        registry.add_listener(&listener);
        drop(listener);

        let work = sample_work();
        registry.notify_started(&work);
        assert_eq!(registry.listener_count(), 0);
    }

    #[test]
    fn listener_may_remove_itself_during_broadcast() {
        struct SelfRemoving {
            registry: Arc<WorkEventNotification>,
            this: parking_lot::Mutex<Option<Arc<SelfRemoving>>>,
            fired: AtomicUsize,
        }

        impl WorkListener for SelfRemoving {
            fn work_started(&self, _work: &WorkRef) {
                self.fired.fetch_add(1, Ordering::SeqCst);
                if let Some(this) = self.this.lock().take() {
                    self.registry.remove_listener(&this);
                }
            }
        }

        let registry = Arc::new(WorkEventNotification::new());
        let listener = Arc::new(SelfRemoving {
            registry: Arc::clone(&registry),
            this: parking_lot::Mutex::new(None),
            fired: AtomicUsize::new(0),
        });
        *listener.this.lock() = Some(Arc::clone(&listener));
        registry.add_listener(&listener);

        let work = sample_work();
        registry.notify_started(&work);
        registry.notify_started(&work);
        assert_eq!(listener.fired.load(Ordering::SeqCst), 1);
    }
}
