//! Named worker-thread factory.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use tracing::debug;

// Process-wide factory sequence, so threads from different factories stay
// distinguishable in logs.
static FACTORY_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Produces named worker threads.
///
/// Threads are named `<prefix>-<factory#>-thread-<n>` with a per-factory
/// counter, so a thread dump maps straight back to the scheduler that owns
/// the thread.
pub struct WorkThreadFactory {
    prefix: String,
    factory_id: u64,
    thread_sequence: AtomicU64,
    stack_size: Option<usize>,
}

impl WorkThreadFactory {
    /// Creates a factory producing threads named under `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            factory_id: FACTORY_SEQUENCE.fetch_add(1, Ordering::SeqCst),
            thread_sequence: AtomicU64::new(1),
            stack_size: None,
        }
    }

    /// Overrides the stack size of produced threads.
    #[must_use]
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// The name the next produced thread will carry.
    pub fn peek_next_name(&self) -> String {
        self.name_for(self.thread_sequence.load(Ordering::SeqCst))
    }

    fn name_for(&self, sequence: u64) -> String {
        format!("{}-{}-thread-{}", self.prefix, self.factory_id, sequence)
    }

    /// Spawns a named, running thread executing `f`.
    pub fn spawn<F>(&self, f: F) -> io::Result<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = self.name_for(self.thread_sequence.fetch_add(1, Ordering::SeqCst));
        let mut builder = thread::Builder::new().name(name.clone());
        if let Some(bytes) = self.stack_size {
            builder = builder.stack_size(bytes);
        }
        let handle = builder.spawn(f)?;
        debug!(thread = %name, "worker thread spawned");
        Ok(handle)
    }
}

impl Default for WorkThreadFactory {
    fn default() -> Self {
        Self::new("work-scheduler")
    }
}
