//! Shared helpers for the integration suites.

// Not every suite uses every helper.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use work_scheduler::{init_tracing, AppResult, FnWork, WorkRef};

pub fn init() {
    init_tracing("warn");
}

/// Work item that bumps a shared counter when it runs.
pub fn counted(name: &str, counter: &Arc<AtomicUsize>) -> WorkRef {
    let counter = Arc::clone(counter);
    Arc::new(FnWork::new(name, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }))
}

/// Work item that blocks until `release` delivers, tracking peak concurrency
/// in `high_water`.
pub fn gated(
    name: &str,
    release: crossbeam_channel::Receiver<()>,
    in_flight: &Arc<AtomicUsize>,
    high_water: &Arc<AtomicUsize>,
) -> WorkRef {
    let in_flight = Arc::clone(in_flight);
    let high_water = Arc::clone(high_water);
    Arc::new(FnWork::new(name, move || -> AppResult<()> {
        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        high_water.fetch_max(now, Ordering::SeqCst);
        release.recv()?;
        in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }))
}
