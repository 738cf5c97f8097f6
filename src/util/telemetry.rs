//! Tracing subscriber setup.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global tracing subscriber.
///
/// Filter directives come from `RUST_LOG`, falling back to `default_level`
/// when unset. Safe to call more than once; later calls are no-ops (binaries
/// and tests can both call it unconditionally).
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init_tracing("debug");
        init_tracing("info");
    }
}
