//! Supporting utilities: thread naming and telemetry setup.

pub mod telemetry;
pub mod thread_factory;

pub use telemetry::init_tracing;
pub use thread_factory::WorkThreadFactory;
