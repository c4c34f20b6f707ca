//! Observability wiring
//!
//! - [`init_tracing`] installs the global `tracing` subscriber from
//!   [`LoggingConfig`](vigil_domain::LoggingConfig)
//! - [`TracingSink`] forwards the core's metrics to the `metrics` facade and
//!   its structured records to `tracing`

pub mod logging;
pub mod sink;

pub use logging::init_tracing;
pub use sink::TracingSink;
