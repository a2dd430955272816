//! `rover-runtime` – action dispatch and process telemetry.
//!
//! # Modules
//!
//! - [`dispatcher`] – [`RoverDispatcher`]: turns operator action names into
//!   controller commands or spray pulses and caches the latest moisture
//!   reading.
//! - [`telemetry`] – [`init_tracing`]: installs the global `tracing`
//!   subscriber with an optional OTLP span exporter.

pub mod dispatcher;
pub mod telemetry;

pub use dispatcher::{ActionOutcome, ActionReport, RoverDispatcher};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
