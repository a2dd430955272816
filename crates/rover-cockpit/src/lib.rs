//! `rover-cockpit` – the rover's browser-facing HTTP servers.
//!
//! Two independent listeners:
//!
//! 1. [`ControlServer`] (default port `8080`) serves the operator control
//!    page and `GET /action`, which hands the named action to the
//!    [`RoverDispatcher`] and answers with the cached moisture reading.
//!
//! 2. [`StreamServer`] (default port `8000`) serves the live camera view as
//!    `multipart/x-mixed-replace` JPEG parts fed from the [`FrameBus`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rover_cockpit::{ControlServer, StreamServer};
//! use rover_middleware::FrameBus;
//! use rover_runtime::RoverDispatcher;
//!
//! async fn serve(dispatcher: Arc<RoverDispatcher>, bus: FrameBus) {
//!     let control = ControlServer::new(dispatcher).run();
//!     let stream = StreamServer::new(bus).run();
//!     let _ = tokio::try_join!(control, stream);
//! }
//! ```
//!
//! [`RoverDispatcher`]: rover_runtime::RoverDispatcher
//! [`FrameBus`]: rover_middleware::FrameBus

pub mod control;
pub mod http;
pub mod stream;

pub use control::{ACTION_HEADER, ControlServer, DEFAULT_CONTROL_PORT};
pub use stream::{DEFAULT_STREAM_PORT, StreamServer};
