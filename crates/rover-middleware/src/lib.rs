//! `rover-middleware` – live media plumbing.
//!
//! Moves camera frames from one producer to any number of viewers without
//! caring what the frames contain.
//!
//! # Modules
//!
//! - [`frame_bus`] – single-slot, notify-all frame broadcast built on a Tokio
//!   watch channel.
//! - [`mjpeg`] – assembles complete JPEG frames from a chunked MJPEG byte
//!   stream and pumps them onto the bus.

pub mod frame_bus;
pub mod mjpeg;

pub use frame_bus::{Frame, FrameBus, FrameSubscriber};
pub use mjpeg::{MjpegSplitter, pump_frames};
