//! `rover-hal` – hardware access for the rover.
//!
//! # Modules
//!
//! - [`channel`] – [`CommandChannel`]: the serialized, half-duplex line
//!   protocol to the motor/sensor microcontroller.
//! - [`relay`] – the [`Relay`] trait for single digital outputs.
//! - [`gpio`] – [`SysfsRelay`]: a [`Relay`] on a Linux sysfs GPIO pin.
//! - [`sprayer`] – [`Sprayer`]: timed, cancellation-safe relay pulses.
//! - [`sim`] – simulated relay and controller for running without hardware.

pub mod channel;
pub mod gpio;
pub mod relay;
pub mod sim;
pub mod sprayer;

pub use channel::{CommandChannel, CommandLink, LinkTimings};
pub use gpio::SysfsRelay;
pub use relay::Relay;
pub use sprayer::{DEFAULT_SPRAY_DURATION, Sprayer};
