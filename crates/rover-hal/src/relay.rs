//! `Relay` trait for discrete on/off outputs such as the spray pump relay.

use rover_types::RoverError;

/// A single digital output line (active / inactive).
///
/// Implemented by [`SysfsRelay`][crate::gpio::SysfsRelay] on real hardware
/// and [`SimRelay`][crate::sim::SimRelay] in simulation and tests.
pub trait Relay: Send + Sync {
    /// Stable identifier for this relay, e.g. `"spray_relay"`.
    fn id(&self) -> &str;

    /// Drive the output to `active` (`true` = energised).
    ///
    /// # Errors
    ///
    /// Returns [`RoverError::HardwareFault`] if the line cannot be written.
    fn set_state(&mut self, active: bool) -> Result<(), RoverError>;

    /// Return the last state successfully written.
    fn state(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockRelay {
        id: String,
        state: bool,
    }

    impl Relay for MockRelay {
        fn id(&self) -> &str {
            &self.id
        }

        fn set_state(&mut self, active: bool) -> Result<(), RoverError> {
            self.state = active;
            Ok(())
        }

        fn state(&self) -> bool {
            self.state
        }
    }

    #[test]
    fn relay_is_object_safe() {
        let mut relay: Box<dyn Relay> = Box::new(MockRelay {
            id: "spray_relay".to_string(),
            state: false,
        });
        assert_eq!(relay.id(), "spray_relay");
        relay.set_state(true).unwrap();
        assert!(relay.state());
    }
}
