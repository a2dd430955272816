//! [`SysfsRelay`] – relay driver backed by the Linux sysfs GPIO interface.
//!
//! The pin is exported through `<root>/export` if its directory does not
//! exist yet, configured as an output, and driven low on open so the sprayer
//! never starts energised.

use std::fs;
use std::path::{Path, PathBuf};

use rover_types::RoverError;
use tracing::debug;

use crate::relay::Relay;

/// Default sysfs GPIO root.
pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

pub struct SysfsRelay {
    id: String,
    pin: u32,
    value_path: PathBuf,
    state: bool,
}

impl SysfsRelay {
    /// Open BCM `pin` under the standard sysfs root.
    pub fn open(id: impl Into<String>, pin: u32) -> Result<Self, RoverError> {
        Self::open_at(SYSFS_GPIO_ROOT, id, pin)
    }

    /// Open `pin` under an explicit sysfs root.
    ///
    /// # Errors
    ///
    /// Returns [`RoverError::HardwareFault`] when the pin cannot be exported,
    /// configured as an output, or driven low.
    pub fn open_at(
        root: impl AsRef<Path>,
        id: impl Into<String>,
        pin: u32,
    ) -> Result<Self, RoverError> {
        let id = id.into();
        let root = root.as_ref();
        let pin_dir = root.join(format!("gpio{pin}"));

        if !pin_dir.exists() {
            debug!(pin, "exporting gpio pin");
            fs::write(root.join("export"), pin.to_string())
                .map_err(|e| fault(&id, format!("export gpio{pin}: {e}")))?;
        }
        fs::write(pin_dir.join("direction"), "out")
            .map_err(|e| fault(&id, format!("set gpio{pin} direction: {e}")))?;

        let mut relay = Self {
            id,
            pin,
            value_path: pin_dir.join("value"),
            state: true,
        };
        relay.set_state(false)?;
        Ok(relay)
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }
}

impl Relay for SysfsRelay {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_state(&mut self, active: bool) -> Result<(), RoverError> {
        let level = if active { "1" } else { "0" };
        fs::write(&self.value_path, level)
            .map_err(|e| fault(&self.id, format!("write gpio{} value: {e}", self.pin)))?;
        self.state = active;
        Ok(())
    }

    fn state(&self) -> bool {
        self.state
    }
}

fn fault(component: &str, details: String) -> RoverError {
    RoverError::HardwareFault {
        component: component.to_string(),
        details,
    }
}
