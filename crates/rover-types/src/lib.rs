use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Instruction codes understood by the rover's motor/sensor controller.
///
/// The numeric values are fixed by the controller firmware.  On the wire each
/// command is the decimal code followed by a newline, e.g. `"10\n"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
    /// Start a soil-moisture measurement; the controller needs extra time
    /// before the reading is ready.
    StartMoisture,
}

impl CommandCode {
    /// The numeric code sent to the controller.
    pub fn code(self) -> u8 {
        match self {
            CommandCode::Forward => 10,
            CommandCode::Backward => 20,
            CommandCode::Right => 30,
            CommandCode::Left => 4,
            CommandCode::StartMoisture => 50,
            CommandCode::Stop => 70,
        }
    }

    /// Encode as one newline-terminated wire line.
    pub fn encode(self) -> String {
        format!("{}\n", self.code())
    }

    /// Reverse lookup used by the simulated controller.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            10 => Some(CommandCode::Forward),
            20 => Some(CommandCode::Backward),
            30 => Some(CommandCode::Right),
            4 => Some(CommandCode::Left),
            50 => Some(CommandCode::StartMoisture),
            70 => Some(CommandCode::Stop),
            _ => None,
        }
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({})", self.code())
    }
}

/// Logical operator action, as named by the browser UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoverAction {
    Drive(CommandCode),
    Spray,
    MeasureMoisture,
}

impl FromStr for RoverAction {
    type Err = RoverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forward" => Ok(RoverAction::Drive(CommandCode::Forward)),
            "backward" => Ok(RoverAction::Drive(CommandCode::Backward)),
            "left" => Ok(RoverAction::Drive(CommandCode::Left)),
            "right" => Ok(RoverAction::Drive(CommandCode::Right)),
            "stop" => Ok(RoverAction::Drive(CommandCode::Stop)),
            "spray" => Ok(RoverAction::Spray),
            "startM" => Ok(RoverAction::MeasureMoisture),
            other => Err(RoverError::UnrecognizedAction(other.to_string())),
        }
    }
}

/// Text shown before the first successful moisture measurement.
pub const MOISTURE_NOT_MEASURED: &str = "Not Detected Yet";

/// Cached result of the most recent soil-moisture measurement.
///
/// Starts as [`MoistureReading::NotMeasured`] and is only ever replaced by a
/// newer successful measurement.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MoistureReading {
    #[default]
    NotMeasured,
    Measured {
        value: String,
        measured_at: DateTime<Utc>,
    },
}

impl MoistureReading {
    pub fn measured(value: impl Into<String>) -> Self {
        MoistureReading::Measured {
            value: value.into(),
            measured_at: Utc::now(),
        }
    }

    pub fn is_measured(&self) -> bool {
        matches!(self, MoistureReading::Measured { .. })
    }

    /// When the controller produced this reading, if it ever did.
    pub fn measured_at(&self) -> Option<DateTime<Utc>> {
        match self {
            MoistureReading::NotMeasured => None,
            MoistureReading::Measured { measured_at, .. } => Some(*measured_at),
        }
    }
}

impl fmt::Display for MoistureReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoistureReading::NotMeasured => f.write_str(MOISTURE_NOT_MEASURED),
            MoistureReading::Measured { value, .. } => f.write_str(value),
        }
    }
}

/// Error type shared by every rover crate.
#[derive(Error, Debug)]
pub enum RoverError {
    #[error("Link Timeout: no reply to {command} within {timeout_ms} ms")]
    LinkTimeout { command: CommandCode, timeout_ms: u64 },

    #[error("Link Write Failure: {0}")]
    LinkWrite(String),

    #[error("Link Closed: controller link reached end of stream")]
    LinkClosed,

    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("Unrecognized Action: {0:?}")]
    UnrecognizedAction(String),

    #[error("Client Disconnected: {0}")]
    ClientDisconnected(String),

    #[error("Frame stream closed")]
    StreamClosed,

    #[error("I/O Error: {0}")]
    Io(String),

    #[error("Configuration Error: {0}")]
    Config(String),
}
