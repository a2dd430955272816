//! In-process simulation doubles for running the rover stack without
//! hardware.
//!
//! * [`SimRelay`] – a relay that records every transition with a timestamp.
//! * [`SimController`] – an in-memory stand-in for the motor/sensor
//!   microcontroller.  It speaks the same line protocol as the real firmware
//!   over a [`tokio::io::duplex`] pipe.
//!
//! # Example
//!
//! ```rust
//! use rover_hal::sim::SimController;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (link, log) = SimController::new().with_moisture("512").spawn();
//! # drop(link);
//! # let _ = log.received();
//! # }
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use rover_types::{CommandCode, RoverError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tracing::debug;

use crate::relay::Relay;

// ────────────────────────────────────────────────────────────────────────────
// Simulated relay
// ────────────────────────────────────────────────────────────────────────────

/// Shared, cloneable view of a [`SimRelay`]'s transition history.
#[derive(Clone, Default)]
pub struct RelayProbe(Arc<Mutex<Vec<(bool, Instant)>>>);

impl RelayProbe {
    /// Every state written so far, in order.
    pub fn transitions(&self) -> Vec<bool> {
        self.history().into_iter().map(|(state, _)| state).collect()
    }

    /// Every state written so far together with when it was written.
    pub fn history(&self) -> Vec<(bool, Instant)> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn record(&self, state: bool) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((state, Instant::now()));
    }
}

/// A simulated relay.  Always succeeds unless constructed with
/// [`SimRelay::failing`].
pub struct SimRelay {
    id: String,
    state: bool,
    fail_on: Option<bool>,
    probe: RelayProbe,
}

impl SimRelay {
    pub fn new(id: impl Into<String>) -> Box<Self> {
        Box::new(Self {
            id: id.into(),
            state: false,
            fail_on: None,
            probe: RelayProbe::default(),
        })
    }

    /// A relay whose writes of `state` fail with a hardware fault.
    pub fn failing(id: impl Into<String>, state: bool) -> Box<Self> {
        let mut relay = Self::new(id);
        relay.fail_on = Some(state);
        relay
    }

    pub fn probe(&self) -> RelayProbe {
        self.probe.clone()
    }
}

impl Relay for SimRelay {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_state(&mut self, active: bool) -> Result<(), RoverError> {
        if self.fail_on == Some(active) {
            return Err(RoverError::HardwareFault {
                component: self.id.clone(),
                details: format!("simulated fault writing {active}"),
            });
        }
        self.state = active;
        self.probe.record(active);
        Ok(())
    }

    fn state(&self) -> bool {
        self.state
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated controller
// ────────────────────────────────────────────────────────────────────────────

/// Something the simulated controller saw or did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    Received { line: String, at: Instant },
    Replied { line: String, at: Instant },
}

/// Shared record of everything the simulated controller observed.
#[derive(Clone, Default)]
pub struct ControllerLog(Arc<Mutex<Vec<ControllerEvent>>>);

impl ControllerLog {
    pub fn events(&self) -> Vec<ControllerEvent> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Command lines received, without the trailing newline.
    pub fn received(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ControllerEvent::Received { line, .. } => Some(line),
                ControllerEvent::Replied { .. } => None,
            })
            .collect()
    }

    fn push(&self, event: ControllerEvent) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Builder for a simulated motor/sensor controller.
///
/// Replies `ok <code>` to motor commands, the configured moisture value to
/// [`CommandCode::StartMoisture`], and `err <line>` to anything else.
pub struct SimController {
    moisture: String,
    reply_delay: Duration,
    silent: HashSet<u8>,
}

impl Default for SimController {
    fn default() -> Self {
        Self {
            moisture: "0".to_string(),
            reply_delay: Duration::ZERO,
            silent: HashSet::new(),
        }
    }
}

impl SimController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value returned for moisture measurement requests.
    pub fn with_moisture(mut self, value: impl Into<String>) -> Self {
        self.moisture = value.into();
        self
    }

    /// Delay applied before every reply.
    pub fn with_reply_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = delay;
        self
    }

    /// Never reply to `command`.
    pub fn ignoring(mut self, command: CommandCode) -> Self {
        self.silent.insert(command.code());
        self
    }

    /// Spawn the controller on the current Tokio runtime.
    ///
    /// Returns the host end of the link and a log of controller activity.
    /// The controller task exits when the host end is dropped.
    pub fn spawn(self) -> (DuplexStream, ControllerLog) {
        let (host, device) = tokio::io::duplex(1024);
        let log = ControllerLog::default();
        tokio::spawn(self.serve(device, log.clone()));
        (host, log)
    }

    async fn serve(self, device: DuplexStream, log: ControllerLog) {
        let (read_half, mut write_half) = tokio::io::split(device);
        let mut lines = BufReader::new(read_half).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            log.push(ControllerEvent::Received {
                line: line.clone(),
                at: Instant::now(),
            });

            let code = line.trim().parse::<u8>().ok();
            if code.is_some_and(|c| self.silent.contains(&c)) {
                continue;
            }
            if !self.reply_delay.is_zero() {
                tokio::time::sleep(self.reply_delay).await;
            }

            let reply = match code.and_then(CommandCode::from_code) {
                Some(CommandCode::StartMoisture) => self.moisture.clone(),
                Some(cmd) => format!("ok {}", cmd.code()),
                None => format!("err {line}"),
            };
            debug!(command = %line, reply = %reply, "sim controller reply");
            // Logged before the write so the host can never observe the
            // reply ahead of its log entry.
            log.push(ControllerEvent::Replied {
                line,
                at: Instant::now(),
            });
            if write_half
                .write_all(format!("{reply}\r\n").as_bytes())
                .await
                .is_err()
            {
                break;
            }
        }
    }
}
