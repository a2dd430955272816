//! [`RoverDispatcher`] – maps operator action names onto hardware calls.
//!
//! | action | effect |
//! |---|---|
//! | `forward` `backward` `left` `right` `stop` | one command over the [`CommandChannel`]; the reply is only logged |
//! | `spray` | one [`Sprayer`] pulse, no controller traffic |
//! | `startM` | moisture request with the extended reply delay; the reply becomes the cached [`MoistureReading`] |
//! | anything else | ignored |
//!
//! Every successful dispatch reports the cached moisture reading, whichever
//! branch ran.  Motor moves therefore return the reading from the last
//! measurement (or the "not measured" sentinel), never a fresh one.  Browser
//! clients depend on this response shape.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use rover_hal::{CommandChannel, DEFAULT_SPRAY_DURATION, Sprayer};
use rover_types::{CommandCode, MoistureReading, RoverAction, RoverError};
use tracing::{info, instrument, warn};

/// What a dispatched action did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// A drive command was acknowledged by the controller.
    Acknowledged { command: CommandCode, reply: String },
    Sprayed,
    /// A new moisture reading was stored.
    Measured,
    /// The action name was not recognized; nothing happened.
    Ignored { action: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionReport {
    pub outcome: ActionOutcome,
    /// Cached reading at the time the action completed.
    pub moisture: MoistureReading,
}

pub struct RoverDispatcher {
    channel: Arc<CommandChannel>,
    sprayer: Arc<Sprayer>,
    moisture: RwLock<MoistureReading>,
    spray_duration: Duration,
}

impl RoverDispatcher {
    pub fn new(channel: Arc<CommandChannel>, sprayer: Arc<Sprayer>) -> Self {
        Self {
            channel,
            sprayer,
            moisture: RwLock::new(MoistureReading::NotMeasured),
            spray_duration: DEFAULT_SPRAY_DURATION,
        }
    }

    /// Override the spray pulse length (builder-style).
    pub fn with_spray_duration(mut self, duration: Duration) -> Self {
        self.spray_duration = duration;
        self
    }

    pub fn moisture(&self) -> MoistureReading {
        self.moisture
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Dispatch an action by its operator-facing name.
    ///
    /// Unrecognized names are not an error: they are logged and reported as
    /// [`ActionOutcome::Ignored`] with the cached reading.
    ///
    /// # Errors
    ///
    /// Propagates controller link and relay failures.  The cached reading is
    /// left untouched when a measurement fails.
    #[instrument(skip(self))]
    pub async fn dispatch(&self, action: &str) -> Result<ActionReport, RoverError> {
        match action.parse::<RoverAction>() {
            Ok(action) => self.dispatch_action(action).await,
            Err(e) => {
                warn!(error = %e, "ignoring action");
                Ok(self.report(ActionOutcome::Ignored {
                    action: action.to_string(),
                }))
            }
        }
    }

    pub async fn dispatch_action(&self, action: RoverAction) -> Result<ActionReport, RoverError> {
        let outcome = match action {
            RoverAction::Drive(command) => {
                let reply = self.channel.send_command(command).await?;
                info!(%command, reply = %reply, "controller acknowledged");
                ActionOutcome::Acknowledged { command, reply }
            }
            RoverAction::Spray => {
                self.sprayer.pulse(self.spray_duration).await?;
                ActionOutcome::Sprayed
            }
            RoverAction::MeasureMoisture => {
                let value = self
                    .channel
                    .send_command_and_wait_extended(CommandCode::StartMoisture)
                    .await?;
                let reading = MoistureReading::measured(value);
                if let Some(at) = reading.measured_at() {
                    info!(moisture = %reading, measured_at = %at.to_rfc3339(), "moisture measured");
                }
                *self
                    .moisture
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = reading;
                ActionOutcome::Measured
            }
        };
        Ok(self.report(outcome))
    }

    fn report(&self, outcome: ActionOutcome) -> ActionReport {
        ActionReport {
            outcome,
            moisture: self.moisture(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use rover_hal::LinkTimings;
    use rover_hal::sim::{ControllerEvent, ControllerLog, RelayProbe, SimController, SimRelay};

    use super::*;

    struct Rig {
        dispatcher: Arc<RoverDispatcher>,
        controller: ControllerLog,
        relay: RelayProbe,
    }

    fn rig(controller: SimController) -> Rig {
        let (link, log) = controller.spawn();
        let channel = CommandChannel::new(
            link,
            LinkTimings {
                read_timeout: Duration::from_millis(200),
                extended_delay: Duration::from_millis(40),
            },
        );
        let relay = SimRelay::new("spray_relay");
        let probe = relay.probe();
        let dispatcher = RoverDispatcher::new(Arc::new(channel), Arc::new(Sprayer::new(relay)))
            .with_spray_duration(Duration::from_millis(30));
        Rig {
            dispatcher: Arc::new(dispatcher),
            controller: log,
            relay: probe,
        }
    }

    #[tokio::test]
    async fn motor_action_returns_sentinel_before_any_measurement() {
        let rig = rig(SimController::new());

        let report = rig.dispatcher.dispatch("forward").await.unwrap();

        assert_eq!(
            report.outcome,
            ActionOutcome::Acknowledged {
                command: CommandCode::Forward,
                reply: "ok 10".to_string()
            }
        );
        assert_eq!(report.moisture, MoistureReading::NotMeasured);
        assert_eq!(report.moisture.to_string(), "Not Detected Yet");
        assert_eq!(rig.controller.received(), vec!["10"]);
    }

    #[tokio::test]
    async fn measurement_is_cached_and_returned_by_later_moves() {
        let rig = rig(SimController::new().with_moisture("618"));

        let started = Instant::now();
        let measured = rig.dispatcher.dispatch("startM").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(40));
        assert_eq!(measured.outcome, ActionOutcome::Measured);
        assert_eq!(measured.moisture.to_string(), "618");

        let moved = rig.dispatcher.dispatch("left").await.unwrap();
        assert_eq!(moved.moisture, measured.moisture);
        assert_eq!(rig.controller.received(), vec!["50", "4"]);
    }

    #[tokio::test]
    async fn spray_pulses_relay_without_link_traffic() {
        let rig = rig(SimController::new());

        let report = rig.dispatcher.dispatch("spray").await.unwrap();

        assert_eq!(report.outcome, ActionOutcome::Sprayed);
        assert_eq!(rig.relay.transitions(), vec![true, false]);
        let history = rig.relay.history();
        assert!(history[1].1.duration_since(history[0].1) >= Duration::from_millis(30));
        assert!(rig.controller.received().is_empty());
    }

    #[tokio::test]
    async fn unknown_action_is_an_ignored_no_op() {
        let rig = rig(SimController::new().with_moisture("700"));
        rig.dispatcher.dispatch("startM").await.unwrap();
        let before = rig.dispatcher.moisture();

        let report = rig.dispatcher.dispatch("unknown-action").await.unwrap();

        assert_eq!(
            report.outcome,
            ActionOutcome::Ignored {
                action: "unknown-action".to_string()
            }
        );
        assert_eq!(report.moisture, before);
        assert_eq!(rig.controller.received(), vec!["50"]);
        assert!(rig.relay.transitions().is_empty());
    }

    #[tokio::test]
    async fn failed_measurement_keeps_previous_reading() {
        let rig = rig(SimController::new().ignoring(CommandCode::StartMoisture));

        let result = rig.dispatcher.dispatch("startM").await;

        assert!(matches!(
            result,
            Err(RoverError::LinkTimeout {
                command: CommandCode::StartMoisture,
                ..
            })
        ));
        assert_eq!(rig.dispatcher.moisture(), MoistureReading::NotMeasured);
    }

    #[tokio::test]
    async fn overlapping_dispatches_are_serialized_on_the_link() {
        let rig = rig(
            SimController::new()
                .with_moisture("555")
                .with_reply_delay(Duration::from_millis(30)),
        );

        let measure = {
            let dispatcher = Arc::clone(&rig.dispatcher);
            tokio::spawn(async move { dispatcher.dispatch("startM").await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let stop = {
            let dispatcher = Arc::clone(&rig.dispatcher);
            tokio::spawn(async move { dispatcher.dispatch("stop").await })
        };

        measure.await.unwrap().unwrap();
        let stopped = stop.await.unwrap().unwrap();
        assert_eq!(stopped.moisture.to_string(), "555");

        let events = rig.controller.events();
        let lines: Vec<String> = events
            .iter()
            .map(|e| match e {
                ControllerEvent::Received { line, .. } => format!("rx {line}"),
                ControllerEvent::Replied { line, .. } => format!("tx {line}"),
            })
            .collect();
        assert_eq!(lines, vec!["rx 50", "tx 50", "rx 70", "tx 70"]);
    }
}
