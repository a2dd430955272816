//! [`Sprayer`] – timed pulse control of the spray relay.
//!
//! A pulse energises the relay, suspends the calling task for the pulse
//! duration and de-energises it again.  The active state is held by a scoped
//! guard, so the relay is cleared on every exit path, including when the
//! calling future is dropped mid-pulse.

use std::time::Duration;

use rover_types::RoverError;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{error, info, instrument};

use crate::relay::Relay;

/// Pulse length used for the operator's "spray" action.
pub const DEFAULT_SPRAY_DURATION: Duration = Duration::from_secs(2);

pub struct Sprayer {
    relay: Mutex<Box<dyn Relay>>,
}

impl Sprayer {
    pub fn new(relay: Box<dyn Relay>) -> Self {
        Self {
            relay: Mutex::new(relay),
        }
    }

    /// Energise the relay for `duration`, then clear it.
    ///
    /// Overlapping pulses queue behind each other rather than extending or
    /// cutting short the pulse in progress.
    ///
    /// # Errors
    ///
    /// Returns [`RoverError::HardwareFault`] if the relay cannot be switched.
    #[instrument(skip(self), fields(duration_ms = duration.as_millis() as u64))]
    pub async fn pulse(&self, duration: Duration) -> Result<(), RoverError> {
        let mut relay = self.relay.lock().await;
        relay.set_state(true)?;
        let engaged = Engaged { relay: Some(relay) };

        info!("spray relay engaged");
        tokio::time::sleep(duration).await;
        engaged.release()
    }

    /// Current relay state.
    pub async fn is_active(&self) -> bool {
        self.relay.lock().await.state()
    }
}

/// Holds the relay lock while the output is active; clears it on drop.
struct Engaged<'a> {
    relay: Option<MutexGuard<'a, Box<dyn Relay>>>,
}

impl Engaged<'_> {
    fn release(mut self) -> Result<(), RoverError> {
        match self.relay.take() {
            Some(mut relay) => {
                relay.set_state(false)?;
                info!("spray relay released");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for Engaged<'_> {
    fn drop(&mut self) {
        if let Some(mut relay) = self.relay.take() {
            if let Err(e) = relay.set_state(false) {
                error!(relay = relay.id(), error = %e, "failed to release relay after cancelled pulse");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;
    use crate::sim::SimRelay;

    #[tokio::test]
    async fn pulse_toggles_on_then_off() {
        let relay = SimRelay::new("spray_relay");
        let probe = relay.probe();
        let sprayer = Sprayer::new(relay);

        sprayer.pulse(Duration::from_millis(30)).await.unwrap();

        assert_eq!(probe.transitions(), vec![true, false]);
        assert!(!sprayer.is_active().await);
    }

    #[tokio::test]
    async fn pulse_holds_output_for_duration() {
        let relay = SimRelay::new("spray_relay");
        let probe = relay.probe();
        let sprayer = Sprayer::new(relay);

        let started = Instant::now();
        sprayer.pulse(Duration::from_millis(50)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));

        let history = probe.history();
        let held = history[1].1.duration_since(history[0].1);
        assert!(held >= Duration::from_millis(50), "held only {held:?}");
    }

    #[tokio::test]
    async fn cancelled_pulse_still_releases() {
        let relay = SimRelay::new("spray_relay");
        let probe = relay.probe();
        let sprayer = Arc::new(Sprayer::new(relay));

        let task = {
            let sprayer = Arc::clone(&sprayer);
            tokio::spawn(async move { sprayer.pulse(Duration::from_secs(60)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        assert_eq!(probe.transitions(), vec![true, false]);
        assert!(!sprayer.is_active().await);
    }

    #[tokio::test]
    async fn engage_failure_is_reported() {
        let sprayer = Sprayer::new(SimRelay::failing("spray_relay", true));
        let result = sprayer.pulse(Duration::from_millis(10)).await;
        assert!(matches!(result, Err(RoverError::HardwareFault { .. })));
    }

    #[tokio::test]
    async fn overlapping_pulses_queue() {
        let relay = SimRelay::new("spray_relay");
        let probe = relay.probe();
        let sprayer = Arc::new(Sprayer::new(relay));

        let a = {
            let sprayer = Arc::clone(&sprayer);
            tokio::spawn(async move { sprayer.pulse(Duration::from_millis(30)).await })
        };
        let b = {
            let sprayer = Arc::clone(&sprayer);
            tokio::spawn(async move { sprayer.pulse(Duration::from_millis(30)).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(probe.transitions(), vec![true, false, true, false]);
    }
}
