//! [`CommandChannel`] – the exclusive, half-duplex link to the rover's
//! motor/sensor controller.
//!
//! Every request is one ASCII line (`"<code>\n"`) answered by one line of
//! text.  The link carries no request identifiers, so the channel holds a
//! lock from the moment a command is written until its reply has been read
//! (or the read has timed out).  Concurrent callers queue on that lock.
//!
//! Moisture measurements take the controller several seconds, so
//! [`CommandChannel::send_command_and_wait_extended`] sleeps for a fixed
//! delay after writing before it starts reading.

use std::time::Duration;

use rover_types::{CommandCode, RoverError};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

/// Any byte stream that can serve as the controller link (serial device,
/// TCP serial bridge, in-memory pipe).
pub trait CommandLink: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> CommandLink for T {}

/// Timing policy for the controller link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTimings {
    /// Maximum wait for a reply line once reading has started.
    pub read_timeout: Duration,
    /// Delay between writing a moisture request and reading its reply.
    pub extended_delay: Duration,
}

impl Default for LinkTimings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(5),
            extended_delay: Duration::from_secs(4),
        }
    }
}

struct LinkState {
    io: BufReader<Box<dyn CommandLink>>,
    /// Set when a reply may still be in flight from a timed-out request.
    desynced: bool,
}

pub struct CommandChannel {
    link: Mutex<LinkState>,
    timings: LinkTimings,
}

impl CommandChannel {
    pub fn new(link: impl CommandLink + 'static, timings: LinkTimings) -> Self {
        let link: Box<dyn CommandLink> = Box::new(link);
        Self {
            link: Mutex::new(LinkState {
                io: BufReader::new(link),
                // Input buffered before the channel existed is never a reply.
                desynced: true,
            }),
            timings,
        }
    }

    pub fn timings(&self) -> LinkTimings {
        self.timings
    }

    /// Write `command` and return the controller's one-line reply, with
    /// trailing whitespace removed.
    ///
    /// # Errors
    ///
    /// * [`RoverError::LinkWrite`] – the command could not be written.
    /// * [`RoverError::LinkTimeout`] – no reply within the read timeout.
    /// * [`RoverError::LinkClosed`] – the link reached end of stream.
    #[instrument(skip(self), fields(command = %command))]
    pub async fn send_command(&self, command: CommandCode) -> Result<String, RoverError> {
        self.exchange(command, Duration::ZERO).await
    }

    /// Like [`send_command`][Self::send_command], but waits the extended
    /// delay after writing before reading the reply.
    #[instrument(skip(self), fields(command = %command))]
    pub async fn send_command_and_wait_extended(
        &self,
        command: CommandCode,
    ) -> Result<String, RoverError> {
        self.exchange(command, self.timings.extended_delay).await
    }

    async fn exchange(&self, command: CommandCode, pre_read: Duration) -> Result<String, RoverError> {
        let mut link = self.link.lock().await;

        if link.desynced {
            discard_pending(&mut link.io).await?;
            link.desynced = false;
        }

        let line = command.encode();
        link.io
            .get_mut()
            .write_all(line.as_bytes())
            .await
            .map_err(|e| RoverError::LinkWrite(format!("{command}: {e}")))?;
        link.io
            .get_mut()
            .flush()
            .await
            .map_err(|e| RoverError::LinkWrite(format!("{command}: {e}")))?;
        debug!("command written");

        if !pre_read.is_zero() {
            tokio::time::sleep(pre_read).await;
        }

        let mut reply = String::new();
        match timeout(self.timings.read_timeout, link.io.read_line(&mut reply)).await {
            Ok(Ok(0)) => Err(RoverError::LinkClosed),
            Ok(Ok(_)) => {
                let reply = reply.trim_end().to_string();
                debug!(reply = %reply, "controller replied");
                Ok(reply)
            }
            Ok(Err(e)) => {
                link.desynced = true;
                Err(RoverError::Io(format!("reading reply to {command}: {e}")))
            }
            Err(_) => {
                link.desynced = true;
                warn!(timeout_ms = self.timings.read_timeout.as_millis() as u64, "no reply from controller");
                Err(RoverError::LinkTimeout {
                    command,
                    timeout_ms: self.timings.read_timeout.as_millis() as u64,
                })
            }
        }
    }
}

/// Drop every line already waiting on the link without blocking.
async fn discard_pending(io: &mut BufReader<Box<dyn CommandLink>>) -> Result<(), RoverError> {
    loop {
        let mut stale = String::new();
        // Zero timeout: only input that is already waiting gets consumed.
        match timeout(Duration::ZERO, io.read_line(&mut stale)).await {
            Ok(Ok(0)) => return Err(RoverError::LinkClosed),
            Ok(Ok(_)) => warn!(line = %stale.trim_end(), "discarding stale controller reply"),
            Ok(Err(e)) => return Err(RoverError::Io(format!("draining link: {e}"))),
            Err(_) => return Ok(()),
        }
    }
}
