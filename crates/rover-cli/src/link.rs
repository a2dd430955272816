//! Opens the byte stream to the motor/sensor controller.
//!
//! * `tcp://host:port` – a networked serial bridge.
//! * anything else – a local serial device, configured with `stty`.
//! * `simulate = true` – an in-process [`SimController`].

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use rover_hal::CommandLink;
use rover_hal::sim::SimController;
use rover_types::RoverError;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::Config;

/// Moisture value reported by the simulated controller.
const SIM_MOISTURE: &str = "512";

pub async fn open(cfg: &Config) -> Result<Box<dyn CommandLink>, RoverError> {
    if cfg.simulate {
        info!("using simulated controller");
        let (link, _log) = SimController::new().with_moisture(SIM_MOISTURE).spawn();
        return Ok(Box::new(link));
    }

    if let Some(addr) = cfg.serial_device.strip_prefix("tcp://") {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| RoverError::Io(format!("connecting to serial bridge {addr}: {e}")))?;
        stream
            .set_nodelay(true)
            .map_err(|e| RoverError::Io(e.to_string()))?;
        info!(addr, "controller link connected");
        return Ok(Box::new(stream));
    }

    configure_line(&cfg.serial_device, cfg.baud_rate).await;
    let link = SerialLink::open(&cfg.serial_device).await?;
    info!(device = %cfg.serial_device, baud = cfg.baud_rate, "controller link opened");
    Ok(Box::new(link))
}

/// Put the tty into raw mode at `baud`.  Failure is logged, not fatal: the
/// device may already be configured, or may not be a tty at all.
async fn configure_line(device: &str, baud: u32) {
    let status = Command::new("stty")
        .args(["-F", device, &baud.to_string(), "raw", "-echo"])
        .status()
        .await;
    match status {
        Ok(status) if status.success() => {}
        Ok(status) => warn!(device, %status, "stty failed; using current line settings"),
        Err(e) => warn!(device, error = %e, "could not run stty; using current line settings"),
    }
}

/// A serial device opened twice, so a read left pending by a timed-out
/// request never holds up the next write.
pub(crate) struct SerialLink {
    rx: File,
    tx: File,
}

impl SerialLink {
    async fn open(device: &str) -> Result<Self, RoverError> {
        Ok(Self {
            rx: open_half(device, false).await?,
            tx: open_half(device, true).await?,
        })
    }
}

async fn open_half(device: &str, write: bool) -> Result<File, RoverError> {
    OpenOptions::new()
        .read(!write)
        .write(write)
        .open(device)
        .await
        .map_err(|e| RoverError::Io(format!("opening {device}: {e}")))
}

/// A serial link whose receive side is a pipe nobody writes to.
///
/// Returns the link and the pipe's write end, which must stay alive for the
/// reads to block.
#[cfg(all(test, unix))]
pub(crate) fn silent_serial_link() -> (SerialLink, std::io::PipeWriter) {
    use std::os::fd::OwnedFd;

    let (reader, writer) = std::io::pipe().expect("pipe");
    let rx = File::from_std(std::fs::File::from(OwnedFd::from(reader)));
    let tx = File::from_std(tempfile::tempfile().expect("tempfile"));
    (SerialLink { rx, tx }, writer)
}

impl AsyncRead for SerialLink {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.rx).poll_read(cx, buf)
    }
}

impl AsyncWrite for SerialLink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.tx).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.tx).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.tx).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rover_hal::{CommandChannel, LinkTimings};
    use rover_types::CommandCode;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    use super::*;

    fn timings() -> LinkTimings {
        LinkTimings {
            read_timeout: Duration::from_millis(500),
            extended_delay: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn simulated_link_answers_commands() {
        let cfg = Config {
            simulate: true,
            ..Config::default()
        };
        let channel = CommandChannel::new(open(&cfg).await.unwrap(), timings());

        assert_eq!(channel.send_command(CommandCode::Forward).await.unwrap(), "ok 10");
        assert_eq!(
            channel
                .send_command_and_wait_extended(CommandCode::StartMoisture)
                .await
                .unwrap(),
            SIM_MOISTURE
        );
    }

    #[tokio::test]
    async fn tcp_bridge_carries_command_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let bridge = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (rx, mut tx) = socket.into_split();
            let mut lines = BufReader::new(rx).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            tx.write_all(b"ok 70\r\n").await.unwrap();
            line
        });

        let cfg = Config {
            serial_device: format!("tcp://{addr}"),
            ..Config::default()
        };
        let channel = CommandChannel::new(open(&cfg).await.unwrap(), timings());

        assert_eq!(channel.send_command(CommandCode::Stop).await.unwrap(), "ok 70");
        assert_eq!(bridge.await.unwrap(), "70");
    }

    #[tokio::test]
    async fn missing_serial_device_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            serial_device: dir.path().join("ttyNONE").to_string_lossy().into_owned(),
            ..Config::default()
        };
        assert!(matches!(open(&cfg).await, Err(RoverError::Io(_))));
    }

    #[tokio::test]
    async fn unreachable_bridge_is_an_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let cfg = Config {
            serial_device: format!("tcp://{addr}"),
            ..Config::default()
        };
        assert!(matches!(open(&cfg).await, Err(RoverError::Io(_))));
    }
}
