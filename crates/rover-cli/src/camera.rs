//! Camera capture: runs the configured MJPEG program and feeds its stdout
//! into the [`FrameBus`].

use std::process::Stdio;

use rover_middleware::{FrameBus, pump_frames};
use rover_types::RoverError;
use tokio::process::Command;
use tracing::{info, warn};

/// Run `argv` until its output ends, publishing every frame on `bus`.
///
/// Returns the number of frames published.
///
/// # Errors
///
/// [`RoverError::Config`] for an empty command line, [`RoverError::Io`] if
/// the program cannot be started or its output cannot be read.
pub async fn run(argv: &[String], bus: &FrameBus) -> Result<u64, RoverError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| RoverError::Config("camera_command is empty".to_string()))?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| RoverError::Io(format!("starting camera program {program}: {e}")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| RoverError::Io("camera program has no stdout".to_string()))?;
    info!(program = %program, "camera started");

    let published = pump_frames(stdout, bus).await?;

    match child.wait().await {
        Ok(status) if status.success() => info!(frames = published, "camera stream ended"),
        Ok(status) => warn!(frames = published, %status, "camera program exited"),
        Err(e) => warn!(frames = published, error = %e, "camera program status unavailable"),
    }
    Ok(published)
}
