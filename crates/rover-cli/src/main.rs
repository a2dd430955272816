//! `rover` – the Smart Farming Rover service.
//!
//! This binary wires the whole stack together:
//!
//! 1. Loads `~/.rover/config.toml`, writing the defaults on first run.
//! 2. Opens the controller link (serial, TCP bridge, or simulated) and the
//!    spray relay (sysfs GPIO or simulated).
//! 3. Starts the camera program and the two HTTP servers.
//! 4. Intercepts **Ctrl-C** to send `STOP` to the controller and exit.

mod camera;
mod config;
mod link;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use rover_cockpit::{ControlServer, StreamServer};
use rover_hal::sim::SimRelay;
use rover_hal::{CommandChannel, Relay, Sprayer, SysfsRelay};
use rover_middleware::FrameBus;
use rover_runtime::{RoverDispatcher, init_tracing};
use rover_types::{CommandCode, RoverError};
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::config::Config;

const SPRAY_RELAY_ID: &str = "spray_relay";

/// How long shutdown waits for blocking-pool work.  A serial read left
/// pending by an unanswered command never finishes on its own.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

fn main() -> ExitCode {
    // The guard flushes exported spans when main returns.
    let _telemetry = init_tracing("rover");

    print_banner();

    let cfg = match config::load_or_init() {
        Ok((cfg, created)) => {
            let path = config::config_path().display().to_string();
            if created {
                println!("  {} Default config written to {}", "✓".green().bold(), path.bold());
            } else {
                println!("  Config loaded from {}", path.bold());
            }
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    let outcome = runtime.block_on(run(cfg));
    shutdown(runtime);

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "rover stopped");
            println!("{}: {}", "Rover stopped".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn shutdown(runtime: tokio::runtime::Runtime) {
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
}

async fn run(cfg: Config) -> Result<(), RoverError> {
    let shutdown = Arc::new(Notify::new());
    let on_ctrlc = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the rover …".yellow().bold());
        on_ctrlc.notify_one();
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; STOP will not be sent on Ctrl-C");
    }

    let relay: Box<dyn Relay> = if cfg.simulate {
        SimRelay::new(SPRAY_RELAY_ID)
    } else {
        Box::new(SysfsRelay::open_at(&cfg.gpio_root, SPRAY_RELAY_ID, cfg.spray_pin)?)
    };
    let sprayer = Arc::new(Sprayer::new(relay));

    let channel = Arc::new(CommandChannel::new(
        link::open(&cfg).await?,
        cfg.link_timings(),
    ));
    let dispatcher = Arc::new(
        RoverDispatcher::new(Arc::clone(&channel), sprayer)
            .with_spray_duration(cfg.spray_duration()),
    );

    let bus = FrameBus::new();
    {
        let argv = cfg.camera_argv();
        let bus = bus.clone();
        tokio::spawn(async move {
            if let Err(e) = camera::run(&argv, &bus).await {
                warn!(error = %e, "camera unavailable; stream will show no frames");
            }
        });
    }

    let control = ControlServer::new(dispatcher)
        .with_addr(cfg.control_addr()?)
        .with_stream_port(cfg.stream_port);
    let stream = StreamServer::new(bus)
        .with_addr(cfg.stream_addr()?)
        .with_write_timeout(cfg.stream_write_timeout());

    println!(
        "  Control  http://{}\n  Camera   http://{}/index.html\n",
        control.addr().to_string().bold(),
        stream.addr().to_string().bold()
    );

    let outcome = tokio::select! {
        result = control.run() => result,
        result = stream.run() => result,
        _ = shutdown.notified() => Ok(()),
    };

    send_stop(&channel).await;
    outcome
}

/// Best-effort `STOP` on the way out.
async fn send_stop(channel: &CommandChannel) {
    match channel.send_command(CommandCode::Stop).await {
        Ok(reply) => {
            info!(reply = %reply, "rover stopped");
            println!("{}", "  ✓ STOP sent to controller.".green());
        }
        Err(e) => {
            warn!(error = %e, "could not send STOP");
            println!("{}: {}", "  ✗ STOP not confirmed".yellow(), e);
        }
    }
    println!("{}", "  ✓ Exiting rover.".green());
}

fn print_banner() {
    println!();
    println!("{}", r#"   ___                      "#.bold().green());
    println!("{}", r#"  / _ \___ _  _____ ____    "#.bold().green());
    println!("{}", r#" / , _/ _ \ |/ / -_) __/    "#.bold().green());
    println!("{}", r#"/_/|_|\___/___/\__/_/       "#.bold().green());
    println!();
    println!(
        "  {} {}",
        "Rover".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Smart Farming Rover control service");
    println!();
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use rover_hal::LinkTimings;

    use super::*;

    #[cfg(unix)]
    #[test]
    fn shutdown_returns_while_a_serial_read_is_stuck() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        // The write end stays open and silent, like an unresponsive controller.
        let (link, _controller) = link::silent_serial_link();

        let result = runtime.block_on(async {
            let channel = CommandChannel::new(
                link,
                LinkTimings {
                    read_timeout: Duration::from_millis(200),
                    extended_delay: Duration::ZERO,
                },
            );
            channel.send_command(CommandCode::Stop).await
        });
        assert!(matches!(
            result,
            Err(RoverError::LinkTimeout { command: CommandCode::Stop, .. })
        ));

        let started = Instant::now();
        shutdown(runtime);
        assert!(started.elapsed() < SHUTDOWN_GRACE + Duration::from_secs(2));
    }
}
