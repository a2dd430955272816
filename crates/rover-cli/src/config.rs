//! Configuration Vault – reads/writes `~/.rover/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rover_hal::LinkTimings;
use rover_types::RoverError;

/// Persisted rover configuration stored in `~/.rover/config.toml`.
///
/// Missing fields fall back to their defaults, so a partial file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bind address of the control server.
    pub control_host: String,
    pub control_port: u16,

    /// Bind address of the camera stream server.
    pub stream_host: String,
    pub stream_port: u16,

    /// Serial device of the motor/sensor controller, or `tcp://host:port`
    /// for a networked serial bridge.
    pub serial_device: String,
    pub baud_rate: u32,

    /// How long to wait for a controller reply.
    pub link_timeout_ms: u64,

    /// Delay between requesting a moisture measurement and reading it.
    pub moisture_delay_ms: u64,

    /// BCM pin driving the spray relay.
    pub spray_pin: u32,
    pub spray_duration_ms: u64,
    pub gpio_root: PathBuf,

    pub camera_width: u32,
    pub camera_height: u32,
    pub camera_framerate: u32,

    /// Camera program writing MJPEG to stdout.  `{width}`, `{height}` and
    /// `{framerate}` are substituted in every argument.
    pub camera_command: Vec<String>,

    /// Bound on writing one frame to one viewer.
    pub stream_write_timeout_ms: u64,

    /// Run against the simulated controller and relay instead of hardware.
    pub simulate: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            control_host: "0.0.0.0".to_string(),
            control_port: 8080,
            stream_host: "0.0.0.0".to_string(),
            stream_port: 8000,
            serial_device: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            link_timeout_ms: 5000,
            moisture_delay_ms: 4000,
            spray_pin: 17,
            spray_duration_ms: 2000,
            gpio_root: PathBuf::from("/sys/class/gpio"),
            camera_width: 640,
            camera_height: 480,
            camera_framerate: 24,
            camera_command: [
                "libcamera-vid",
                "-t",
                "0",
                "-n",
                "--codec",
                "mjpeg",
                "--width",
                "{width}",
                "--height",
                "{height}",
                "--framerate",
                "{framerate}",
                "-o",
                "-",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            stream_write_timeout_ms: 10_000,
            simulate: false,
        }
    }
}

impl Config {
    pub fn control_addr(&self) -> Result<SocketAddr, RoverError> {
        parse_addr(&self.control_host, self.control_port)
    }

    pub fn stream_addr(&self) -> Result<SocketAddr, RoverError> {
        parse_addr(&self.stream_host, self.stream_port)
    }

    pub fn link_timings(&self) -> LinkTimings {
        LinkTimings {
            read_timeout: Duration::from_millis(self.link_timeout_ms),
            extended_delay: Duration::from_millis(self.moisture_delay_ms),
        }
    }

    pub fn spray_duration(&self) -> Duration {
        Duration::from_millis(self.spray_duration_ms)
    }

    pub fn stream_write_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_write_timeout_ms)
    }

    /// The camera command line with resolution and frame rate filled in.
    pub fn camera_argv(&self) -> Vec<String> {
        self.camera_command
            .iter()
            .map(|arg| {
                arg.replace("{width}", &self.camera_width.to_string())
                    .replace("{height}", &self.camera_height.to_string())
                    .replace("{framerate}", &self.camera_framerate.to_string())
            })
            .collect()
    }
}

fn parse_addr(host: &str, port: u16) -> Result<SocketAddr, RoverError> {
    format!("{host}:{port}")
        .parse()
        .map_err(|e| RoverError::Config(format!("invalid bind address {host}:{port}: {e}")))
}

/// Return the config path: `$ROVER_CONFIG`, or `~/.rover/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("ROVER_CONFIG") {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".rover").join("config.toml")
}

/// Load the config, writing the defaults on first run.
///
/// Returns the config (with environment overrides applied) and whether the
/// file was freshly created.
pub fn load_or_init() -> Result<(Config, bool), RoverError> {
    let path = config_path();
    let (mut cfg, created) = match load_from(&path)? {
        Some(cfg) => (cfg, false),
        None => {
            let cfg = Config::default();
            save_to(&cfg, &path)?;
            (cfg, true)
        }
    };
    apply_env_overrides(&mut cfg);
    Ok((cfg, created))
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, RoverError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| RoverError::Config(format!("failed to read {}: {e}", path.display())))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| RoverError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `ROVER_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ROVER_CONTROL_PORT` | `control_port` |
/// | `ROVER_STREAM_PORT` | `stream_port` |
/// | `ROVER_SERIAL_DEVICE` | `serial_device` |
/// | `ROVER_SIMULATE` | `simulate` (`1`/`true`/`yes` or `0`/`false`/`no`) |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("ROVER_CONTROL_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.control_port = port;
    }
    if let Some(v) = lookup("ROVER_STREAM_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.stream_port = port;
    }
    if let Some(v) = lookup("ROVER_SERIAL_DEVICE") {
        cfg.serial_device = v;
    }
    if let Some(v) = lookup("ROVER_SIMULATE") {
        match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => cfg.simulate = true,
            "0" | "false" | "no" => cfg.simulate = false,
            _ => {}
        }
    }
}

/// Save the config to a specific path, creating its directory if necessary.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), RoverError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| RoverError::Config(format!("failed to create config directory: {e}")))?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| RoverError::Config(format!("failed to serialize config: {e}")))?;
    fs::write(path, raw)
        .map_err(|e| RoverError::Config(format!("failed to write {}: {e}", path.display())))
}
