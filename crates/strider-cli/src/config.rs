//! Configuration Vault – reads/writes `~/.strider/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use strider_runtime::{ExecutorConfig, VelocityLimits, VelocityRoute};
use strider_teach::session::DEFAULT_ROBOT_IP;
use strider_teach::{DEFAULT_TEACH_PORT, MAX_KEEP_ALIVE_INTERVAL, RecordLayout, TeachSessionConfig};

/// Persisted operator configuration stored in `~/.strider/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Robot address on the local network.
    #[serde(default = "default_robot_ip")]
    pub robot_ip: String,

    /// UDP port of the teach-mode protocol.
    #[serde(default = "default_teach_port")]
    pub teach_port: u16,

    #[serde(default = "default_keep_alive_ms")]
    pub keep_alive_ms: u64,

    /// Pause between the four handshake frames.
    #[serde(default = "default_handshake_delay_ms")]
    pub handshake_delay_ms: u64,

    /// Quiet period that ends an action-list reply.
    #[serde(default = "default_reply_idle_ms")]
    pub reply_idle_ms: u64,

    /// Action-list record width in bytes (36 or 76).
    #[serde(default = "default_record_width")]
    pub action_record_width: usize,

    /// Control-channel reply timeout.
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,

    /// How long `/gesture` waits for the completion signal.
    #[serde(default = "default_gesture_timeout_ms")]
    pub gesture_timeout_ms: u64,

    #[serde(default = "default_deadband")]
    pub deadband: f32,

    #[serde(default)]
    pub velocity_route: VelocityRoute,
}

fn default_robot_ip() -> String {
    DEFAULT_ROBOT_IP.to_string()
}
fn default_teach_port() -> u16 {
    DEFAULT_TEACH_PORT
}
fn default_keep_alive_ms() -> u64 {
    4500
}
fn default_handshake_delay_ms() -> u64 {
    100
}
fn default_reply_idle_ms() -> u64 {
    2000
}
fn default_record_width() -> usize {
    RecordLayout::default().width()
}
fn default_reply_timeout_ms() -> u64 {
    2000
}
fn default_gesture_timeout_ms() -> u64 {
    15_000
}
fn default_deadband() -> f32 {
    0.05
}

impl Default for Config {
    fn default() -> Self {
        Self {
            robot_ip: default_robot_ip(),
            teach_port: default_teach_port(),
            keep_alive_ms: default_keep_alive_ms(),
            handshake_delay_ms: default_handshake_delay_ms(),
            reply_idle_ms: default_reply_idle_ms(),
            action_record_width: default_record_width(),
            reply_timeout_ms: default_reply_timeout_ms(),
            gesture_timeout_ms: default_gesture_timeout_ms(),
            deadband: default_deadband(),
            velocity_route: VelocityRoute::default(),
        }
    }
}

impl Config {
    /// Teach-session settings derived from this config.
    pub fn teach_config(&self) -> Result<TeachSessionConfig, String> {
        let ip: IpAddr = self
            .robot_ip
            .parse()
            .map_err(|e| format!("Invalid robot_ip '{}': {}", self.robot_ip, e))?;
        let layout = RecordLayout::from_width(self.action_record_width).ok_or_else(|| {
            format!(
                "Unsupported action_record_width {} (expected 36 or 76)",
                self.action_record_width
            )
        })?;
        let mut teach = TeachSessionConfig::for_robot(ip, self.teach_port);
        teach.keep_alive_interval = Duration::from_millis(self.keep_alive_ms);
        teach.handshake_delay = Duration::from_millis(self.handshake_delay_ms);
        teach.reply_idle_timeout = Duration::from_millis(self.reply_idle_ms);
        teach.record_layout = layout;
        teach.validate().map_err(|e| e.to_string())?;
        Ok(teach)
    }

    /// Executor settings derived from this config.
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            reply_timeout: Duration::from_millis(self.reply_timeout_ms),
            action_timeout: Duration::from_millis(self.gesture_timeout_ms),
            velocity_limits: VelocityLimits {
                deadband: self.deadband,
                ..VelocityLimits::default()
            },
            velocity_route: self.velocity_route,
            ..ExecutorConfig::default()
        }
    }
}

/// Return the path to `~/.strider/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".strider").join("config.toml")
}

/// Load the config from disk. Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `STRIDER_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `STRIDER_ROBOT_IP` | `robot_ip` |
/// | `STRIDER_TEACH_PORT` | `teach_port` |
/// | `STRIDER_KEEPALIVE_MS` | `keep_alive_ms` |
/// | `STRIDER_RECORD_WIDTH` | `action_record_width` |
///
/// Unparsable values are ignored, as are keep-alive periods outside
/// `(0, 5000)` ms.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("STRIDER_ROBOT_IP") {
        cfg.robot_ip = v;
    }
    if let Some(v) = lookup("STRIDER_TEACH_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.teach_port = port;
    }
    if let Some(v) = lookup("STRIDER_KEEPALIVE_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        if ms > 0 && Duration::from_millis(ms) < MAX_KEEP_ALIVE_INTERVAL {
            cfg.keep_alive_ms = ms;
        } else {
            warn!(keep_alive_ms = ms, "STRIDER_KEEPALIVE_MS out of range, ignored");
        }
    }
    if let Some(v) = lookup("STRIDER_RECORD_WIDTH")
        && let Ok(width) = v.parse::<usize>()
    {
        cfg.action_record_width = width;
    }
}

/// Save the config to disk, creating `~/.strider/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner only (rwx------).
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
