//! # Configuration
//!
//! [`HubManagerConfig`] holds the tunables of the hub manager: reconnection
//! backoff, transport timeouts, keep-alive, and the name of the hub that
//! authenticates through a query-string token.
//!
//! Build one in code with [`HubManagerConfig::new`], or let
//! [`HubManagerConfig::discover`] find a `realtime.toml`. A few
//! `FIELDOPS_*` environment variables override whatever the file says.

use serde::{Deserialize, Serialize};
#[cfg(feature = "config-toml")]
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HubError, HubResult};

/// Hub that receives its token as an `access_token` query parameter.
pub const DEFAULT_GEOLOCATION_HUB_NAME: &str = "geolocationHub";

/// Maximum reconnection attempts before a hub is torn down.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Base reconnection delay in milliseconds.
const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 5000;

/// Cap on the exponential backoff multiplier.
const DEFAULT_MAX_BACKOFF_MULTIPLIER: u32 = 8;

/// Upper bound (exclusive) of the random jitter added to each delay.
const DEFAULT_MAX_JITTER_MS: u64 = 1000;

/// Default transport connect timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;

/// Default protocol handshake timeout in seconds.
const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 15;

/// Default invocation timeout in seconds.
const DEFAULT_INVOKE_TIMEOUT_SECS: u64 = 30;

/// Default client ping interval in seconds.
const DEFAULT_PING_INTERVAL_SECS: u64 = 15;

/// Default server silence tolerated before the session is declared lost.
const DEFAULT_SERVER_TIMEOUT_SECS: u64 = 30;

#[cfg(feature = "config-toml")]
const CONFIG_PATH_ENV: &str = "FIELDOPS_REALTIME_CONFIG";

#[cfg(feature = "config-toml")]
const CONFIG_FILE_NAME: &str = "realtime.toml";

/// Configuration for the hub manager.
///
/// # Examples
///
/// ## Programmatic
///
/// ```
/// use fieldops_realtime::config::HubManagerConfig;
///
/// let config = HubManagerConfig::new().with_geolocation_hub("geoHub");
/// assert_eq!(config.geolocation_hub_name, "geoHub");
/// ```
///
/// ## Loaded from disk
///
/// ```no_run
/// use fieldops_realtime::config::HubManagerConfig;
///
/// let config = HubManagerConfig::from_file("realtime.toml").expect("Bad config");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubManagerConfig {
    /// Hub name whose transport cannot carry an auth header.
    #[serde(default = "default_geolocation_hub_name")]
    pub geolocation_hub_name: String,

    /// Reconnection behavior after an unexpected close.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Transport timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Keep-alive settings for live sessions.
    #[serde(default)]
    pub keep_alive: KeepAliveConfig,
}

/// Reconnection backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Enable automatic reconnection on unexpected close.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Number of attempts before the hub is torn down.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay unit multiplied by the backoff factor, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap on the `2^attempt` multiplier.
    #[serde(default = "default_max_backoff_multiplier")]
    pub max_backoff_multiplier: u32,

    /// Jitter is drawn from `[0, max_jitter_ms)`.
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
}

/// Timeout settings for hub transports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Timeout for opening the WebSocket, in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Timeout for the hub protocol handshake, in seconds.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Timeout for a single invocation, in seconds.
    #[serde(default = "default_invoke_timeout")]
    pub invoke_timeout_secs: u64,
}

/// Keep-alive settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepAliveConfig {
    /// Interval between client pings, in seconds.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Server silence after which the session is considered lost, in seconds.
    #[serde(default = "default_server_timeout")]
    pub server_timeout_secs: u64,
}

// serde defaults

fn default_geolocation_hub_name() -> String {
    DEFAULT_GEOLOCATION_HUB_NAME.to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    MAX_RECONNECT_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_RECONNECT_BASE_DELAY_MS
}

fn default_max_backoff_multiplier() -> u32 {
    DEFAULT_MAX_BACKOFF_MULTIPLIER
}

fn default_max_jitter_ms() -> u64 {
    DEFAULT_MAX_JITTER_MS
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_handshake_timeout() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_SECS
}

fn default_invoke_timeout() -> u64 {
    DEFAULT_INVOKE_TIMEOUT_SECS
}

fn default_ping_interval() -> u64 {
    DEFAULT_PING_INTERVAL_SECS
}

fn default_server_timeout() -> u64 {
    DEFAULT_SERVER_TIMEOUT_SECS
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            base_delay_ms: DEFAULT_RECONNECT_BASE_DELAY_MS,
            max_backoff_multiplier: DEFAULT_MAX_BACKOFF_MULTIPLIER,
            max_jitter_ms: DEFAULT_MAX_JITTER_MS,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
            invoke_timeout_secs: DEFAULT_INVOKE_TIMEOUT_SECS,
        }
    }
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: DEFAULT_PING_INTERVAL_SECS,
            server_timeout_secs: DEFAULT_SERVER_TIMEOUT_SECS,
        }
    }
}

impl Default for HubManagerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeoutConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_secs(self.invoke_timeout_secs)
    }
}

impl KeepAliveConfig {
    /// Ping period, never shorter than one second.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    /// Server silence budget, never shorter than one second.
    pub fn server_timeout(&self) -> Duration {
        Duration::from_secs(self.server_timeout_secs.max(1))
    }
}

impl HubManagerConfig {
    /// Create a config with every field at its default.
    pub fn new() -> Self {
        Self {
            geolocation_hub_name: default_geolocation_hub_name(),
            reconnect: ReconnectConfig::default(),
            timeouts: TimeoutConfig::default(),
            keep_alive: KeepAliveConfig::default(),
        }
    }

    /// Override the designated query-token hub.
    #[must_use]
    pub fn with_geolocation_hub(mut self, hub_name: impl Into<String>) -> Self {
        self.geolocation_hub_name = hub_name.into();
        self
    }

    /// Load config from environment variables on top of the defaults.
    ///
    /// Recognized: `FIELDOPS_GEO_HUB_NAME`, `FIELDOPS_RECONNECT_MAX_ATTEMPTS`,
    /// `FIELDOPS_RECONNECT_BASE_DELAY_MS`.
    ///
    /// # Errors
    /// Returns [`HubError::Config`] if a numeric variable does not parse or
    /// the resulting config is invalid.
    pub fn from_env() -> HubResult<Self> {
        let mut config = Self::new();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file, then layer the environment overrides on top.
    ///
    /// # Errors
    /// Returns [`HubError::Config`] if the file cannot be read, parsed, or
    /// fails validation.
    #[cfg(feature = "config-toml")]
    pub fn from_file(path: impl AsRef<Path>) -> HubResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| HubError::Config {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        let mut config = toml::from_str::<Self>(&contents)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load the first config file found, in order:
    ///
    /// 1. `explicit_path`, which must exist when given
    /// 2. the file named by `FIELDOPS_REALTIME_CONFIG`
    /// 3. `./realtime.toml`
    /// 4. `realtime.toml` in the user config directory
    ///
    /// With no file anywhere, this is [`HubManagerConfig::from_env`].
    ///
    /// # Errors
    /// Returns [`HubError::Config`] for unreadable or invalid files.
    #[cfg(feature = "config-toml")]
    pub fn discover(explicit_path: Option<&Path>) -> HubResult<Self> {
        if let Some(path) = explicit_path {
            return Self::from_file(path);
        }

        let mut candidates = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .into_iter()
            .chain(std::iter::once(PathBuf::from(CONFIG_FILE_NAME)))
            .chain(user_config_path());

        match candidates.find(|candidate| candidate.is_file()) {
            Some(found) => {
                tracing::debug!(path = %found.display(), "Loading hub config");
                Self::from_file(found)
            }
            None => Self::from_env(),
        }
    }

    /// Check that the config can drive a reconnection loop.
    ///
    /// # Errors
    /// Returns [`HubError::Config`] naming the offending field.
    pub fn validate(&self) -> HubResult<()> {
        if self.reconnect.max_attempts == 0 {
            return Err(HubError::Config {
                reason: "reconnect.max_attempts must be at least 1".into(),
            });
        }
        if self.reconnect.max_backoff_multiplier == 0 {
            return Err(HubError::Config {
                reason: "reconnect.max_backoff_multiplier must be at least 1".into(),
            });
        }
        if self.keep_alive.ping_interval_secs == 0 || self.keep_alive.server_timeout_secs == 0 {
            return Err(HubError::Config {
                reason: "keep_alive intervals must be non-zero".into(),
            });
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) -> HubResult<()> {
        if let Ok(name) = std::env::var("FIELDOPS_GEO_HUB_NAME") {
            self.geolocation_hub_name = name;
        }
        if let Ok(value) = std::env::var("FIELDOPS_RECONNECT_MAX_ATTEMPTS") {
            self.reconnect.max_attempts = parse_env("FIELDOPS_RECONNECT_MAX_ATTEMPTS", &value)?;
        }
        if let Ok(value) = std::env::var("FIELDOPS_RECONNECT_BASE_DELAY_MS") {
            self.reconnect.base_delay_ms = parse_env("FIELDOPS_RECONNECT_BASE_DELAY_MS", &value)?;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> HubResult<T> {
    value.trim().parse().map_err(|_| HubError::Config {
        reason: format!("{key} has an invalid value '{value}'"),
    })
}

/// `realtime.toml` under `%APPDATA%/fieldops` or `$HOME/.config/fieldops`.
#[cfg(feature = "config-toml")]
fn user_config_path() -> Option<PathBuf> {
    let (var, nested): (&str, &[&str]) = if cfg!(target_os = "windows") {
        ("APPDATA", &["fieldops"])
    } else {
        ("HOME", &[".config", "fieldops"])
    };
    let mut path = PathBuf::from(std::env::var_os(var)?);
    path.extend(nested);
    path.push(CONFIG_FILE_NAME);
    Some(path)
}
