//! Personality configuration using Figment.
//!
//! Configuration is loaded from (in order of precedence, highest first):
//! 1. Environment variables prefixed with `PERSONALITY_`, nested keys split on `__`
//! 2. A TOML file (default: `config/personality.toml`)
//! 3. Built-in defaults
//!
//! # Example
//!
//! ```no_run
//! use cam_personality::config::Settings;
//!
//! let settings = Settings::load_from("config/personality.toml")?;
//! println!("Query port: {}", settings.query_server.port);
//! # Ok::<(), cam_personality::error::PersonalityError>(())
//! ```
//!
//! # Environment Variables
//!
//! ```text
//! PERSONALITY_APPLICATION__LOG_LEVEL=debug
//! PERSONALITY_QUERY_SERVER__PORT=7777
//! PERSONALITY_STATUS__INTERVAL=5s
//! ```

use crate::error::{AppResult, PersonalityError};
use crate::header::MissingKeyPolicy;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/personality.toml";
/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "PERSONALITY_";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub application: ApplicationConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub header: HeaderConfig,
    #[serde(default)]
    pub query_server: QueryServerConfig,
    #[serde(default)]
    pub exec: ExecConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Instrument name used in logs
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Upper bound on waiting for background tasks at shutdown
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Periodic status export and header refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Interval between status exports
    #[serde(default = "default_status_interval", with = "humantime_serde")]
    pub interval: Duration,
    /// Interval between header refreshes (zero disables the job)
    #[serde(default = "default_header_refresh_interval", with = "humantime_serde")]
    pub header_refresh_interval: Duration,
}

/// Header-definition sources and assembly options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderConfig {
    /// Primary (telescope) definition file
    #[serde(default = "default_telescope_definitions")]
    pub telescope_definitions: PathBuf,
    /// Auxiliary-optics definition file
    #[serde(default = "default_auxiliary_definitions")]
    pub auxiliary_definitions: PathBuf,
    /// Whether the auxiliary status dictionary is refreshed
    #[serde(default = "default_true")]
    pub auxiliary_enabled: bool,
    /// Banner title preceding the auxiliary block
    #[serde(default = "default_auxiliary_title")]
    pub auxiliary_title: String,
    /// OBJECT value used when a request does not name a target
    #[serde(default = "default_object")]
    pub default_object: String,
    #[serde(default)]
    pub missing_key_policy: MissingKeyPolicy,
}

/// On-demand header query socket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryServerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// TCP port; 0 picks an ephemeral port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bound on one accept poll; a stop request is observed within it
    #[serde(default = "default_accept_timeout", with = "humantime_serde")]
    pub accept_timeout: Duration,
    /// Bound on reading a request from an accepted connection
    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
    /// Upper bound on frame ids handed out by one `seqno` or `reqframes`
    #[serde(default = "default_max_frames_per_request")]
    pub max_frames_per_request: u32,
}

impl QueryServerConfig {
    /// `bind_address:port` as handed to the listener.
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// External actor command execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Program wrapping one actor command
    #[serde(default = "default_one_cmd")]
    pub one_cmd: String,
    /// Stop collecting stdout after this many lines
    #[serde(default = "default_max_output_lines")]
    pub max_output_lines: usize,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_name() -> String {
    "CHARIS".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_status_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_header_refresh_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_telescope_definitions() -> PathBuf {
    PathBuf::from("config/header_telescope.txt")
}

fn default_auxiliary_definitions() -> PathBuf {
    PathBuf::from("config/header_ao188_lgs.txt")
}

fn default_true() -> bool {
    true
}

fn default_auxiliary_title() -> String {
    "Parameters for AO188/LGS".to_string()
}

fn default_object() -> String {
    "planetX".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    6666
}

fn default_accept_timeout() -> Duration {
    Duration::from_millis(500)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_max_request_bytes() -> usize {
    1024
}

fn default_max_frames_per_request() -> u32 {
    1000
}

fn default_one_cmd() -> String {
    "oneCmd.py".to_string()
}

fn default_max_output_lines() -> usize {
    1000
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            interval: default_status_interval(),
            header_refresh_interval: default_header_refresh_interval(),
        }
    }
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            telescope_definitions: default_telescope_definitions(),
            auxiliary_definitions: default_auxiliary_definitions(),
            auxiliary_enabled: true,
            auxiliary_title: default_auxiliary_title(),
            default_object: default_object(),
            missing_key_policy: MissingKeyPolicy::default(),
        }
    }
}

impl Default for QueryServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_bind_address(),
            port: default_port(),
            accept_timeout: default_accept_timeout(),
            read_timeout: default_read_timeout(),
            max_request_bytes: default_max_request_bytes(),
            max_frames_per_request: default_max_frames_per_request(),
        }
    }
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            one_cmd: default_one_cmd(),
            max_output_lines: default_max_output_lines(),
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl Settings {
    /// Load from the default file location and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file and the environment, then validate.
    ///
    /// A missing file is not an error; defaults and environment overrides apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Self = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from TOML text without consulting the environment.
    pub fn from_toml_str(text: &str) -> AppResult<Self> {
        let settings: Self = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::string(text))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Status interval, accept timeout and read timeout are non-zero
    /// - Request buffer and frame cap are non-zero
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(PersonalityError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.status.interval.is_zero() {
            return Err(PersonalityError::Configuration(
                "status.interval must be greater than zero".to_string(),
            ));
        }

        if self.query_server.accept_timeout.is_zero() || self.query_server.read_timeout.is_zero() {
            return Err(PersonalityError::Configuration(
                "query_server timeouts must be greater than zero".to_string(),
            ));
        }

        if self.query_server.max_request_bytes == 0 {
            return Err(PersonalityError::Configuration(
                "query_server.max_request_bytes must be greater than zero".to_string(),
            ));
        }

        if self.query_server.max_frames_per_request == 0 {
            return Err(PersonalityError::Configuration(
                "query_server.max_frames_per_request must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.query_server.port, 6666);
        assert_eq!(settings.query_server.max_request_bytes, 1024);
        assert_eq!(settings.query_server.max_frames_per_request, 1000);
        assert_eq!(settings.query_server.address(), "0.0.0.0:6666");
        assert_eq!(settings.status.interval, Duration::from_secs(10));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings = Settings::from_toml_str(
            r#"
            [status]
            interval = "250ms"

            [query_server]
            port = 7000
            "#,
        )
        .unwrap();
        assert_eq!(settings.status.interval, Duration::from_millis(250));
        assert_eq!(settings.query_server.port, 7000);
        assert_eq!(settings.query_server.accept_timeout, Duration::from_millis(500));
        assert_eq!(settings.header.missing_key_policy, MissingKeyPolicy::Substitute);
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let err = Settings::from_toml_str("[application]\nlog_level = \"loud\"\n").unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("log_level"));
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[query_server]\nport = 7000").unwrap();

        std::env::set_var("PERSONALITY_QUERY_SERVER__PORT", "7100");
        let settings = Settings::load_from(file.path());
        std::env::remove_var("PERSONALITY_QUERY_SERVER__PORT");

        assert_eq!(settings.unwrap().query_server.port, 7100);
    }
}
