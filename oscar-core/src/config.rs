//! Common configuration plumbing, mirrored after the teacher's
//! `opcua_core::config::Config` trait: a thin save/load/validate contract
//! over serde + YAML. Loading a config file from disk, flags, or the
//! environment is outside the core's scope (§1); this just gives the
//! recognized values (§6.3) a concrete, serializable shape.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::rate_limiter::RateLimiterConfig;

/// Error returned from saving or loading config objects.
#[derive(Debug)]
pub enum ConfigError {
    /// Configuration is invalid, with a list of validation errors.
    Invalid(Vec<String>),
    /// Reading or writing the file failed.
    Io(std::io::Error),
    /// Failed to serialize or deserialize the config object.
    Yaml(serde_yaml::Error),
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Yaml(value)
    }
}

/// A trait for configuration objects that can be loaded, saved, and
/// validated.
pub trait Config: Serialize {
    fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Err(e) = self.validate() {
            return Err(ConfigError::Invalid(e));
        }
        let s = serde_yaml::to_string(&self)?;
        let mut f = File::create(path)?;
        f.write_all(s.as_bytes())?;
        Ok(())
    }

    fn load<A>(path: &Path) -> Result<A, ConfigError>
    where
        for<'de> A: Config + Deserialize<'de>,
    {
        let mut f = File::open(path)?;
        let mut s = String::new();
        f.read_to_string(&mut s)?;
        let config: A = serde_yaml::from_str(&s)?;
        if let Err(e) = config.validate() {
            return Err(ConfigError::Invalid(e));
        }
        Ok(config)
    }

    /// Validate the config struct, returning a list of validation errors if
    /// it fails.
    fn validate(&self) -> Result<(), Vec<String>>;
}

/// Per-listener configuration recognized by the supervisor (§6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// TCP bind address for this listener, e.g. `"0.0.0.0:5190"`.
    pub bos_listen_address: String,
    /// Hostname:port returned to clients in login cookies for plaintext
    /// follow-on connections.
    pub bos_advertised_host_plain: String,
    /// Same, for the TLS-terminated variant.
    pub bos_advertised_host_ssl: Option<String>,
    /// Whether the SSL-advertised host is populated and should be offered.
    pub has_ssl: bool,
}

impl ListenerConfig {
    /// The host:port this listener advertises to a given connection,
    /// honoring `has_ssl` the way the signon state machine expects.
    pub fn advertised_host(&self, want_ssl: bool) -> &str {
        if want_ssl {
            self.bos_advertised_host_ssl
                .as_deref()
                .unwrap_or(&self.bos_advertised_host_plain)
        } else {
            &self.bos_advertised_host_plain
        }
    }
}

impl Config for ListenerConfig {
    fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.bos_listen_address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "bos_listen_address {:?} is not a valid socket address",
                self.bos_listen_address
            ));
        }
        if self.has_ssl && self.bos_advertised_host_ssl.is_none() {
            errors.push("has_ssl is set but bos_advertised_host_ssl is empty".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Top-level server configuration: one or more listeners plus the global
/// IP rate limiter parameters and the initial FLAP sequence seed (§6.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listeners: Vec<ListenerConfig>,
    pub rate_per_sec: f64,
    pub burst: f64,
    pub entry_ttl_secs: u64,
    #[serde(default = "default_sequence_seed")]
    pub initial_sequence_seed: u16,
}

fn default_sequence_seed() -> u16 {
    oscar_types::flap::INITIAL_SEQUENCE
}

impl ServerConfig {
    pub fn rate_limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            rate_per_sec: self.rate_per_sec,
            burst: self.burst,
            entry_ttl: Duration::from_secs(self.entry_ttl_secs),
        }
    }
}

impl Config for ServerConfig {
    fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.listeners.is_empty() {
            errors.push("at least one listener must be configured".to_string());
        }
        for listener in &self.listeners {
            if let Err(mut e) = listener.validate() {
                errors.append(&mut e);
            }
        }
        if self.rate_per_sec < 0.0 {
            errors.push("rate_per_sec must be non-negative".to_string());
        }
        if self.burst < 0.0 {
            errors.push("burst must be non-negative".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Load a [`ServerConfig`] from a YAML file at `path`. Provided for
/// completeness since the `Config` trait implies it; no CLI or environment
/// wiring is built around this (config loading is out of the core's scope).
pub fn load_from_path(path: &Path) -> Result<ServerConfig, ConfigError> {
    Config::load(path)
}
