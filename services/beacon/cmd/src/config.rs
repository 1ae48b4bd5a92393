//! Configuration handling for the beacon service.
//!
//! This module reads the `beacon:` section of the config file, applies
//! environment overrides and validates the result into a lifecycle config.

use anyhow::{Context, Result};
use beacon_lifecycle::{
    Announcement, DeviceId, LifecycleConfig, Protocol, Timings, DEFAULT_TAG, FAILURE_THRESHOLD,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Beacon service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    /// Remote endpoint receiving the announcement
    pub remote_addr: String,
    /// TLS server name; defaults to the remote IP
    pub server_name: Option<String>,
    /// Device identity in MAC notation
    pub device_id: String,
    /// Tag appended to the identity
    pub tag: String,
    /// TLS configuration
    pub tls: TlsConfig,
    /// Lifecycle delays
    pub timings: TimingsConfig,
}

/// TLS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Whether TLS is enabled; turning it off sends the announcement in clear
    pub enabled: bool,
    /// Path to CA certificate file
    pub ca_file: String,
    /// Path to client certificate file (mutual TLS)
    pub cert_file: String,
    /// Path to client private key file (mutual TLS)
    pub key_file: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ca_file: String::new(),
            cert_file: String::new(),
            key_file: String::new(),
        }
    }
}

/// Lifecycle delays in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingsConfig {
    /// Interval between link polls
    pub link_poll_ms: u64,
    /// Delay after the transport refused a connect outright
    pub reject_retry_ms: u64,
    /// Retry delay below the failure threshold
    pub short_backoff_ms: u64,
    /// Retry delay once the failure threshold is reached
    pub long_backoff_ms: u64,
    /// Consecutive connect failures that select the long delay
    pub failure_threshold: u32,
}

impl Default for TimingsConfig {
    fn default() -> Self {
        let timings = Timings::default();
        Self {
            link_poll_ms: timings.link_poll.as_millis() as u64,
            reject_retry_ms: timings.reject_retry.as_millis() as u64,
            short_backoff_ms: timings.short_backoff.as_millis() as u64,
            long_backoff_ms: timings.long_backoff.as_millis() as u64,
            failure_threshold: FAILURE_THRESHOLD,
        }
    }
}

impl From<&TimingsConfig> for Timings {
    fn from(config: &TimingsConfig) -> Self {
        Timings {
            link_poll: Duration::from_millis(config.link_poll_ms),
            reject_retry: Duration::from_millis(config.reject_retry_ms),
            short_backoff: Duration::from_millis(config.short_backoff_ms),
            long_backoff: Duration::from_millis(config.long_backoff_ms),
            failure_threshold: config.failure_threshold,
        }
    }
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            remote_addr: "127.0.0.1:8443".to_string(),
            server_name: None,
            device_id: "00:00:00:00:00:00".to_string(),
            tag: DEFAULT_TAG.to_string(),
            tls: TlsConfig::default(),
            timings: TimingsConfig::default(),
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    beacon: Option<BeaconConfig>,
}

impl BeaconConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(RootConfig { beacon: Some(beacon) }) => {
                    config = beacon;
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Ok(RootConfig { beacon: None }) => {
                    warn!(
                        "No beacon section in {:?}, using defaults",
                        config_path.as_ref()
                    );
                }
                Err(e) => {
                    warn!(
                        "Failed to parse config file {:?}, using defaults: {}",
                        config_path.as_ref(),
                        e
                    );
                }
            },
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", config_path.as_ref());
            }
        }

        config.apply_environment_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides(&mut self) {
        if let Ok(remote_addr) = std::env::var("BEACON_REMOTE_ADDR") {
            self.remote_addr = remote_addr;
            info!("Remote address overridden by environment: {}", self.remote_addr);
        }

        if let Ok(server_name) = std::env::var("BEACON_SERVER_NAME") {
            info!("Server name overridden by environment: {}", server_name);
            self.server_name = Some(server_name);
        }

        if let Ok(device_id) = std::env::var("BEACON_DEVICE_ID") {
            self.device_id = device_id;
            info!("Device ID overridden by environment: {}", self.device_id);
        }

        if let Ok(tag) = std::env::var("BEACON_TAG") {
            self.tag = tag;
            info!("Tag overridden by environment: {}", self.tag);
        }
    }

    /// Parsed remote endpoint
    pub fn remote(&self) -> Result<SocketAddr> {
        self.remote_addr
            .parse()
            .with_context(|| format!("Invalid remote address: {}", self.remote_addr))
    }

    /// TLS server name, falling back to the remote IP
    pub fn server_name(&self) -> Result<String> {
        match &self.server_name {
            Some(name) => Ok(name.clone()),
            None => Ok(self.remote()?.ip().to_string()),
        }
    }

    /// Validate into the lifecycle configuration
    pub fn to_lifecycle_config(&self) -> Result<LifecycleConfig> {
        let identity: DeviceId = self.device_id.parse()?;
        let announcement = Announcement::new(identity).with_tag(self.tag.as_str());
        let protocol = if self.tls.enabled {
            Protocol::SecureStream
        } else {
            Protocol::PlainStream
        };
        let config = LifecycleConfig::new(self.remote()?, announcement, (&self.timings).into())?
            .with_protocol(protocol);
        Ok(config)
    }
}
