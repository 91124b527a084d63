//! Configuration for the TURN relay
//!
//! Values come from `TURN_*` environment variables (and a `.env` file when
//! present) layered over defaults. The core crates never read the
//! environment; they take the [`ServiceOptions`] built here.

use config::{Config, Environment};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;
use std::time::Duration;
use thiserror::Error;
use turn_core::{AllocationOptions, ServiceOptions, StaticCredentials};

pub use turn_logging::LogFormat;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// One listening interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceConfig {
    /// Local socket address to bind
    pub bind: SocketAddr,
    /// Address clients reach the interface at; relay addresses use its IP
    pub external: SocketAddr,
}

/// Values as they appear in the environment, before validation
#[derive(Debug, Deserialize)]
struct RawConfig {
    realm: String,
    software: String,
    interfaces: String,
    users: String,
    default_lifetime: u64,
    max_lifetime: u64,
    permission_lifetime: u64,
    channel_lifetime: u64,
    nonce_ttl: u64,
    nonce_capacity: usize,
    auth_timeout_ms: u64,
    port_range_start: u16,
    port_range_end: u16,
    max_allocations: usize,
    user_quota: usize,
    sweep_interval: u64,
    max_pending_requests: usize,
    log_level: String,
    log_format: String,
}

/// Relay configuration
#[derive(Clone)]
pub struct TurnConfig {
    pub realm: String,
    pub software: String,
    pub interfaces: Vec<InterfaceConfig>,
    /// Static credential store, username -> password
    pub users: HashMap<String, String>,
    pub default_lifetime: Duration,
    pub max_lifetime: Duration,
    pub permission_lifetime: Duration,
    pub channel_lifetime: Duration,
    pub nonce_ttl: Duration,
    pub nonce_capacity: usize,
    pub auth_timeout: Duration,
    pub port_range: RangeInclusive<u16>,
    pub max_allocations: usize,
    pub user_quota: usize,
    pub sweep_interval: Duration,
    /// Requests handled concurrently before new ones are dropped
    pub max_pending_requests: usize,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl TurnConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        Self::from_source(Environment::with_prefix("TURN"))
    }

    /// Load configuration from an explicit environment source
    pub fn from_source(environment: Environment) -> Result<Self, ConfigError> {
        let raw: RawConfig = Config::builder()
            .set_default("realm", "localhost")?
            .set_default("software", "turn-relay")?
            .set_default("interfaces", "0.0.0.0:3478@127.0.0.1:3478")?
            .set_default("users", "")?
            .set_default("default_lifetime", 600)?
            .set_default("max_lifetime", 3600)?
            .set_default("permission_lifetime", 300)?
            .set_default("channel_lifetime", 600)?
            .set_default("nonce_ttl", 3600)?
            .set_default("nonce_capacity", 65536)?
            .set_default("auth_timeout_ms", 5000)?
            .set_default("port_range_start", 49152)?
            .set_default("port_range_end", 65535)?
            .set_default("max_allocations", 0)?
            .set_default("user_quota", 0)?
            .set_default("sweep_interval", 5)?
            .set_default("max_pending_requests", 1024)?
            .set_default("log_level", "info")?
            .set_default("log_format", "console")?
            .add_source(environment.try_parsing(true))
            .build()?
            .try_deserialize()?;

        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        if raw.realm.is_empty() {
            return Err(ConfigError::Invalid {
                key: "TURN_REALM",
                value: raw.realm,
            });
        }

        if raw.port_range_start > raw.port_range_end {
            return Err(ConfigError::Invalid {
                key: "TURN_PORT_RANGE_START",
                value: format!("{} > {}", raw.port_range_start, raw.port_range_end),
            });
        }

        if raw.default_lifetime == 0 || raw.default_lifetime > raw.max_lifetime {
            return Err(ConfigError::Invalid {
                key: "TURN_DEFAULT_LIFETIME",
                value: raw.default_lifetime.to_string(),
            });
        }

        if raw.sweep_interval == 0 {
            return Err(ConfigError::Invalid {
                key: "TURN_SWEEP_INTERVAL",
                value: raw.sweep_interval.to_string(),
            });
        }

        let log_format = match raw.log_format.to_ascii_lowercase().as_str() {
            "console" => LogFormat::Console,
            "json" => LogFormat::Json,
            _ => {
                return Err(ConfigError::Invalid {
                    key: "TURN_LOG_FORMAT",
                    value: raw.log_format,
                })
            }
        };

        Ok(Self {
            interfaces: parse_interfaces(&raw.interfaces)?,
            users: parse_users(&raw.users)?,
            realm: raw.realm,
            software: raw.software,
            default_lifetime: Duration::from_secs(raw.default_lifetime),
            max_lifetime: Duration::from_secs(raw.max_lifetime),
            permission_lifetime: Duration::from_secs(raw.permission_lifetime),
            channel_lifetime: Duration::from_secs(raw.channel_lifetime),
            nonce_ttl: Duration::from_secs(raw.nonce_ttl),
            nonce_capacity: raw.nonce_capacity,
            auth_timeout: Duration::from_millis(raw.auth_timeout_ms),
            port_range: raw.port_range_start..=raw.port_range_end,
            max_allocations: raw.max_allocations,
            user_quota: raw.user_quota,
            sweep_interval: Duration::from_secs(raw.sweep_interval),
            max_pending_requests: raw.max_pending_requests,
            log_level: raw.log_level,
            log_format,
        })
    }

    /// Distinct external IPs, in interface order
    pub fn relay_addresses(&self) -> Vec<IpAddr> {
        let mut addresses = Vec::new();
        for interface in &self.interfaces {
            let ip = interface.external.ip();
            if !addresses.contains(&ip) {
                addresses.push(ip);
            }
        }
        addresses
    }

    pub fn to_service_options(&self) -> ServiceOptions {
        ServiceOptions {
            realm: self.realm.clone(),
            software: self.software.clone(),
            allocation: AllocationOptions {
                default_lifetime: self.default_lifetime,
                max_lifetime: self.max_lifetime,
                permission_lifetime: self.permission_lifetime,
                channel_lifetime: self.channel_lifetime,
                max_allocations: self.max_allocations,
                user_quota: self.user_quota,
            },
            relay_addresses: self.relay_addresses(),
            port_range: self.port_range.clone(),
            nonce_ttl: self.nonce_ttl,
            nonce_capacity: self.nonce_capacity,
            auth_timeout: self.auth_timeout,
        }
    }

    /// Static credential store built from `TURN_USERS`
    pub fn credentials(&self) -> StaticCredentials {
        StaticCredentials::new(self.users.clone())
    }

    /// Get log level, defaulting to "info"
    pub fn log_level(&self) -> &str {
        if self.log_level.is_empty() {
            "info"
        } else {
            &self.log_level
        }
    }
}

impl std::fmt::Debug for TurnConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnConfig")
            .field("realm", &self.realm)
            .field("interfaces", &self.interfaces)
            .field("users", &self.users.len())
            .field("port_range", &self.port_range)
            .field("max_lifetime", &self.max_lifetime)
            .finish_non_exhaustive()
    }
}

/// Parse `bind@external[,bind@external...]`. A bare address is used for both.
fn parse_interfaces(value: &str) -> Result<Vec<InterfaceConfig>, ConfigError> {
    let invalid = || ConfigError::Invalid {
        key: "TURN_INTERFACES",
        value: value.to_string(),
    };

    let mut interfaces = Vec::new();
    for item in value.split(',').map(str::trim).filter(|item| !item.is_empty()) {
        let (bind, external) = item.split_once('@').unwrap_or((item, item));
        let bind: SocketAddr = bind.trim().parse().map_err(|_| invalid())?;
        let external: SocketAddr = external.trim().parse().map_err(|_| invalid())?;
        if external.ip().is_unspecified() {
            return Err(invalid());
        }
        interfaces.push(InterfaceConfig { bind, external });
    }

    if interfaces.is_empty() {
        return Err(invalid());
    }
    Ok(interfaces)
}

/// Parse `username:password[,username:password...]`
fn parse_users(value: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut users = HashMap::new();
    for item in value.split(',').map(str::trim).filter(|item| !item.is_empty()) {
        match item.split_once(':') {
            Some((username, password)) if !username.is_empty() => {
                users.insert(username.to_string(), password.to_string());
            }
            _ => {
                return Err(ConfigError::Invalid {
                    key: "TURN_USERS",
                    value: item.to_string(),
                })
            }
        }
    }
    Ok(users)
}
