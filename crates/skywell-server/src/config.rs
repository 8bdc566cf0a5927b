//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

use skywell_index::ResolverSettings;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Event stream settings.
    #[serde(default)]
    pub jetstream: JetstreamConfig,

    /// Identity and profile resolution.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Service-auth token validation.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Per-client request limits.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// How long a writer waits for the SQLite lock, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "skywell_index=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Jetstream consumer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JetstreamConfig {
    /// Whether to run the consumer at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Subscription endpoint, without query string.
    #[serde(default = "default_jetstream_url")]
    pub url: String,

    /// Collections requested from the relay.
    #[serde(default = "default_wanted_collections")]
    pub wanted_collections: Vec<String>,

    /// Delay before reconnecting after the stream closes, in seconds.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
}

/// Identity resolution configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// PLC directory base URL.
    #[serde(default = "default_plc_url")]
    pub plc_url: String,

    /// Base URL of the service answering `app.bsky.actor.getProfile`.
    #[serde(default = "default_profile_service_url")]
    pub profile_service_url: String,

    /// How long resolved identities are cached, in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// `User-Agent` sent to upstream services.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Service-auth configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// This AppView's DID; tokens must name it as their audience.
    #[serde(default = "default_service_did")]
    pub service_did: String,

    /// Clock skew tolerated on `exp`, in seconds.
    #[serde(default = "default_leeway_secs")]
    pub leeway_secs: u64,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per client IP per minute.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    4999
}

fn default_db_path() -> String {
    "skywell.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_jetstream_url() -> String {
    "wss://jetstream2.us-east.bsky.network/subscribe".to_string()
}

fn default_wanted_collections() -> Vec<String> {
    vec![
        skywell_types::FILE_COLLECTION.to_string(),
        skywell_types::PROFILE_COLLECTION.to_string(),
    ]
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_plc_url() -> String {
    "https://plc.directory".to_string()
}

fn default_profile_service_url() -> String {
    "https://public.api.bsky.app".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_user_agent() -> String {
    concat!("Skywell AppView v", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_service_did() -> String {
    "did:plc:tsaj4ffwyj5z6rjqaxmg5cp4".to_string()
}

fn default_leeway_secs() -> u64 {
    10
}

fn default_requests_per_minute() -> u32 {
    600
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for JetstreamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: default_jetstream_url(),
            wanted_collections: default_wanted_collections(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            plc_url: default_plc_url(),
            profile_service_url: default_profile_service_url(),
            cache_ttl_secs: default_cache_ttl_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            service_did: default_service_did(),
            leeway_secs: default_leeway_secs(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
        }
    }
}

impl IdentityConfig {
    /// Resolver settings derived from this section.
    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            plc_url: self.plc_url.clone(),
            profile_service_url: self.profile_service_url.clone(),
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            user_agent: self.user_agent.clone(),
            ..ResolverSettings::default()
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `SKYWELL_HOST` overrides `server.host`
/// - `SKYWELL_PORT` overrides `server.port`
/// - `SKYWELL_DB_PATH` overrides `database.path`
/// - `SKYWELL_LOG_LEVEL` overrides `logging.level`
/// - `SKYWELL_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `SKYWELL_JETSTREAM_URL` overrides `jetstream.url`
/// - `SKYWELL_SERVICE_DID` overrides `auth.service_did`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => parse_config(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    if let Ok(host) = std::env::var("SKYWELL_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("SKYWELL_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(db_path) = std::env::var("SKYWELL_DB_PATH") {
        config.database.path = db_path;
    }
    if let Ok(level) = std::env::var("SKYWELL_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("SKYWELL_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Ok(url) = std::env::var("SKYWELL_JETSTREAM_URL") {
        config.jetstream.url = url;
    }
    if let Ok(did) = std::env::var("SKYWELL_SERVICE_DID") {
        config.auth.service_did = did;
    }

    Ok(config)
}

/// Parses configuration text without consulting the environment.
///
/// # Errors
///
/// Returns `ConfigError::Parse` for malformed TOML or mistyped values.
pub fn parse_config(contents: &str) -> Result<Config, ConfigError> {
    Ok(toml::from_str(contents)?)
}
