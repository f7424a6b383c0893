//! Server configuration loading from file and environment variables.

use callpilot_ari::AriConfig;
use callpilot_observe::{CALLS_CREATE_SUBJECT, CALLS_TRACK_SUBJECT};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Sounds HTTP surface.
    #[serde(default)]
    pub server: ServerConfig,

    /// Telephony engine control channel.
    #[serde(default)]
    pub ari: AriConfig,

    /// Lifecycle event bus.
    #[serde(default)]
    pub bus: BusConfig,

    /// Restart policy for the control-channel generation loop.
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Dial string used for transfers; `{destination}` is replaced by the
    /// number the assistant transfers to.
    #[serde(default = "default_transfer_endpoint")]
    pub transfer_endpoint: String,

    /// JSON array of `{productRef, type, credentials}` records.
    #[serde(default = "default_integrations_file")]
    pub integrations_file: String,

    /// JSON array of application records keyed by `ref`.
    #[serde(default = "default_applications_file")]
    pub applications_file: String,

    /// JSON-lines file the call tracker appends finished calls to.
    #[serde(default = "default_call_records_file")]
    pub call_records_file: String,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration for the sounds HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Base URL the telephony engine uses to reach `/sounds`.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    /// NATS server URL. Without one, events stay in process.
    #[serde(default)]
    pub nats_url: Option<String>,

    /// Queue group shared by call tracker replicas.
    #[serde(default = "default_queue_group")]
    pub queue_group: String,

    #[serde(default = "default_create_subject")]
    pub create_subject: String,

    #[serde(default = "default_track_subject")]
    pub track_subject: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    /// Delay before the first restart after a lost control channel.
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,

    /// Ceiling for the growing restart delay.
    #[serde(default = "default_restart_cap_ms")]
    pub restart_cap_ms: u64,

    /// Give up after this many restarts. Unset means restart forever.
    #[serde(default)]
    pub max_restarts: Option<u32>,
}

impl SupervisorConfig {
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn restart_cap(&self) -> Duration {
        Duration::from_millis(self.restart_cap_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "callpilot_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    9090
}

fn default_public_url() -> String {
    "http://127.0.0.1:9090".to_string()
}

fn default_queue_group() -> String {
    "callpilot".to_string()
}

fn default_create_subject() -> String {
    CALLS_CREATE_SUBJECT.to_string()
}

fn default_track_subject() -> String {
    CALLS_TRACK_SUBJECT.to_string()
}

fn default_restart_delay_ms() -> u64 {
    5000
}

fn default_restart_cap_ms() -> u64 {
    60_000
}

fn default_transfer_endpoint() -> String {
    "PJSIP/{destination}".to_string()
}

fn default_integrations_file() -> String {
    "integrations.json".to_string()
}

fn default_applications_file() -> String {
    "applications.json".to_string()
}

fn default_call_records_file() -> String {
    "call-records.jsonl".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            ari: AriConfig::default(),
            bus: BusConfig::default(),
            supervisor: SupervisorConfig::default(),
            transfer_endpoint: default_transfer_endpoint(),
            integrations_file: default_integrations_file(),
            applications_file: default_applications_file(),
            call_records_file: default_call_records_file(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: default_public_url(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            nats_url: None,
            queue_group: default_queue_group(),
            create_subject: default_create_subject(),
            track_subject: default_track_subject(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            restart_delay_ms: default_restart_delay_ms(),
            restart_cap_ms: default_restart_cap_ms(),
            max_restarts: None,
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
/// - `CALLPILOT_HOST`, `CALLPILOT_PORT`, `CALLPILOT_PUBLIC_URL`
/// - `CALLPILOT_ARI_URL`, `CALLPILOT_ARI_USERNAME`, `CALLPILOT_ARI_SECRET`, `CALLPILOT_ARI_APP`
/// - `CALLPILOT_NATS_URL`, `CALLPILOT_TRANSFER_ENDPOINT`
/// - `CALLPILOT_INTEGRATIONS_FILE`, `CALLPILOT_APPLICATIONS_FILE`, `CALLPILOT_CALL_RECORDS_FILE`
/// - `CALLPILOT_LOG_LEVEL`, `CALLPILOT_LOG_JSON`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies `CALLPILOT_*` overrides read through `lookup`.
pub fn apply_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(host) = lookup("CALLPILOT_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = lookup("CALLPILOT_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(url) = lookup("CALLPILOT_PUBLIC_URL") {
        config.server.public_url = url;
    }
    if let Some(url) = lookup("CALLPILOT_ARI_URL") {
        config.ari.url = url;
    }
    if let Some(username) = lookup("CALLPILOT_ARI_USERNAME") {
        config.ari.username = username;
    }
    if let Some(secret) = lookup("CALLPILOT_ARI_SECRET") {
        config.ari.secret = secret;
    }
    if let Some(app) = lookup("CALLPILOT_ARI_APP") {
        config.ari.app = app;
    }
    if let Some(url) = lookup("CALLPILOT_NATS_URL") {
        config.bus.nats_url = if url.is_empty() { None } else { Some(url) };
    }
    if let Some(endpoint) = lookup("CALLPILOT_TRANSFER_ENDPOINT") {
        config.transfer_endpoint = endpoint;
    }
    if let Some(path) = lookup("CALLPILOT_INTEGRATIONS_FILE") {
        config.integrations_file = path;
    }
    if let Some(path) = lookup("CALLPILOT_APPLICATIONS_FILE") {
        config.applications_file = path;
    }
    if let Some(path) = lookup("CALLPILOT_CALL_RECORDS_FILE") {
        config.call_records_file = path;
    }
    if let Some(level) = lookup("CALLPILOT_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("CALLPILOT_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}
