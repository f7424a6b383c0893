//! Control channel endpoint, credentials, and retry limits.

use crate::error::AriError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use url::Url;

fn default_url() -> String {
    "http://127.0.0.1:8088".to_string()
}

fn default_username() -> String {
    "callpilot".to_string()
}

fn default_app() -> String {
    "callpilot".to_string()
}

fn default_reachability_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    10
}

fn default_retry_base_ms() -> u64 {
    500
}

fn default_retry_cap_ms() -> u64 {
    30_000
}

/// Settings for the ARI REST and event websocket endpoints.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AriConfig {
    /// HTTP base of the engine, e.g. `http://asterisk:8088`.
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default, skip_serializing)]
    pub secret: String,

    /// Stasis application name calls are routed to.
    #[serde(default = "default_app")]
    pub app: String,

    /// How long startup waits for the engine to accept connections.
    #[serde(default = "default_reachability_timeout_ms")]
    pub reachability_timeout_ms: u64,

    /// Websocket reconnect attempts before `MaxRetriesExceeded`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    #[serde(default = "default_retry_cap_ms")]
    pub retry_cap_ms: u64,
}

impl Default for AriConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            username: default_username(),
            secret: String::new(),
            app: default_app(),
            reachability_timeout_ms: default_reachability_timeout_ms(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            retry_cap_ms: default_retry_cap_ms(),
        }
    }
}

impl fmt::Debug for AriConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AriConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("secret", &"[REDACTED]")
            .field("app", &self.app)
            .field("reachability_timeout_ms", &self.reachability_timeout_ms)
            .field("max_retries", &self.max_retries)
            .field("retry_base_ms", &self.retry_base_ms)
            .field("retry_cap_ms", &self.retry_cap_ms)
            .finish()
    }
}

impl AriConfig {
    pub fn reachability_timeout(&self) -> Duration {
        Duration::from_millis(self.reachability_timeout_ms)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    pub fn retry_cap(&self) -> Duration {
        Duration::from_millis(self.retry_cap_ms)
    }

    /// REST root, always ending in `/ari/`.
    ///
    /// # Errors
    ///
    /// Returns `AriError::InvalidUrl` if `url` does not parse or is not http(s).
    pub fn rest_base(&self) -> Result<Url, AriError> {
        let mut base = self.url.trim_end_matches('/').to_string();
        base.push('/');
        let url = Url::parse(&base)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AriError::InvalidUrl(format!(
                "unsupported scheme {}",
                url.scheme()
            )));
        }
        Ok(url.join("ari/")?)
    }

    /// Websocket URL of the event stream for this application.
    ///
    /// # Errors
    ///
    /// Returns `AriError::InvalidUrl` under the same conditions as
    /// [`AriConfig::rest_base`].
    pub fn events_url(&self) -> Result<Url, AriError> {
        let mut url = self.rest_base()?.join("events")?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| AriError::InvalidUrl(format!("cannot use {} scheme", scheme)))?;
        url.query_pairs_mut()
            .append_pair("app", &self.app)
            .append_pair("api_key", &format!("{}:{}", self.username, self.secret))
            .append_pair("subscribeAll", "false");
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rest_base_gains_ari_prefix() {
        let config = AriConfig {
            url: "http://pbx.local:8088/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.rest_base().unwrap().as_str(),
            "http://pbx.local:8088/ari/"
        );
    }

    #[test]
    fn events_url_switches_scheme_and_carries_credentials() {
        let config = AriConfig {
            url: "https://pbx.local:8089".to_string(),
            username: "bot".to_string(),
            secret: "s3cret".to_string(),
            app: "ivr".to_string(),
            ..Default::default()
        };
        let url = config.events_url().unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/ari/events");
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(query.contains(&("app".to_string(), "ivr".to_string())));
        assert!(query.contains(&("api_key".to_string(), "bot:s3cret".to_string())));
    }

    #[test]
    fn debug_redacts_secret() {
        let config = AriConfig {
            secret: "hunter2".to_string(),
            ..Default::default()
        };
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn rejects_non_http_url() {
        let config = AriConfig {
            url: "ftp://pbx".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.rest_base(), Err(AriError::InvalidUrl(_))));
    }
}
