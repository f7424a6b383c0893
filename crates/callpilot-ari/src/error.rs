//! Error types for the control channel.

use std::time::Duration;

/// Errors raised while talking to the telephony engine.
#[derive(Debug, thiserror::Error)]
pub enum AriError {
    /// The engine never accepted a TCP connection within the wait window.
    #[error("telephony engine at {target} unreachable after {waited:?}")]
    Unreachable { target: String, waited: Duration },

    /// The event websocket could not be opened.
    #[error("control channel connect failed: {0}")]
    Connect(String),

    /// The configured endpoint is not a usable URL.
    #[error("invalid control channel URL: {0}")]
    InvalidUrl(String),

    /// A REST command could not be sent.
    #[error("control command failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The engine rejected a REST command.
    #[error("control command rejected ({status}): {message}")]
    Api { status: u16, message: String },
}

impl AriError {
    /// The addressed channel or playback no longer exists.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }
}

impl From<url::ParseError> for AriError {
    fn from(e: url::ParseError) -> Self {
        Self::InvalidUrl(e.to_string())
    }
}
