//! Error types for the event publisher.

use callpilot_types::ValidationError;

/// Errors that can occur while publishing lifecycle events.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The bus connection could not be established.
    #[error("bus connect error: {0}")]
    Connect(String),

    /// The bus rejected a publish or subscribe request.
    #[error("bus error: {0}")]
    Bus(String),

    /// JSON serialization or deserialization failed.
    #[error("publish serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The events hook failed validation and was not called.
    #[error("invalid events hook: {0}")]
    InvalidHook(#[from] ValidationError),

    /// Webhook delivery failed.
    #[error("webhook delivery failed: {0}")]
    Webhook(#[from] reqwest::Error),
}
