use callpilot_ari::AriError;
use callpilot_llm::ModelError;
use callpilot_observe::PublishError;
use callpilot_types::ValidationError;
use callpilot_voice::VoiceError;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to load the applications or integrations file.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid application {app_ref}: {source}")]
    InvalidApplication {
        app_ref: String,
        #[source]
        source: ValidationError,
    },
}

/// Why a call could not be turned into a session.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("call on channel {channel_id} carries no application reference")]
    MissingAppRef { channel_id: String },

    #[error("unknown application: {0}")]
    UnknownApplication(String),

    #[error("no usable integration for product {0}")]
    MissingIntegration(String),

    #[error("invalid assistant configuration: {0}")]
    InvalidAssistant(#[from] ValidationError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Voice(#[from] VoiceError),
}

/// Conditions that stop the supervised control-channel loop.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("telephony engine unavailable at startup: {0}")]
    Startup(#[from] AriError),

    #[error("event bus unavailable at startup: {0}")]
    Bus(#[from] PublishError),

    #[error("gave up after {restarts} control channel restarts")]
    RestartsExhausted { restarts: u32 },
}
