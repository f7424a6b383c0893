//! Callpilot server library.
//!
//! Wires the control channel, the voice dispatcher, and the sounds HTTP
//! surface into one process. The binary in `main.rs` loads configuration,
//! starts [`app`] and runs the [`Supervisor`] until shutdown.

pub mod capabilities;
pub mod config;
pub mod control;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod integrations;
pub mod supervisor;
pub mod tracker;

pub use capabilities::{CapabilityFactory, DirectoryCapabilities, SessionCapabilities};
pub use config::{load_config, Config, ConfigError};
pub use control::AriCallControl;
pub use directory::{Application, ApplicationDirectory, FileApplicationDirectory, SpeechSettings};
pub use dispatcher::{BusSubjects, CallArrival, VoiceDispatcher};
pub use error::{CatalogError, DispatchError, SupervisorError};
pub use integrations::{Integration, Integrations};
pub use supervisor::{GenerationExit, Supervisor};
pub use tracker::{spawn_tracker, CallRecordStore, JsonLinesStore, TrackerHandle};

use axum::{routing::get, Json, Router};
use callpilot_voice::{sounds_router, AudioStreamRegistry};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the HTTP router: `/health` plus the `/sounds` audio surface.
pub fn app(registry: AudioStreamRegistry) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(sounds_router(registry))
        .layer(TraceLayer::new_for_http())
}
