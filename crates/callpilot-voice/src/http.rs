//! `GET /sounds/{id}` handler serving registered audio streams.

use crate::registry::AudioStreamRegistry;
use axum::{
    body::Body,
    extract::{Extension, Path},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::{stream, StreamExt};

/// Raw signed linear PCM, 16-bit, 16 kHz, mono.
pub const CONTENT_TYPE: &str = "audio/L16;rate=16000;channels=1";

/// Builds the router exposing the registry under `/sounds`.
pub fn sounds_router(registry: AudioStreamRegistry) -> Router {
    Router::new()
        .route("/sounds/{id}", get(get_sound_handler))
        .layer(Extension(registry))
}

/// Errors surfaced to the engine fetching a sound.
#[derive(Debug)]
pub enum SoundsError {
    NotFound(String),
    Read,
}

impl IntoResponse for SoundsError {
    fn into_response(self) -> Response {
        match self {
            SoundsError::NotFound(id) => (
                StatusCode::NOT_FOUND,
                format!("Stream not found for id: {}", id),
            )
                .into_response(),
            SoundsError::Read => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Error reading stream").into_response()
            }
        }
    }
}

/// Handler for `GET /sounds/{id}`.
///
/// The extension (`.sln16`, `.wav`, ...) is ignored for the lookup. A source
/// that fails before producing any bytes yields a 500; a failure after that
/// aborts the body because the status line is already on the wire.
pub async fn get_sound_handler(
    Extension(registry): Extension<AudioStreamRegistry>,
    Path(id): Path<String>,
) -> Result<Response, SoundsError> {
    let stream_id = id.split('.').next().unwrap_or_default();

    let Some(mut source) = registry.take_stream(stream_id) else {
        return Err(SoundsError::NotFound(id));
    };

    let first = source.next().await;
    if let Some(Err(e)) = &first {
        tracing::error!(stream_id, "error reading audio stream: {}", e);
        return Err(SoundsError::Read);
    }

    let stream_id = stream_id.to_string();
    let body = stream::iter(first).chain(source).map(move |chunk| {
        if let Err(e) = &chunk {
            tracing::error!(stream_id = %stream_id, "audio stream failed mid-transfer: {}", e);
        }
        chunk
    });

    Ok(([(header::CONTENT_TYPE, CONTENT_TYPE)], Body::from_stream(body)).into_response())
}
