//! Voice infrastructure for callpilot.
//!
//! Provides the audio stream registry and the `/sounds` HTTP surface the
//! telephony engine pulls synthesized audio from, the pluggable
//! text-to-speech providers, and the per-session [`Voice`] handle that joins
//! them to a channel through the [`CallControl`] port.
//!
//! Speech recognition happens in the external media path; transcripts reach
//! the session as control-channel events, so this crate only speaks.

pub mod control;
pub mod error;
pub mod http;
pub mod registry;
pub mod tts;
pub mod voice;

pub use control::CallControl;
pub use error::VoiceError;
pub use http::{sounds_router, SoundsError, CONTENT_TYPE};
pub use registry::{AudioStreamRegistry, ByteSource};
pub use tts::{HttpSynthesizer, PiperSynthesizer, Synthesizer, OUTPUT_SAMPLE_RATE};
pub use voice::{playback_duration, Playback, Voice};
