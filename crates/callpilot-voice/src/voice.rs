//! Per-session voice handle.
//!
//! A `Voice` ties a synthesizer, the audio stream registry, and the call
//! control port to one channel. Speaking synthesizes the text, registers the
//! audio under a fresh stream id, and asks the engine to play
//! `sound:{base}/sounds/{id}.sln16`; the engine fetches it over HTTP.

use crate::control::CallControl;
use crate::error::VoiceError;
use crate::registry::AudioStreamRegistry;
use crate::tts::{Synthesizer, OUTPUT_SAMPLE_RATE};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Bytes of PCM per second of audio (16-bit mono).
const BYTES_PER_SECOND: u64 = OUTPUT_SAMPLE_RATE as u64 * 2;

/// Playback length of `bytes` of 16 kHz s16le mono audio.
pub fn playback_duration(bytes: usize) -> Duration {
    Duration::from_millis(bytes as u64 * 1000 / BYTES_PER_SECOND)
}

/// An utterance currently playing on the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playback {
    /// Both the registry stream id and the engine playback id.
    pub id: String,
    pub bytes: usize,
}

impl Playback {
    pub fn duration(&self) -> Duration {
        playback_duration(self.bytes)
    }
}

pub struct Voice {
    session_ref: String,
    channel_id: String,
    synthesizer: Arc<dyn Synthesizer>,
    control: Arc<dyn CallControl>,
    registry: AudioStreamRegistry,
    sounds_base_url: String,
    active: Option<Playback>,
}

impl Voice {
    pub fn new(
        session_ref: impl Into<String>,
        channel_id: impl Into<String>,
        synthesizer: Arc<dyn Synthesizer>,
        control: Arc<dyn CallControl>,
        registry: AudioStreamRegistry,
        sounds_base_url: impl Into<String>,
    ) -> Self {
        Self {
            session_ref: session_ref.into(),
            channel_id: channel_id.into(),
            synthesizer,
            control,
            registry,
            sounds_base_url: sounds_base_url.into().trim_end_matches('/').to_string(),
            active: None,
        }
    }

    pub fn session_ref(&self) -> &str {
        &self.session_ref
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn active_playback(&self) -> Option<&Playback> {
        self.active.as_ref()
    }

    pub fn is_playing(&self) -> bool {
        self.active.is_some()
    }

    /// Synthesizes `text` and starts playing it, cutting off any playback
    /// still in progress.
    ///
    /// # Errors
    ///
    /// Returns the synthesizer or call-control error. Nothing is left in the
    /// registry on failure.
    pub async fn say(&mut self, text: &str) -> Result<Playback, VoiceError> {
        if self.active.is_some() {
            self.stop_speech().await?;
        }

        let audio = self.synthesizer.synthesize(text).await?;
        let playback = Playback {
            id: Uuid::new_v4().to_string(),
            bytes: audio.len(),
        };

        self.registry
            .add_bytes(playback.id.clone(), self.session_ref.clone(), audio);

        let media = format!("sound:{}/sounds/{}.sln16", self.sounds_base_url, playback.id);
        if let Err(e) = self
            .control
            .play(&self.channel_id, &media, &playback.id)
            .await
        {
            self.registry.remove_stream(&playback.id);
            return Err(e);
        }

        tracing::debug!(
            session_ref = %self.session_ref,
            playback_id = %playback.id,
            provider = self.synthesizer.name(),
            bytes = playback.bytes,
            "playback started"
        );
        self.active = Some(playback.clone());
        Ok(playback)
    }

    /// Cancels the active playback and discards its unread audio.
    ///
    /// Returns whether anything was playing.
    pub async fn stop_speech(&mut self) -> Result<bool, VoiceError> {
        let Some(playback) = self.active.take() else {
            return Ok(false);
        };
        self.registry.remove_stream(&playback.id);
        self.control.stop_playback(&playback.id).await?;
        tracing::debug!(
            session_ref = %self.session_ref,
            playback_id = %playback.id,
            "playback cancelled"
        );
        Ok(true)
    }

    /// Records that the engine finished `playback_id`.
    ///
    /// Returns `true` if it was the active playback.
    pub fn playback_finished(&mut self, playback_id: &str) -> bool {
        match &self.active {
            Some(active) if active.id == playback_id => {
                self.registry.remove_stream(playback_id);
                self.active = None;
                true
            }
            _ => false,
        }
    }

    pub async fn send_dtmf(&self, digits: &str) -> Result<(), VoiceError> {
        self.control.send_dtmf(&self.channel_id, digits).await
    }

    pub async fn transfer(&self, destination: &str, timeout: Duration) -> Result<(), VoiceError> {
        self.control
            .transfer(&self.channel_id, destination, timeout)
            .await
    }

    pub async fn hangup(&self) -> Result<(), VoiceError> {
        self.control.hangup(&self.channel_id).await
    }

    /// Drops every registry entry this session still owns.
    pub fn release(&mut self) -> usize {
        self.active = None;
        self.registry.remove_owned_by(&self.session_ref)
    }
}

impl std::fmt::Debug for Voice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Voice")
            .field("session_ref", &self.session_ref)
            .field("channel_id", &self.channel_id)
            .field("synthesizer", &self.synthesizer.name())
            .field("active", &self.active)
            .finish()
    }
}
