use crate::error::VoiceError;
use async_trait::async_trait;
use std::time::Duration;

/// Commands a session issues to the telephony engine for its own channel.
#[async_trait]
pub trait CallControl: Send + Sync {
    async fn answer(&self, channel_id: &str) -> Result<(), VoiceError>;

    /// Asks the engine to report when the caller starts and stops talking.
    async fn enable_talk_detection(&self, _channel_id: &str) -> Result<(), VoiceError> {
        Ok(())
    }

    /// Starts playback of `media` on the channel under `playback_id`.
    async fn play(&self, channel_id: &str, media: &str, playback_id: &str)
        -> Result<(), VoiceError>;

    async fn stop_playback(&self, playback_id: &str) -> Result<(), VoiceError>;

    async fn send_dtmf(&self, channel_id: &str, digits: &str) -> Result<(), VoiceError>;

    /// Moves the caller to `destination`, failing if the engine does not
    /// complete the transfer within `timeout`.
    async fn transfer(
        &self,
        channel_id: &str,
        destination: &str,
        timeout: Duration,
    ) -> Result<(), VoiceError>;

    async fn hangup(&self, channel_id: &str) -> Result<(), VoiceError>;
}
