//! Call control over ARI.

use async_trait::async_trait;
use callpilot_ari::{AriClient, AriError};
use callpilot_voice::{CallControl, VoiceError};
use std::time::Duration;

/// Placeholder in the transfer endpoint template replaced by the number.
pub const DESTINATION_PLACEHOLDER: &str = "{destination}";

/// [`CallControl`] implemented with ARI REST commands.
#[derive(Debug, Clone)]
pub struct AriCallControl {
    client: AriClient,
    transfer_endpoint: String,
}

impl AriCallControl {
    /// `transfer_endpoint` is a dial string such as `PJSIP/{destination}@trunk`.
    pub fn new(client: AriClient, transfer_endpoint: impl Into<String>) -> Self {
        Self {
            client,
            transfer_endpoint: transfer_endpoint.into(),
        }
    }

    /// Dial string for `destination`.
    pub fn endpoint_for(&self, destination: &str) -> String {
        if destination.contains('/') {
            return destination.to_string();
        }
        self.transfer_endpoint
            .replace(DESTINATION_PLACEHOLDER, destination)
    }
}

fn control_error(e: AriError) -> VoiceError {
    VoiceError::Control(e.to_string())
}

#[async_trait]
impl CallControl for AriCallControl {
    async fn answer(&self, channel_id: &str) -> Result<(), VoiceError> {
        self.client.answer(channel_id).await.map_err(control_error)
    }

    async fn enable_talk_detection(&self, channel_id: &str) -> Result<(), VoiceError> {
        self.client
            .enable_talk_detection(channel_id)
            .await
            .map_err(control_error)
    }

    async fn play(&self, channel_id: &str, media: &str, playback_id: &str) -> Result<(), VoiceError> {
        self.client
            .play(channel_id, media, playback_id)
            .await
            .map_err(control_error)
    }

    async fn stop_playback(&self, playback_id: &str) -> Result<(), VoiceError> {
        match self.client.stop_playback(playback_id).await {
            // Already finished.
            Err(e) if e.is_not_found() => Ok(()),
            other => other.map_err(control_error),
        }
    }

    async fn send_dtmf(&self, channel_id: &str, digits: &str) -> Result<(), VoiceError> {
        self.client
            .send_dtmf(channel_id, digits)
            .await
            .map_err(control_error)
    }

    async fn transfer(
        &self,
        channel_id: &str,
        destination: &str,
        timeout: Duration,
    ) -> Result<(), VoiceError> {
        let endpoint = self.endpoint_for(destination);
        tracing::info!(channel_id = %channel_id, endpoint = %endpoint, "transferring call");
        match tokio::time::timeout(timeout, self.client.redirect(channel_id, &endpoint)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(VoiceError::Transfer {
                destination: destination.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(VoiceError::Transfer {
                destination: destination.to_string(),
                reason: format!("no answer within {:?}", timeout),
            }),
        }
    }

    async fn hangup(&self, channel_id: &str) -> Result<(), VoiceError> {
        match self.client.hangup(channel_id).await {
            // The caller hung up first.
            Err(e) if e.is_not_found() => Ok(()),
            other => other.map_err(control_error),
        }
    }
}
