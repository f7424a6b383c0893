//! REST commands against the ARI endpoint.

use crate::config::AriConfig;
use crate::error::AriError;
use reqwest::Method;
use std::fmt;
use url::Url;

/// Issues channel and playback commands. Cheap to clone.
#[derive(Clone)]
pub struct AriClient {
    http: reqwest::Client,
    base: Url,
    username: String,
    secret: String,
}

impl fmt::Debug for AriClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AriClient")
            .field("base", &self.base.as_str())
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl AriClient {
    /// # Errors
    ///
    /// Returns `AriError::InvalidUrl` if the configured URL is unusable.
    pub fn new(http: reqwest::Client, config: &AriConfig) -> Result<Self, AriError> {
        Ok(Self {
            http,
            base: config.rest_base()?,
            username: config.username.clone(),
            secret: config.secret.clone(),
        })
    }

    async fn send(&self, method: Method, path: &str, query: &[(&str, &str)]) -> Result<(), AriError> {
        let url = self.base.join(path)?;
        let response = self
            .http
            .request(method.clone(), url)
            .basic_auth(&self.username, Some(&self.secret))
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        tracing::debug!(%method, path = %path, status = status.as_u16(), "control command rejected");
        Err(AriError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Checks credentials and liveness.
    pub async fn ping(&self) -> Result<(), AriError> {
        self.send(Method::GET, "asterisk/info", &[]).await
    }

    pub async fn answer(&self, channel_id: &str) -> Result<(), AriError> {
        self.send(Method::POST, &format!("channels/{}/answer", channel_id), &[])
            .await
    }

    /// Starts playing `media` on the channel under the caller-chosen
    /// `playback_id`.
    pub async fn play(&self, channel_id: &str, media: &str, playback_id: &str) -> Result<(), AriError> {
        self.send(
            Method::POST,
            &format!("channels/{}/play/{}", channel_id, playback_id),
            &[("media", media)],
        )
        .await
    }

    pub async fn stop_playback(&self, playback_id: &str) -> Result<(), AriError> {
        self.send(Method::DELETE, &format!("playbacks/{}", playback_id), &[])
            .await
    }

    pub async fn send_dtmf(&self, channel_id: &str, digits: &str) -> Result<(), AriError> {
        self.send(
            Method::POST,
            &format!("channels/{}/dtmf", channel_id),
            &[("dtmf", digits)],
        )
        .await
    }

    pub async fn hangup(&self, channel_id: &str) -> Result<(), AriError> {
        self.send(Method::DELETE, &format!("channels/{}", channel_id), &[])
            .await
    }

    /// Turns on talk detection so the engine emits
    /// `ChannelTalkingStarted`/`ChannelTalkingFinished`.
    pub async fn enable_talk_detection(&self, channel_id: &str) -> Result<(), AriError> {
        self.send(
            Method::POST,
            &format!("channels/{}/variable", channel_id),
            &[("variable", "TALK_DETECT(set)"), ("value", "")],
        )
        .await
    }

    /// Moves the channel out of the application to `endpoint`.
    pub async fn redirect(&self, channel_id: &str, endpoint: &str) -> Result<(), AriError> {
        self.send(
            Method::POST,
            &format!("channels/{}/redirect", channel_id),
            &[("endpoint", endpoint)],
        )
        .await
    }
}
