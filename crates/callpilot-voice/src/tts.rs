use crate::error::VoiceError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Maximum text input size for TTS (64 KiB). Prevents resource exhaustion from
/// oversized synthesis requests.
const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

/// Timeout for a single synthesis.
const TTS_TIMEOUT: Duration = Duration::from_secs(60);

/// Sample rate every synthesizer must produce.
pub const OUTPUT_SAMPLE_RATE: u32 = 16_000;

/// Text-to-speech provider.
///
/// Implementations return raw PCM (s16le, 16 kHz, mono), the format served
/// to the telephony engine.
#[async_trait]
pub trait Synthesizer: Send + Sync + std::fmt::Debug {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError>;

    /// Short provider label for logs.
    fn name(&self) -> &'static str;
}

fn check_input(text: &str) -> Result<(), VoiceError> {
    if text.trim().is_empty() {
        return Err(VoiceError::Tts("text is empty".to_string()));
    }
    if text.len() > MAX_TTS_INPUT_BYTES {
        return Err(VoiceError::Tts(format!(
            "text exceeds maximum size: {} bytes (limit: {} bytes)",
            text.len(),
            MAX_TTS_INPUT_BYTES
        )));
    }
    Ok(())
}

/// Local synthesis through the Piper binary.
#[derive(Debug, Clone)]
pub struct PiperSynthesizer {
    binary: PathBuf,
    model_path: PathBuf,
    config_path: Option<PathBuf>,
    speaker_id: Option<u32>,
    speed: f32,
}

impl PiperSynthesizer {
    /// Creates a synthesizer for `model_path`, which must be a 16 kHz voice.
    ///
    /// # Errors
    ///
    /// Returns `VoiceError::Config` if `speed` is outside 0.1..=10.0.
    pub fn new(
        binary: impl AsRef<Path>,
        model_path: impl AsRef<Path>,
        speed: f32,
    ) -> Result<Self, VoiceError> {
        if !(0.1..=10.0).contains(&speed) {
            return Err(VoiceError::Config(
                "Speed must be between 0.1 and 10.0".to_string(),
            ));
        }
        Ok(Self {
            binary: binary.as_ref().to_path_buf(),
            model_path: model_path.as_ref().to_path_buf(),
            config_path: None,
            speaker_id: None,
            speed,
        })
    }

    pub fn with_config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_speaker(mut self, speaker_id: u32) -> Self {
        self.speaker_id = Some(speaker_id);
        self
    }
}

#[async_trait]
impl Synthesizer for PiperSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
        check_input(text)?;

        if !self.model_path.exists() {
            return Err(VoiceError::Tts(format!(
                "Model file not found: {:?}",
                self.model_path
            )));
        }

        let mut command = Command::new(&self.binary);
        command
            .arg("--model")
            .arg(&self.model_path)
            .arg("--output_raw")
            // Length scale is the inverse of speed.
            .arg("--length_scale")
            .arg((1.0 / self.speed).to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(config) = &self.config_path {
            command.arg("--config").arg(config);
        }

        if let Some(speaker) = self.speaker_id {
            command.arg("--speaker").arg(speaker.to_string());
        }

        let mut child = command
            .spawn()
            .map_err(|e| VoiceError::Tts(format!("Failed to spawn piper: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VoiceError::Tts("Failed to open stdin".to_string()))?;
        let text_owned = text.to_string();

        // Write from a separate task so a full stdout pipe cannot deadlock us.
        let write_task = tokio::spawn(async move { stdin.write_all(text_owned.as_bytes()).await });

        let output = tokio::time::timeout(TTS_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| {
                VoiceError::Tts(format!(
                    "TTS process timed out after {} seconds",
                    TTS_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| VoiceError::Tts(format!("Failed to wait for piper: {}", e)))?;

        match write_task.await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(VoiceError::Tts(format!(
                    "Failed to write to piper stdin: {}",
                    e
                )))
            }
            Err(e) => return Err(VoiceError::Tts(format!("Stdin task failed: {}", e))),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Tts(format!("Piper failed: {}", stderr)));
        }

        Ok(output.stdout)
    }

    fn name(&self) -> &'static str {
        "piper"
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HttpSynthesisRequest<'a> {
    text: &'a str,
    voice: &'a str,
    sample_rate: u32,
    format: &'static str,
}

/// Remote synthesis through an HTTP endpoint that accepts
/// `{text, voice, sampleRate, format}` and answers with raw PCM.
#[derive(Debug, Clone)]
pub struct HttpSynthesizer {
    client: reqwest::Client,
    url: String,
    voice: String,
    headers: HashMap<String, String>,
}

impl HttpSynthesizer {
    pub fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        voice: impl Into<String>,
        headers: HashMap<String, String>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            voice: voice.into(),
            headers,
        }
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
        check_input(text)?;

        let mut request = self
            .client
            .post(&self.url)
            .timeout(TTS_TIMEOUT)
            .json(&HttpSynthesisRequest {
                text,
                voice: &self.voice,
                sample_rate: OUTPUT_SAMPLE_RATE,
                format: "pcm_s16le",
            });
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(VoiceError::Tts(format!(
                "synthesis endpoint returned {}",
                response.status()
            )));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
