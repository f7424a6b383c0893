//! Third-party product credentials, keyed by product reference.

use crate::directory::SpeechSettings;
use crate::error::{CatalogError, DispatchError};
use callpilot_types::LanguageModelProvider;
use callpilot_voice::{HttpSynthesizer, PiperSynthesizer, Synthesizer};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn default_speed() -> f32 {
    1.0
}

/// Credentials for a local Piper installation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PiperCredentials {
    pub binary: PathBuf,
    pub model_path: PathBuf,
    #[serde(default)]
    pub config_path: Option<PathBuf>,
    #[serde(default)]
    pub speaker_id: Option<u32>,
}

/// Credentials for a remote synthesis endpoint.
#[derive(Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpTtsCredentials {
    pub url: String,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl fmt::Debug for HttpTtsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTtsCredentials")
            .field("url", &self.url)
            .field("voice", &self.voice)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyCredentials {
    pub api_key: String,
}

impl fmt::Debug for ApiKeyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyCredentials")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// A decoded integration.
#[derive(Debug, Clone, PartialEq)]
pub enum Integration {
    Piper(PiperCredentials),
    HttpTts(HttpTtsCredentials),
    LanguageModel {
        provider: LanguageModelProvider,
        credentials: ApiKeyCredentials,
    },
}

impl Integration {
    /// The `type` string this integration was declared with.
    pub fn kind(&self) -> String {
        match self {
            Self::Piper(_) => "tts.piper".to_string(),
            Self::HttpTts(_) => "tts.http".to_string(),
            Self::LanguageModel { provider, .. } => format!("llm.{}", provider),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntegrationRecord {
    product_ref: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    credentials: Value,
}

impl IntegrationRecord {
    fn decode(self) -> Result<(String, Integration), String> {
        let integration = match self.kind.as_str() {
            "tts.piper" => Integration::Piper(
                serde_json::from_value(self.credentials).map_err(|e| e.to_string())?,
            ),
            "tts.http" => Integration::HttpTts(
                serde_json::from_value(self.credentials).map_err(|e| e.to_string())?,
            ),
            other => {
                let provider = other
                    .strip_prefix("llm.")
                    .ok_or_else(|| format!("unsupported integration type {}", other))?
                    .parse::<LanguageModelProvider>()
                    .map_err(|e| e.to_string())?;
                Integration::LanguageModel {
                    provider,
                    credentials: serde_json::from_value(self.credentials)
                        .map_err(|e| e.to_string())?,
                }
            }
        };
        Ok((self.product_ref, integration))
    }
}

/// All integrations known to the process.
#[derive(Debug, Default)]
pub struct Integrations {
    by_product: HashMap<String, Integration>,
}

impl Integrations {
    /// Reads the integrations file. Records that cannot be decoded are
    /// logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` if the file cannot be read or is not a JSON
    /// array of integration records.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let integrations = Self::parse(&contents).map_err(|source| CatalogError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(
            path = %path.display(),
            count = integrations.by_product.len(),
            "integrations loaded"
        );
        Ok(integrations)
    }

    /// # Errors
    ///
    /// Returns the JSON error if `contents` is not an array of records.
    pub fn parse(contents: &str) -> Result<Self, serde_json::Error> {
        let records: Vec<IntegrationRecord> = serde_json::from_str(contents)?;
        let mut by_product = HashMap::with_capacity(records.len());
        for record in records {
            let product_ref = record.product_ref.clone();
            match record.decode() {
                Ok((product_ref, integration)) => {
                    by_product.insert(product_ref, integration);
                }
                Err(e) => {
                    tracing::warn!(product_ref = %product_ref, "skipping integration: {}", e)
                }
            }
        }
        Ok(Self { by_product })
    }

    pub fn get(&self, product_ref: &str) -> Option<&Integration> {
        self.by_product.get(product_ref)
    }

    /// API key from the first `llm.<provider>` integration.
    pub fn language_model_key(&self, provider: LanguageModelProvider) -> Option<&str> {
        self.by_product.values().find_map(|integration| match integration {
            Integration::LanguageModel {
                provider: p,
                credentials,
            } if *p == provider => Some(credentials.api_key.as_str()),
            _ => None,
        })
    }

    /// Builds the synthesizer `speech` asks for.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::MissingIntegration` if the product is unknown
    /// or is not a speech product, and `DispatchError::Voice` if its
    /// settings are rejected.
    pub fn synthesizer(
        &self,
        speech: &SpeechSettings,
        http: &reqwest::Client,
    ) -> Result<Arc<dyn Synthesizer>, DispatchError> {
        let speed = speech.speed.unwrap_or_else(default_speed);
        match self.get(&speech.product_ref) {
            Some(Integration::Piper(creds)) => {
                let mut synth = PiperSynthesizer::new(&creds.binary, &creds.model_path, speed)?;
                if let Some(config_path) = &creds.config_path {
                    synth = synth.with_config_path(config_path);
                }
                if let Some(speaker) = creds.speaker_id {
                    synth = synth.with_speaker(speaker);
                }
                Ok(Arc::new(synth))
            }
            Some(Integration::HttpTts(creds)) => {
                let voice = speech
                    .voice
                    .clone()
                    .or_else(|| creds.voice.clone())
                    .unwrap_or_default();
                Ok(Arc::new(HttpSynthesizer::new(
                    http.clone(),
                    creds.url.clone(),
                    voice,
                    creds.headers.clone(),
                )))
            }
            _ => Err(DispatchError::MissingIntegration(speech.product_ref.clone())),
        }
    }
}
