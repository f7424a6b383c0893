//! Applications a call can be routed to.
//!
//! A call arrives with an application reference as its first Stasis
//! argument. The directory resolves it to the assistant that handles the
//! call and the speech product that gives the assistant a voice.

use crate::error::CatalogError;
use async_trait::async_trait;
use callpilot_types::AssistantConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Which synthesizer integration speaks for the assistant.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechSettings {
    /// Key into the integrations file.
    pub product_ref: String,
    /// Provider voice name, for providers that offer several.
    #[serde(default)]
    pub voice: Option<String>,
    /// Speaking rate multiplier.
    #[serde(default)]
    pub speed: Option<f32>,
}

/// One routable application.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    #[serde(rename = "ref")]
    pub app_ref: String,
    pub access_key_id: String,
    pub assistant: AssistantConfig,
    pub speech: SpeechSettings,
}

/// Resolves application references.
#[async_trait]
pub trait ApplicationDirectory: Send + Sync {
    async fn find(&self, app_ref: &str) -> Option<Application>;
}

/// Directory backed by a JSON array loaded once at startup.
#[derive(Debug, Default)]
pub struct FileApplicationDirectory {
    applications: HashMap<String, Application>,
}

impl FileApplicationDirectory {
    /// Reads and validates every application in `path`.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` if the file cannot be read or parsed, or if any
    /// assistant configuration is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let applications: Vec<Application> =
            serde_json::from_str(&contents).map_err(|source| CatalogError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let directory = Self::from_applications(applications)?;
        tracing::info!(
            path = %path.display(),
            count = directory.len(),
            "applications loaded"
        );
        Ok(directory)
    }

    /// # Errors
    ///
    /// Returns `CatalogError::InvalidApplication` for the first application
    /// whose assistant fails validation.
    pub fn from_applications(applications: Vec<Application>) -> Result<Self, CatalogError> {
        let mut map = HashMap::with_capacity(applications.len());
        for app in applications {
            app.assistant
                .validate()
                .map_err(|source| CatalogError::InvalidApplication {
                    app_ref: app.app_ref.clone(),
                    source,
                })?;
            if map.contains_key(&app.app_ref) {
                tracing::warn!(app_ref = %app.app_ref, "duplicate application, keeping the last one");
            }
            map.insert(app.app_ref.clone(), app);
        }
        Ok(Self { applications: map })
    }

    pub fn len(&self) -> usize {
        self.applications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
    }
}

#[async_trait]
impl ApplicationDirectory for FileApplicationDirectory {
    async fn find(&self, app_ref: &str) -> Option<Application> {
        self.applications.get(app_ref).cloned()
    }
}
