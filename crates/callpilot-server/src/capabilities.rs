//! Per-call capability assembly.

use crate::directory::ApplicationDirectory;
use crate::dispatcher::CallArrival;
use crate::error::DispatchError;
use crate::integrations::Integrations;
use async_trait::async_trait;
use callpilot_llm::{create_language_model, LanguageModel};
use callpilot_types::AssistantConfig;
use callpilot_voice::Synthesizer;
use std::sync::Arc;

/// Everything a session needs beyond the shared call-control port.
pub struct SessionCapabilities {
    pub assistant: AssistantConfig,
    pub model: Arc<dyn LanguageModel>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl std::fmt::Debug for SessionCapabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCapabilities")
            .field("provider", &self.assistant.language_model.provider)
            .field("synthesizer", &self.synthesizer.name())
            .finish_non_exhaustive()
    }
}

/// Builds the capability set for an arriving call.
#[async_trait]
pub trait CapabilityFactory: Send + Sync {
    async fn build(&self, arrival: &CallArrival) -> Result<SessionCapabilities, DispatchError>;
}

/// Resolves the call's application in the directory and wires its assistant
/// to the configured integrations.
pub struct DirectoryCapabilities {
    directory: Arc<dyn ApplicationDirectory>,
    integrations: Arc<Integrations>,
    http: reqwest::Client,
}

impl DirectoryCapabilities {
    pub fn new(
        directory: Arc<dyn ApplicationDirectory>,
        integrations: Arc<Integrations>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            directory,
            integrations,
            http,
        }
    }
}

#[async_trait]
impl CapabilityFactory for DirectoryCapabilities {
    async fn build(&self, arrival: &CallArrival) -> Result<SessionCapabilities, DispatchError> {
        let app_ref = arrival
            .app_ref
            .as_deref()
            .ok_or_else(|| DispatchError::MissingAppRef {
                channel_id: arrival.channel_id.clone(),
            })?;
        let app = self
            .directory
            .find(app_ref)
            .await
            .ok_or_else(|| DispatchError::UnknownApplication(app_ref.to_string()))?;

        let mut assistant = app.assistant;
        let settings = &mut assistant.language_model;
        if settings.api_key.is_none() {
            settings.api_key = self
                .integrations
                .language_model_key(settings.provider)
                .map(str::to_string);
        }
        assistant.validate()?;

        let synthesizer = self.integrations.synthesizer(&app.speech, &self.http)?;
        let model = create_language_model(
            self.http.clone(),
            &assistant.language_model,
            &assistant.conversation_settings,
        )
        .await?;

        tracing::debug!(
            session_ref = %arrival.session_ref,
            app_ref = %app_ref,
            provider = %assistant.language_model.provider,
            synthesizer = synthesizer.name(),
            "session capabilities assembled"
        );

        Ok(SessionCapabilities {
            assistant,
            model: Arc::new(model),
            synthesizer,
        })
    }
}
