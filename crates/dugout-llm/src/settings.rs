// AI provider settings: seeded from config, editable at runtime, persisted
// in the `ai_settings` document.

use dugout_core::config::{AiProvider, Config};
use dugout_core::store::{load_collection, save_collection, Collection, DocumentStore, StoreError};
use serde::{Deserialize, Serialize};

use crate::client::AdvisoryError;

pub const OPENAI_KEY_ENV: &str = "OPENAI_API_KEY";
pub const ANTHROPIC_KEY_ENV: &str = "ANTHROPIC_API_KEY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiSettings {
    pub provider: AiProvider,
    pub ollama_url: String,
    pub preferred_model: String,
    #[serde(default)]
    pub openai_key: Option<String>,
    #[serde(default)]
    pub anthropic_key: Option<String>,
}

/// What the settings endpoint returns: keys are reported as present or
/// absent, never echoed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AiSettingsView {
    pub provider: AiProvider,
    pub ollama_url: String,
    pub preferred_model: String,
    pub openai_key_set: bool,
    pub anthropic_key_set: bool,
}

/// Partial update. An empty string clears a stored key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AiSettingsUpdate {
    pub provider: Option<AiProvider>,
    pub ollama_url: Option<String>,
    pub preferred_model: Option<String>,
    pub openai_key: Option<String>,
    pub anthropic_key: Option<String>,
}

impl AiSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            provider: config.ai.provider,
            ollama_url: config.ai.ollama_url.trim_end_matches('/').to_string(),
            preferred_model: config.ai.preferred_model.clone(),
            openai_key: config.credentials.openai_api_key.clone(),
            anthropic_key: config.credentials.anthropic_api_key.clone(),
        }
    }

    /// Settings saved over HTTP win over the config file.
    pub fn load(store: &dyn DocumentStore, config: &Config) -> Result<Self, StoreError> {
        Ok(load_collection(store, Collection::AiSettings)?
            .unwrap_or_else(|| Self::from_config(config)))
    }

    pub fn save(&self, store: &dyn DocumentStore) -> Result<(), StoreError> {
        save_collection(store, Collection::AiSettings, self)
    }

    /// Stored key, else the environment.
    pub fn resolved_openai_key(&self) -> Option<String> {
        non_empty(self.openai_key.clone()).or_else(|| non_empty(std::env::var(OPENAI_KEY_ENV).ok()))
    }

    pub fn resolved_anthropic_key(&self) -> Option<String> {
        non_empty(self.anthropic_key.clone())
            .or_else(|| non_empty(std::env::var(ANTHROPIC_KEY_ENV).ok()))
    }

    pub fn view(&self) -> AiSettingsView {
        AiSettingsView {
            provider: self.provider,
            ollama_url: self.ollama_url.clone(),
            preferred_model: self.preferred_model.clone(),
            openai_key_set: self.resolved_openai_key().is_some(),
            anthropic_key_set: self.resolved_anthropic_key().is_some(),
        }
    }

    /// Apply an update, returning the new settings. `self` is untouched when
    /// validation fails.
    pub fn updated(&self, update: AiSettingsUpdate) -> Result<Self, AdvisoryError> {
        let mut next = self.clone();
        if let Some(provider) = update.provider {
            next.provider = provider;
        }
        if let Some(url) = update.ollama_url {
            let url = url.trim().trim_end_matches('/').to_string();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(AdvisoryError::InvalidSettings {
                    field: "ollama_url".into(),
                    message: format!("must be an http(s) URL, got {url:?}"),
                });
            }
            next.ollama_url = url;
        }
        if let Some(model) = update.preferred_model {
            let model = model.trim().to_string();
            if model.is_empty() {
                return Err(AdvisoryError::InvalidSettings {
                    field: "preferred_model".into(),
                    message: "must not be empty".into(),
                });
            }
            next.preferred_model = model;
        }
        if let Some(key) = update.openai_key {
            next.openai_key = non_empty(Some(key));
        }
        if let Some(key) = update.anthropic_key {
            next.anthropic_key = non_empty(Some(key));
        }
        Ok(next)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
