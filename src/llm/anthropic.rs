//! Anthropic reply suggestions via rig-core.

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::anthropic;
use secrecy::ExposeSecret;
use tracing::{debug, info};

use super::{ReplySuggester, build_prompt, clean_suggestions};
use crate::config::SuggestConfig;
use crate::error::LlmError;

const PROVIDER: &str = "anthropic";

type AnthropicClient = rig::client::Client<anthropic::client::AnthropicExt>;

/// Suggests replies with an Anthropic model.
pub struct AnthropicSuggester {
    client: AnthropicClient,
    model: String,
    max_tokens: u64,
}

impl AnthropicSuggester {
    pub fn new(config: &SuggestConfig) -> Result<Self, LlmError> {
        let client: AnthropicClient =
            anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
                LlmError::RequestFailed {
                    provider: PROVIDER.to_string(),
                    reason: format!("Failed to create Anthropic client: {}", e),
                }
            })?;

        info!("Using Anthropic for suggestions (model: {})", config.model);
        Ok(Self {
            client,
            model: config.model.clone(),
            max_tokens: u64::from(config.max_tokens),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ReplySuggester for AnthropicSuggester {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn suggest(&self, body: &str, context: Option<&str>) -> Result<Vec<String>, LlmError> {
        let agent = self
            .client
            .agent(self.model.as_str())
            .max_tokens(self.max_tokens)
            .build();

        let text = agent
            .prompt(build_prompt(body, context))
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        let suggestions = clean_suggestions(&text);
        debug!(count = suggestions.len(), "Parsed reply suggestions");
        Ok(suggestions)
    }
}
