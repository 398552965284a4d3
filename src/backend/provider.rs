//! Adapter from [`edgequake_llm::LLMProvider`] to [`ModelBackend`].
//!
//! `edgequake-llm` providers carry their API key inside the client, so key
//! rotation is expressed as routing: each pooled credential maps to a
//! provider built with that key. Credentials without a route fall back to the
//! default provider, if one is set.

use super::{ModelBackend, ModelRequest};
use crate::error::BackendError;
use crate::keys::Credential;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Routes each credential to a pre-built provider.
#[derive(Clone, Default)]
pub struct ProviderBackend {
    routes: HashMap<String, Arc<dyn LLMProvider>>,
    fallback: Option<Arc<dyn LLMProvider>>,
}

impl ProviderBackend {
    /// One provider for every credential.
    pub fn single(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            routes: HashMap::new(),
            fallback: Some(provider),
        }
    }

    /// Create a provider by name (`"openai"`, `"gemini"`, `"ollama"` …)
    /// from the environment and use it for every credential.
    pub fn from_name(provider: &str, model: &str) -> Result<Self, BackendError> {
        let built = ProviderFactory::create_llm_provider(provider, model)
            .map_err(|e| BackendError::new(format!("provider '{provider}': {e}")))?;
        Ok(Self::single(built))
    }

    /// Send calls made with `credential` to `provider`.
    pub fn with_route(mut self, credential: &Credential, provider: Arc<dyn LLMProvider>) -> Self {
        self.routes.insert(credential.secret().to_string(), provider);
        self
    }

    fn provider_for(&self, credential: &Credential) -> Option<&Arc<dyn LLMProvider>> {
        self.routes
            .get(credential.secret())
            .or(self.fallback.as_ref())
    }
}

impl std::fmt::Debug for ProviderBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderBackend")
            .field("routes", &self.routes.len())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

fn build_messages(request: &ModelRequest) -> Vec<ChatMessage> {
    match request.image {
        Some(ref image) => vec![ChatMessage::user_with_images(
            &request.prompt,
            vec![ImageData::new(image.data.clone(), image.mime_type.clone()).with_detail("high")],
        )],
        None => vec![ChatMessage::user(&request.prompt)],
    }
}

fn build_options(request: &ModelRequest) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(request.sampling.temperature),
        max_tokens: Some(request.max_output_tokens),
        ..Default::default()
    }
}

#[async_trait]
impl ModelBackend for ProviderBackend {
    fn name(&self) -> &str {
        "edgequake-llm"
    }

    async fn generate(
        &self,
        request: &ModelRequest,
        credential: &Credential,
    ) -> Result<String, BackendError> {
        let provider = self.provider_for(credential).ok_or_else(|| {
            BackendError::new(format!("no provider configured for key {credential}"))
        })?;

        let messages = build_messages(request);
        let options = build_options(request);
        let response = provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| BackendError::new(e.to_string()))?;

        debug!(
            "{} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}
