//! Inference backends: one prompt (plus an optional page image) in, text out.
//!
//! Everything above this module treats the model as a black box that may
//! fail. A backend's only obligations are to send the request with the
//! credential it is handed and to surface failures as [`BackendError`] text
//! that still contains the provider's status code, because the retry loop in
//! [`crate::pipeline::call`] recognises rate limiting by `429` / `quota`.

mod gemini;
mod provider;

pub use gemini::GeminiBackend;
pub use provider::ProviderBackend;

use crate::error::BackendError;
use crate::keys::Credential;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A base64-encoded image sent inline with the prompt.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineImage {
    pub mime_type: String,
    /// Base64 payload without a `data:` prefix.
    pub data: String,
}

impl InlineImage {
    pub fn png(data: impl Into<String>) -> Self {
        Self {
            mime_type: "image/png".to_string(),
            data: data.into(),
        }
    }
}

impl std::fmt::Debug for InlineImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InlineImage")
            .field("mime_type", &self.mime_type)
            .field("data", &format_args!("<{} bytes base64>", self.data.len()))
            .finish()
    }
}

/// Sampling settings for one request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
}

impl SamplingParams {
    /// Transcription and solving: as deterministic as the API allows.
    pub const PRECISE: Self = Self {
        temperature: 0.1,
        top_k: 1,
        top_p: 0.8,
    };

    /// Repairing questions: some freedom to rewrite distractors.
    pub const REPAIR: Self = Self {
        temperature: 0.3,
        top_k: 20,
        top_p: 0.8,
    };

    /// Writing new questions.
    pub const CREATIVE: Self = Self {
        temperature: 0.7,
        top_k: 40,
        top_p: 0.9,
    };
}

/// One inference request.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub prompt: String,
    pub image: Option<InlineImage>,
    pub sampling: SamplingParams,
    pub max_output_tokens: usize,
}

impl ModelRequest {
    pub fn text(prompt: impl Into<String>, sampling: SamplingParams) -> Self {
        Self {
            prompt: prompt.into(),
            image: None,
            sampling,
            max_output_tokens: 8192,
        }
    }

    pub fn with_image(mut self, image: InlineImage) -> Self {
        self.image = Some(image);
        self
    }

    pub fn max_output_tokens(mut self, n: usize) -> Self {
        self.max_output_tokens = n;
        self
    }
}

/// A multimodal text-generation endpoint.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Short name for logs ("gemini", "openai", …).
    fn name(&self) -> &str;

    /// Issue one request authenticated with `credential`.
    async fn generate(
        &self,
        request: &ModelRequest,
        credential: &Credential,
    ) -> Result<String, BackendError>;
}
