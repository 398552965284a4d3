//! Google Gemini `generateContent` over plain HTTPS.
//!
//! Gemini authenticates per request (`x-goog-api-key`), which is exactly what
//! per-call key rotation needs: one HTTP client, a different key each call.

use super::{ModelBackend, ModelRequest};
use crate::config::ExamConfig;
use crate::error::BackendError;
use crate::keys::Credential;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Gemini REST backend.
#[derive(Debug, Clone)]
pub struct GeminiBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl GeminiBackend {
    /// Backend for `model` (default `gemini-1.5-flash`) with a per-request timeout.
    pub fn new(model: Option<&str>, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::new(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
        })
    }

    /// Backend for `config.model` with `config.api_timeout_secs`.
    pub fn from_config(config: &ExamConfig) -> Result<Self, BackendError> {
        Self::new(
            config.model.as_deref(),
            Duration::from_secs(config.api_timeout_secs),
        )
    }

    /// Point at a different host (proxies, test servers).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    Inline {
        #[serde(rename = "inline_data")]
        inline_data: InlineData<'a>,
    },
}

#[derive(Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_k: u32,
    top_p: f32,
    max_output_tokens: usize,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

fn request_body(request: &ModelRequest) -> GenerateContentRequest<'_> {
    let mut parts = vec![Part::Text {
        text: &request.prompt,
    }];
    if let Some(ref image) = request.image {
        parts.push(Part::Inline {
            inline_data: InlineData {
                mime_type: &image.mime_type,
                data: &image.data,
            },
        });
    }
    GenerateContentRequest {
        contents: vec![Content {
            role: "user",
            parts,
        }],
        generation_config: GenerationConfig {
            temperature: request.sampling.temperature,
            top_k: request.sampling.top_k,
            top_p: request.sampling.top_p,
            max_output_tokens: request.max_output_tokens,
        },
    }
}

/// Concatenate the text parts of the first candidate.
fn response_text(body: &str) -> Result<String, BackendError> {
    let parsed: GenerateContentResponse = serde_json::from_str(body)
        .map_err(|e| BackendError::new(format!("unreadable Gemini response: {e}")))?;
    let text: String = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    Ok(text)
}

#[async_trait]
impl ModelBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(
        &self,
        request: &ModelRequest,
        credential: &Credential,
    ) -> Result<String, BackendError> {
        let body = serde_json::to_string(&request_body(request))
            .map_err(|e| BackendError::new(format!("request encoding: {e}")))?;

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", credential.secret())
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| BackendError::new(format!("request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::new(format!("reading response: {e}")))?;

        if !status.is_success() {
            return Err(BackendError::new(format!("HTTP {}: {}", status.as_u16(), text)));
        }

        let content = response_text(&text)?;
        debug!("Gemini returned {} chars", content.len());
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InlineImage, SamplingParams};

    #[test]
    fn body_carries_prompt_image_and_sampling() {
        let req = ModelRequest::text("Read this", SamplingParams::PRECISE)
            .with_image(InlineImage::png("AAAA"))
            .max_output_tokens(1024);
        let json = serde_json::to_value(request_body(&req)).unwrap();

        let parts = &json["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], "Read this");
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/png");
        assert_eq!(parts[1]["inline_data"]["data"], "AAAA");
        assert_eq!(json["generationConfig"]["topK"], 1);
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 1024);
    }

    #[test]
    fn text_only_request_has_one_part() {
        let req = ModelRequest::text("Solve", SamplingParams::REPAIR);
        let json = serde_json::to_value(request_body(&req)).unwrap();
        assert_eq!(json["contents"][0]["parts"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn response_parts_are_joined() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"[1,"},{"text":"2]"}]}}]}"#;
        assert_eq!(response_text(body).unwrap(), "[1,2]");
    }

    #[test]
    fn blocked_response_is_empty_text() {
        let body = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        assert_eq!(response_text(body).unwrap(), "");
    }

    #[test]
    fn endpoint_uses_model() {
        let backend = GeminiBackend::new(Some("gemini-2.0-flash"), Duration::from_secs(5))
            .unwrap()
            .with_base_url("http://localhost:9999/");
        assert_eq!(
            backend.endpoint(),
            "http://localhost:9999/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }
}
