//! Wire types and transport for the Gemini `generateContent` REST API.
//!
//! The transport is a trait so the retry state machine in
//! [`crate::pipeline::extract`] can be driven by a scripted fake. It reports
//! the raw HTTP status and body; every classification decision (429, 404,
//! safety blocks, JSON recovery) is made by the extraction client.

use crate::config::ExtractionConfig;
use crate::error::IngestionError;
use crate::model::PageImage;
use crate::pipeline::encode::inline_part;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

// ── Request ──────────────────────────────────────────────────────────────

/// `POST <endpoint>/<model>:generateContent` body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<RequestContent>,
    pub generation_config: GenerationConfig,
}

impl GenerateContentRequest {
    /// One user turn: every page image in order, then the instruction text.
    pub fn for_pages(
        pages: &[PageImage],
        prompt: &str,
        temperature: f32,
        max_output_tokens: u32,
    ) -> Self {
        let mut parts: Vec<RequestPart> = pages.iter().map(inline_part).collect();
        parts.push(RequestPart::Text {
            text: prompt.to_string(),
        });
        Self {
            contents: vec![RequestContent { parts }],
            generation_config: GenerationConfig {
                temperature,
                max_output_tokens,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestContent {
    pub parts: Vec<RequestPart>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RequestPart {
    InlineData { inline_data: InlineData },
    Text { text: String },
}

#[derive(Clone, Serialize)]
pub struct InlineData {
    pub mime_type: String,
    /// Standard base64.
    pub data: String,
}

impl fmt::Debug for InlineData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InlineData")
            .field("mime_type", &self.mime_type)
            .field("data_len", &self.data.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

// ── Response ─────────────────────────────────────────────────────────────

/// The subset of the `generateContent` response the client inspects.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponsePart {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

impl GenerateContentResponse {
    /// `candidates[0].content.parts[0].text`, if present and non-empty.
    pub fn first_text(&self) -> Option<&str> {
        self.candidates
            .first()?
            .content
            .as_ref()?
            .parts
            .first()?
            .text
            .as_deref()
            .filter(|t| !t.is_empty())
    }

    /// `candidates[0].finishReason`, or `UNKNOWN`.
    pub fn finish_reason(&self) -> &str {
        self.candidates
            .first()
            .and_then(|c| c.finish_reason.as_deref())
            .unwrap_or("UNKNOWN")
    }

    /// The candidate was stopped by safety filters, or the prompt itself
    /// was blocked before generation.
    pub fn is_safety_blocked(&self) -> bool {
        self.finish_reason() == "SAFETY"
            || self
                .prompt_feedback
                .as_ref()
                .is_some_and(|p| p.block_reason.is_some())
    }
}

/// Pull a readable message out of an error body:
/// `error.message`, else the `error` object as JSON, else the raw text.
pub fn api_error_message(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(json) => match json.get("error") {
            Some(err) => match err.get("message").and_then(|m| m.as_str()) {
                Some(message) => message.to_string(),
                None => err.to_string(),
            },
            None => body.to_string(),
        },
        Err(_) => body.to_string(),
    }
}

// ── Transport ────────────────────────────────────────────────────────────

/// Raw HTTP result of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The request never produced an HTTP response (DNS, TLS, reset, timeout).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Sends one `generateContent` call for one model variant.
#[async_trait]
pub trait GenerateContentTransport: Send + Sync {
    async fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<TransportResponse, TransportError>;
}

#[async_trait]
impl<T: GenerateContentTransport + ?Sized> GenerateContentTransport for std::sync::Arc<T> {
    async fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<TransportResponse, TransportError> {
        (**self).generate_content(model, request).await
    }
}

/// Production transport over `reqwest`.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    timeout_secs: u64,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl HttpTransport {
    pub fn new(config: &ExtractionConfig) -> Result<Self, IngestionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| IngestionError::InvalidConfig(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout_secs: config.request_timeout_secs,
        })
    }

    /// Request URL without the key; safe to log.
    fn url_for(&self, model: &str) -> String {
        format!("{}/{}:generateContent", self.endpoint, model)
    }
}

#[async_trait]
impl GenerateContentTransport for HttpTransport {
    async fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<TransportResponse, TransportError> {
        let url = self.url_for(model);
        debug!(%url, "POST generateContent");

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(request)
            .send()
            .await
            .map_err(|e| self.describe(e))?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| self.describe(e))?;
        debug!(status, body_len = body.len(), "generateContent responded");

        Ok(TransportResponse { status, body })
    }
}

impl HttpTransport {
    // reqwest includes the URL (and therefore the key) in its Display.
    fn describe(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError(format!("request timed out after {}s", self.timeout_secs))
        } else {
            TransportError(e.without_url().to_string())
        }
    }
}
