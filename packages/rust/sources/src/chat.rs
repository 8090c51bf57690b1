//! Minimal OpenAI-compatible chat-completion client.
//!
//! Used by the AI-search fallback and by answer synthesis.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use triangulate_shared::{ResearchError, Result};

use crate::{build_client, transport_error, upstream_error};

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the vendor to return the URLs it consulted.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub return_citations: bool,
}

/// First choice's text plus any citation URLs.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletion {
    pub content: String,
    pub citations: Vec<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    citations: Vec<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Bearer-authenticated client for one chat-completion endpoint.
pub struct ChatClient {
    http: Client,
    endpoint: String,
    api_key: String,
    service: &'static str,
}

impl ChatClient {
    /// `service` names the vendor in errors and logs.
    pub fn new(
        service: &'static str,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            http: build_client(timeout)?,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            service,
        })
    }

    #[instrument(skip_all, fields(service = self.service, model = %request.model))]
    pub async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion> {
        debug!(messages = request.messages.len(), "chat completion request");

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| transport_error(self.service, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(upstream_error(self.service, status.as_u16(), &body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ResearchError::parse(format!("{}: invalid completion body: {e}", self.service)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| {
                ResearchError::parse(format!("{}: completion contained no content", self.service))
            })?;

        Ok(ChatCompletion {
            content,
            citations: parsed.citations,
        })
    }
}
