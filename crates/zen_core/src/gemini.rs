//! Gemini `generateContent` client for day plans.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::plan::{
    build_prompt, parse_plan, response_schema, PlanClient, PlanError, PlanRequest, PlanResponse,
};

pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

pub struct GeminiClient {
    api_key: Option<String>,
    model: String,
    base_url: String,
    timeout: Duration,
    http: Client,
}

impl GeminiClient {
    pub fn from_config(config: &GeminiConfig) -> Result<Self, PlanError> {
        debug!(model = %config.model, base_url = %config.base_url, "creating gemini client");
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            api_key: config.api_key.clone().filter(|key| !key.trim().is_empty()),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout,
            http,
        })
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }

    fn build_request_body(&self, request: &PlanRequest) -> serde_json::Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": build_prompt(request) }]
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": response_schema()
            }
        })
    }

    /// The client timeout covers the body read too, so both stages report
    /// it the same way.
    fn transport_error(&self, err: reqwest::Error) -> PlanError {
        if err.is_timeout() {
            PlanError::Timeout(self.timeout)
        } else {
            PlanError::Network(err)
        }
    }
}

#[async_trait]
impl PlanClient for GeminiClient {
    async fn request_plan(&self, request: &PlanRequest) -> Result<PlanResponse, PlanError> {
        let Some(api_key) = &self.api_key else {
            warn!("plan requested without an API key");
            return Err(PlanError::MissingCredential);
        };

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&self.build_request_body(request))
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), "gemini returned an error status");
            return Err(PlanError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let raw = response
            .text()
            .await
            .map_err(|err| self.transport_error(err))?;
        let body: GenerateContentResponse = serde_json::from_str(&raw)?;
        let text = body.into_text().ok_or(PlanError::EmptyResponse)?;
        debug!(bytes = text.len(), "gemini plan received");
        parse_plan(&text)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate, if it has any.
    fn into_text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content
            .parts
            .into_iter()
            .filter_map(|part| part.text)
            .collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}
