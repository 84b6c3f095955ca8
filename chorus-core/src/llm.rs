//! Minimal chat-completions client for the decision policy and for
//! generating opening lines. Works against any OpenAI-compatible API.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::decision::{DecisionBackend, SwitchVerdict, parse_verdict};
use crate::error::CoreError;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatClient {
    pub fn new(api_key: &str) -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: &str, api_key: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}"))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.2,
            max_tokens: 100,
        })
    }

    pub fn model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// One system+user round trip, returning the raw completion text.
    /// With `json_response`, the API is asked for a JSON object; the
    /// word "json" must appear in the prompt for that mode, so it is
    /// appended when missing.
    pub async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        json_response: bool,
    ) -> Result<String> {
        let mut user_prompt = user_prompt.to_string();
        if json_response
            && !format!("{system_prompt}{user_prompt}")
                .to_lowercase()
                .contains("json")
        {
            user_prompt.push_str("\nPlease provide the response in JSON format.");
        }

        let mut body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        if json_response {
            body["response_format"] = json!({"type": "json_object"});
        }

        let response: ChatResponse = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        debug!(model = %self.model, "chat completion: {content:?}");
        Ok(content)
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Hand-off decision backend over an OpenAI-compatible API.
pub struct OpenAiDecisionBackend {
    client: ChatClient,
}

impl OpenAiDecisionBackend {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DecisionBackend for OpenAiDecisionBackend {
    async fn decide(&self, system_prompt: &str, history: &str) -> Result<SwitchVerdict> {
        let content = self
            .client
            .complete(system_prompt, history, true)
            .await
            .map_err(|e| CoreError::DecisionBackend(e.to_string()))?;
        parse_verdict(&content)
    }
}
