//! Oracle collaborator: the external reasoning service that answers a
//! [`DecisionRequest`] with a JSON decision object.

use crate::oracle::contract::DecisionRequest;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument};

/// Answers decision requests. `Ok(None)` means the oracle replied without content.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn request_decision(&self, request: &DecisionRequest) -> Result<Option<Value>>;
}

/// Client for OpenAI-compatible chat-completions endpoints with structured output.
pub struct HttpDecisionOracle {
    http_client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    /// Per-call timeout
    timeout: Duration,
}

impl HttpDecisionOracle {
    pub fn new(
        http_client: Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            timeout,
        }
    }

    /// Chat-completions payload for one request.
    pub fn request_body(&self, request: &DecisionRequest) -> Value {
        json!({
            "model": self.model,
            "temperature": 0.2,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_prompt }
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "trading_decision",
                    "strict": true,
                    "schema": request.response_schema
                }
            }
        })
    }
}

#[async_trait]
impl DecisionOracle for HttpDecisionOracle {
    #[instrument(skip(self, request), fields(model = %self.model))]
    async fn request_decision(&self, request: &DecisionRequest) -> Result<Option<Value>> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self
            .http_client
            .post(&url)
            .timeout(self.timeout)
            .json(&self.request_body(request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.context("Failed to reach oracle")?;
        if !response.status().is_success() {
            return Err(anyhow!("Oracle request failed: {}", response.status()));
        }

        let body: Value = response.json().await.context("Failed to decode oracle response")?;
        let decision = extract_decision(&body)?;
        debug!("Oracle answered: {:?}", decision);
        Ok(decision)
    }
}

/// Pull the JSON decision out of `choices[0].message.content`.
/// Missing or blank content yields `None`; content that is not JSON is an error.
pub fn extract_decision(body: &Value) -> Result<Option<Value>> {
    let content = body
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.pointer("/message/content"))
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();

    if content.is_empty() {
        return Ok(None);
    }

    let decision = serde_json::from_str(content).context("Oracle content is not valid JSON")?;
    Ok(Some(decision))
}
