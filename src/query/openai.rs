//! OpenAI-compatible chat completions backend (OpenAI, Ollama, vLLM, ...)

use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::config::LlmConfig;
use crate::{Error, Result};

use super::generator::StructuredGenerator;

/// Requests `{"sql": string}` through a JSON-schema `response_format`
pub struct OpenAiGenerator {
    client: Client,
    config: LlmConfig,
}

impl OpenAiGenerator {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn request_body(&self, system: &str, prompt: &str) -> serde_json::Value {
        json!({
            "model": self.config.model,
            "temperature": 0,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "sql_query",
                    "strict": true,
                    "schema": {
                        "type": "object",
                        "properties": {"sql": {"type": "string"}},
                        "required": ["sql"],
                        "additionalProperties": false,
                    },
                },
            },
        })
    }
}

#[async_trait]
impl StructuredGenerator for OpenAiGenerator {
    async fn generate(&self, system: &str, prompt: &str) -> anyhow::Result<String> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&self.request_body(system, prompt));
        if let Some(key) = &self.config.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("API error {}: {}", status, error_text);
        }

        let data: serde_json::Value = response.json().await.context("invalid response body")?;
        data["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .context("response has no message content")
    }
}
