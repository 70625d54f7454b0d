//! Remote collaborator using OpenAI-compatible APIs
//!
//! One HTTP client serves as both the fact extractor and the judge.
//! Supports any OpenAI-compatible endpoint with configurable URL, model,
//! and API key via environment variable.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::CuratorConfig;
use crate::curator::prompts::{extraction_prompt, judgment_prompt};
use crate::curator::provider::{Extractor, Judge};
use crate::curator::types::{CuratorError, coerce_scores, extract_json_from_response};

/// Remote collaborator over an OpenAI-compatible chat completions API
#[derive(Debug)]
pub struct RemoteCurator {
    client: Client,
    config: CuratorConfig,
    api_key: String,
}

/// OpenAI-compatible chat completion request
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
}

/// Message in the chat completion request
#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

/// OpenAI-compatible chat completion response
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

impl RemoteCurator {
    /// Create a new remote collaborator with the given configuration
    ///
    /// Reads the API key from the environment variable named by
    /// `config.api_key_env` and fails if it is not set.
    pub fn new(config: &CuratorConfig) -> Result<Self, CuratorError> {
        let api_key = env::var(&config.api_key_env).map_err(|_| {
            CuratorError::ConfigError(format!(
                "API key env var '{}' not set",
                config.api_key_env
            ))
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CuratorError::ConfigError(e.to_string()))?;

        info!(
            "RemoteCurator initialized with model: {}, api_url: {}",
            config.model, config.api_url
        );

        Ok(Self {
            client,
            config: config.clone(),
            api_key,
        })
    }

    /// Call the remote API, backing off exponentially on 429 responses and
    /// transport errors.
    async fn call_api(&self, prompt: &str) -> Result<String, CuratorError> {
        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: "You extract and assess facts. Answer only with JSON.".to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            temperature: 0.0,
            max_tokens: 1024,
        };

        let url = format!(
            "{}/chat/completions",
            self.config.api_url.trim_end_matches('/')
        );
        debug!("Calling remote API at: {}", url);

        let max_retries = self.config.max_retries.max(1);
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);
        let mut last_error = None;

        for attempt in 0..max_retries {
            let is_last = attempt + 1 == max_retries;
            match self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&request)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();

                    if status.as_u16() == 429 {
                        last_error = Some("rate limited".to_string());
                        if !is_last {
                            warn!(
                                "Rate limited on attempt {}/{}, waiting {:?}",
                                attempt + 1,
                                max_retries,
                                delay
                            );
                            tokio::time::sleep(delay).await;
                            delay *= 2;
                        }
                        continue;
                    }

                    if !status.is_success() {
                        let error_text = response
                            .text()
                            .await
                            .unwrap_or_else(|_| "Unknown error".to_string());
                        return Err(CuratorError::ApiError(format!(
                            "API returned {status}: {error_text}"
                        )));
                    }

                    let completion: ChatCompletionResponse = response
                        .json()
                        .await
                        .map_err(|e| CuratorError::ParseError(e.to_string()))?;

                    return completion
                        .choices
                        .into_iter()
                        .next()
                        .map(|c| c.message.content)
                        .ok_or_else(|| CuratorError::ApiError("Empty response".to_string()));
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                    if !is_last {
                        warn!(
                            "Request failed on attempt {}/{}, retrying: {}",
                            attempt + 1,
                            max_retries,
                            e
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        Err(CuratorError::Unavailable(format!(
            "Failed after {} attempts: {}",
            max_retries,
            last_error.unwrap_or_else(|| "Unknown error".to_string())
        )))
    }
}

#[async_trait]
impl Extractor for RemoteCurator {
    /// Returns parsed JSON when the response contains any, otherwise the
    /// raw text as a JSON string for downstream coercion.
    async fn extract(&self, text: &str, format: &str) -> Result<Value, CuratorError> {
        debug!("Extracting {format} from {} chars", text.len());
        let response = self.call_api(&extraction_prompt(text)).await?;
        debug!("Extraction response: {}", response);

        match serde_json::from_str(extract_json_from_response(&response)) {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!("Extraction response is not JSON ({e}), passing raw text on");
                Ok(Value::String(response))
            }
        }
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

#[async_trait]
impl Judge for RemoteCurator {
    async fn evaluate(
        &self,
        text: &str,
        criteria: &[&str],
    ) -> Result<HashMap<String, f32>, CuratorError> {
        let response = self.call_api(&judgment_prompt(text, criteria)).await?;
        debug!("Judgment response: {}", response);

        Ok(coerce_scores(&response, criteria))
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}
