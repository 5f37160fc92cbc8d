//! OpenAI-compatible chat/completions client.
//! Connection pooling via reqwest, simple request pacing, no retries: a
//! failed or empty completion is reported to the caller as-is.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::provider::TranslationProvider;
use super::TranslateError;
use crate::config::ProviderConfig;

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    timeout: Duration,
    /// Simple token-bucket: tracks the next allowed request time.
    next_allowed: Arc<tokio::sync::Mutex<Instant>>,
    min_interval: Duration,
}

impl OpenAiClient {
    pub fn new(config: &ProviderConfig, timeout: Duration) -> Result<Self, TranslateError> {
        if config.api_key.is_empty() {
            return Err(TranslateError::InvalidConfig("API key is empty".into()));
        }

        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(timeout)
            .build()
            .map_err(|e| TranslateError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout,
            next_allowed: Arc::new(tokio::sync::Mutex::new(Instant::now())),
            min_interval: config.min_request_interval,
        })
    }

    /// Wait until the pacing interval since the previous request has passed.
    async fn rate_limit_wait(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut next = self.next_allowed.lock().await;
        let now = Instant::now();
        if *next > now {
            tokio::time::sleep(*next - now).await;
        }
        *next = Instant::now() + self.min_interval;
    }

    fn request_body(&self, system_instruction: &str, text: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_instruction},
                {"role": "user", "content": text}
            ],
            "temperature": self.temperature,
            "stream": false
        })
    }
}

#[async_trait]
impl TranslationProvider for OpenAiClient {
    async fn translate(
        &self,
        system_instruction: &str,
        text: &str,
    ) -> Result<String, TranslateError> {
        self.rate_limit_wait().await;

        let body = self.request_body(system_instruction, text);
        let start = Instant::now();
        let result = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await;

        let response = match result {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                let status = resp.status();
                let body_text = resp.text().await.unwrap_or_default();
                warn!(status = status.as_u16(), "provider returned error status");
                return Err(TranslateError::Upstream(format!(
                    "unexpected status {}: {}",
                    status,
                    body_text.chars().take(200).collect::<String>()
                )));
            }
            Err(e) if e.is_timeout() => return Err(TranslateError::Timeout(self.timeout)),
            Err(e) => return Err(TranslateError::Upstream(e.to_string())),
        };

        let completion: ChatCompletion = response.json().await.map_err(|e| {
            if e.is_timeout() {
                TranslateError::Timeout(self.timeout)
            } else {
                TranslateError::Upstream(format!("malformed completion: {e}"))
            }
        })?;

        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            total_tokens = completion.usage.as_ref().map(|u| u.total_tokens),
            "completion received"
        );

        Ok(completion.into_content())
    }
}

// --- Response types ---

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
    usage: Option<CompletionUsage>,
}

impl ChatCompletion {
    /// Content of the first choice, empty when absent.
    fn into_content(self) -> String {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct CompletionUsage {
    total_tokens: u32,
}
