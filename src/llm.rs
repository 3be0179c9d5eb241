use crate::error::{ChatError, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::time::Duration;
use tracing::{debug, warn};

/// Wait used when a rate-limit message carries no usable delay
pub const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

lazy_static! {
    static ref WAIT_MINUTES_SECONDS: Regex =
        Regex::new(r"(?i)try again in\s+(\d+)m\s*(\d+(?:\.\d+)?)s").unwrap();
    static ref WAIT_SECONDS: Regex = Regex::new(r"(?i)try again in\s+(\d+(?:\.\d+)?)s").unwrap();
}

/// Text-in, text-out completion
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn invoke(&self, prompt: &str) -> Result<String>;
}

/// OpenAI-compatible chat-completions client
pub struct LlmClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
}

impl LlmClient {
    pub fn new(api_key: String, base_url: String, model: String, temperature: f32) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            temperature,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn invoke(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "temperature": self.temperature,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(ChatError::Llm(format!("Rate limit reached: {}", detail)));
            }
            return Err(ChatError::Llm(format!("LLM API returned {}: {}", status, detail)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChatError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ChatError::Llm("No content in LLM response".to_string()))?;

        debug!("LLM reply: {}", content);
        Ok(content.trim().to_string())
    }
}

/// Delay advertised in a rate-limit message ("try again in 1m23.5s")
pub fn parse_wait_time(message: &str) -> Duration {
    if let Some(caps) = WAIT_MINUTES_SECONDS.captures(message) {
        let minutes: f64 = caps[1].parse().unwrap_or(0.0);
        let seconds: f64 = caps[2].parse().unwrap_or(0.0);
        return Duration::from_secs_f64(minutes * 60.0 + seconds);
    }
    if let Some(caps) = WAIT_SECONDS.captures(message) {
        if let Ok(seconds) = caps[1].parse::<f64>() {
            return Duration::from_secs_f64(seconds);
        }
    }
    DEFAULT_RATE_LIMIT_WAIT
}

fn is_rate_limit(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("rate limit") || lower.contains("rate_limit") || lower.contains("limite de taux")
}

/// Map any failure of an LLM call to what the pipeline reports.
/// Rate limits carry their wait; everything else becomes a generic LLM error.
pub fn translate_llm_error(err: ChatError) -> ChatError {
    match err {
        ChatError::RateLimited { .. } | ChatError::TokenBudgetExceeded { .. } => err,
        other => {
            let message = other.to_string();
            if is_rate_limit(&message) {
                let wait = parse_wait_time(&message);
                warn!("Rate limit exceeded, waiting {}s", wait.as_secs());
                ChatError::RateLimited { wait }
            } else {
                ChatError::Llm(message)
            }
        }
    }
}
