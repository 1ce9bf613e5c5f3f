//! Client for OpenAI-compatible chat completion endpoints.

use super::RateLimiter;
use crate::models::{Config, LlmError, ModelSpec, PipelineError, Result};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Message in a chat completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// A finished completion.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    /// Model reported by the backend (may differ from the requested id)
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub duration: Duration,
}

/// OpenAI-compatible `/chat/completions` client with retries.
pub struct LlmClient {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
    retry_base: Duration,
    rate_limiter: Arc<RateLimiter>,
    total_input_tokens: AtomicU64,
    total_output_tokens: AtomicU64,
    total_cost_micros: AtomicU64,
}

impl LlmClient {
    pub fn new(
        api_key: Option<String>,
        base_url: impl Into<String>,
        timeout_secs: u64,
        max_retries: u32,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(PipelineError::Network)?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            max_retries: max_retries.max(1),
            retry_base: Duration::from_secs(1),
            rate_limiter,
            total_input_tokens: AtomicU64::new(0),
            total_output_tokens: AtomicU64::new(0),
            total_cost_micros: AtomicU64::new(0),
        })
    }

    /// Build from the `[llm]` section, resolving the API key.
    pub fn from_config(config: &Config, rate_limiter: Arc<RateLimiter>) -> Result<Self> {
        let api_key = config.resolve_api_key()?;
        Self::new(
            Some(api_key),
            &config.llm.base_url,
            config.llm.timeout_secs,
            config.llm.max_retries,
            rate_limiter,
        )
    }

    /// Base delay for exponential backoff (doubles per attempt).
    pub fn with_retry_base(mut self, retry_base: Duration) -> Self {
        self.retry_base = retry_base;
        self
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|_| {
                PipelineError::InvalidInput("API key contains invalid header characters".to_string())
            })?;
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("X-Title", HeaderValue::from_static("raspberry"));
        Ok(headers)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Send one chat completion, retrying transient failures.
    ///
    /// 429 responses honour `retry-after`; 401 and 404 are never retried.
    pub async fn complete(&self, model: &ModelSpec, messages: &[Message]) -> Result<Completion> {
        let start = Instant::now();
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatCompletionRequest {
            model: &model.id,
            messages,
            max_tokens: model.max_tokens,
            temperature: model.temperature,
        };
        let mut last_error: Option<PipelineError> = None;

        for attempt in 0..self.max_retries {
            let is_last = attempt + 1 == self.max_retries;
            self.rate_limiter.wait_if_needed(&model.id).await;

            let response = match self
                .client
                .post(&url)
                .headers(self.headers()?)
                .json(&request)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(if e.is_timeout() {
                        PipelineError::Timeout(self.timeout)
                    } else {
                        PipelineError::Network(e)
                    });
                    if !is_last {
                        let backoff = self.backoff(attempt);
                        debug!(
                            model = %model.id,
                            attempt,
                            backoff_ms = backoff.as_millis() as u64,
                            "Retrying after network error"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    continue;
                }
            };

            let status = response.status().as_u16();
            self.rate_limiter
                .record_response(&model.id, status, response.headers());

            if status == 429 {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<f64>().ok())
                    .filter(|s| s.is_finite() && *s >= 0.0);
                let message = response.text().await.unwrap_or_default();
                last_error = Some(
                    LlmError::RateLimited {
                        message,
                        retry_after_secs: retry_after,
                    }
                    .into(),
                );
                if !is_last {
                    let wait = retry_after
                        .map(Duration::from_secs_f64)
                        .unwrap_or_else(|| self.backoff(attempt));
                    debug!(model = %model.id, attempt, wait_ms = wait.as_millis() as u64, "Rate limited, waiting");
                    tokio::time::sleep(wait).await;
                }
                continue;
            }

            if !response.status().is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ApiErrorResponse>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                let error = match status {
                    401 => LlmError::AuthenticationFailed,
                    404 => LlmError::ModelNotFound(model.id.clone()),
                    _ => LlmError::ApiError { status, message },
                };
                if matches!(status, 401 | 404) {
                    return Err(error.into());
                }
                last_error = Some(error.into());
                if !is_last {
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
                continue;
            }

            let body: ChatCompletionResponse = response
                .json()
                .await
                .map_err(|e| LlmError::InvalidResponse(format!("undecodable body: {e}")))?;
            let content = body
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| LlmError::InvalidResponse("no message content in response".to_string()))?;
            let usage = body.usage.unwrap_or_default();
            let cost = model.cost_usd(usage.prompt_tokens, usage.completion_tokens);

            self.total_input_tokens
                .fetch_add(u64::from(usage.prompt_tokens), Ordering::Relaxed);
            self.total_output_tokens
                .fetch_add(u64::from(usage.completion_tokens), Ordering::Relaxed);
            self.total_cost_micros
                .fetch_add((cost * 1_000_000.0) as u64, Ordering::Relaxed);

            return Ok(Completion {
                content,
                model: body.model.unwrap_or_else(|| model.id.clone()),
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                cost_usd: cost,
                duration: start.elapsed(),
            });
        }

        Err(match last_error {
            Some(PipelineError::LlmApi(LlmError::RateLimited { message, .. })) => {
                LlmError::MaxRetriesExceeded {
                    attempts: self.max_retries,
                    last_error: format!("rate limited: {message}"),
                }
                .into()
            }
            Some(e) => e,
            None => LlmError::MaxRetriesExceeded {
                attempts: self.max_retries,
                last_error: "no attempt made".to_string(),
            }
            .into(),
        })
    }

    /// Total (input, output) tokens used so far.
    pub fn total_tokens(&self) -> (u64, u64) {
        (
            self.total_input_tokens.load(Ordering::Relaxed),
            self.total_output_tokens.load(Ordering::Relaxed),
        )
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.total_cost_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }
}
