//! Resilient client for the generative decision service.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::ServiceError;

const TEMPERATURE: f64 = 0.2;
const MAX_OUTPUT_TOKENS: u32 = 8192;

/// Anything that turns a prompt into a decision-service answer.
///
/// Text answers come back as [`Value::String`]; JSON answers as the parsed value.
#[async_trait]
pub trait DecisionService: Send + Sync {
    async fn call(&self, prompt: &str, expect_json: bool) -> Result<Value, ServiceError>;

    async fn call_text(&self, prompt: &str) -> Result<String, ServiceError> {
        Ok(match self.call(prompt, false).await? {
            Value::String(text) => text,
            other => other.to_string(),
        })
    }

    async fn call_json(&self, prompt: &str) -> Result<Value, ServiceError> {
        self.call(prompt, true).await
    }
}

/// Fixed exponential backoff: 3 attempts, waiting 1s then 2s between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    backoff_multiplier: u32,
}

impl RetryPolicy {
    pub const STANDARD: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1000),
        backoff_multiplier: 2,
    };

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait after the failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.initial_delay * self.backoff_multiplier.pow(attempt)
    }

    /// Runs `op` until it succeeds or the attempts run out; the last error is returned.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, ServiceError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 >= self.max_attempts => return Err(err),
                Err(err) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "decision service call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// Gemini `generateContent` client.
pub struct GeminiClient {
    client: Client,
    settings: Settings,
    retry: RetryPolicy,
}

impl GeminiClient {
    pub fn new(settings: Settings) -> Self {
        Self {
            client: Client::new(),
            settings,
            retry: RetryPolicy::STANDARD,
        }
    }

    async fn send_once(&self, prompt: &str, expect_json: bool) -> Result<Value, ServiceError> {
        let response = self
            .client
            .post(self.settings.generate_url())
            .query(&[("key", self.settings.api_key.as_str())])
            .json(&request_body(prompt, expect_json))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(ServiceError::Transient(format!("status {}", status.as_u16())));
        }

        let body = response.json::<Value>().await;

        if !status.is_success() {
            let message = body
                .ok()
                .and_then(|b| b["error"]["message"].as_str().map(String::from))
                .unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("Unknown API error")
                        .to_string()
                });
            return Err(ServiceError::Request {
                status: status.as_u16(),
                message,
            });
        }

        let body = body.map_err(|e| ServiceError::Structural(e.to_string()))?;
        normalize(&body, expect_json)
    }
}

#[async_trait]
impl DecisionService for GeminiClient {
    async fn call(&self, prompt: &str, expect_json: bool) -> Result<Value, ServiceError> {
        debug!(prompt_chars = prompt.len(), expect_json, "calling decision service");
        self.retry
            .run(|_| self.send_once(prompt, expect_json))
            .await
    }
}

pub fn request_body(prompt: &str, expect_json: bool) -> Value {
    let mut generation_config = json!({
        "temperature": TEMPERATURE,
        "maxOutputTokens": MAX_OUTPUT_TOKENS,
    });
    if expect_json {
        generation_config["response_mime_type"] = json!("application/json");
    }

    json!({
        "contents": [{ "parts": [{ "text": prompt }] }],
        "generationConfig": generation_config,
    })
}

/// Pulls the answer text out of a 2xx body and shapes it per `expect_json`.
pub fn normalize(body: &Value, expect_json: bool) -> Result<Value, ServiceError> {
    let text = body["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .ok_or_else(|| {
            ServiceError::Structural("missing candidates[0].content.parts[0].text".into())
        })?;

    let cleaned = strip_fence(text);

    if expect_json {
        serde_json::from_str(cleaned).map_err(|e| ServiceError::Parse(e.to_string()))
    } else {
        Ok(Value::String(cleaned.to_string()))
    }
}

/// Strip possible markdown fences the model might add.
pub fn strip_fence(text: &str) -> &str {
    text.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn answer(text: &str) -> Value {
        json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] })
    }

    #[test]
    fn strips_fences() {
        assert_eq!(strip_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fence("```\nhello\n```"), "hello");
        assert_eq!(strip_fence("  plain  "), "plain");
    }

    #[test]
    fn normalizes_text_and_json() {
        assert_eq!(
            normalize(&answer("  hi there \n"), false).unwrap(),
            json!("hi there")
        );
        assert_eq!(
            normalize(&answer("```json\n{\"action\":\"REPLY\"}\n```"), true).unwrap(),
            json!({"action": "REPLY"})
        );
    }

    #[test]
    fn classifies_bad_bodies() {
        assert!(matches!(
            normalize(&json!({"candidates": []}), false),
            Err(ServiceError::Structural(_))
        ));
        assert!(matches!(
            normalize(&answer("not json"), true),
            Err(ServiceError::Parse(_))
        ));
    }

    #[test]
    fn request_body_sets_mime_type_only_for_json() {
        let text = request_body("p", false);
        assert_eq!(text["contents"][0]["parts"][0]["text"], "p");
        assert!(text["generationConfig"].get("response_mime_type").is_none());

        let structured = request_body("p", true);
        assert_eq!(
            structured["generationConfig"]["response_mime_type"],
            "application/json"
        );
        assert_eq!(structured["generationConfig"]["maxOutputTokens"], 8192);
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::STANDARD;
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_two_transient_failures() {
        let calls = AtomicU32::new(0);
        let mut waits = Vec::new();
        let mut last = Instant::now();

        let result = RetryPolicy::STANDARD
            .run(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                let now = Instant::now();
                if attempt > 0 {
                    waits.push(now - last);
                }
                last = now;
                async move {
                    if attempt < 2 {
                        Err(ServiceError::Transient("status 503".into()))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(waits.len(), 2);
        for (waited, expected) in waits.iter().zip([1000, 2000]) {
            let expected = Duration::from_millis(expected);
            assert!(*waited >= expected && *waited < expected + Duration::from_millis(50));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_three_attempts() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = RetryPolicy::STANDARD
            .run(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    Err(ServiceError::Request {
                        status: 400,
                        message: format!("attempt {}", attempt),
                    })
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(ServiceError::Request { message, .. }) => assert_eq!(message, "attempt 2"),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
