//! Setup generator client
//!
//! The generator is an external text producer: prompt in, free-form text out,
//! tens of seconds to minutes later. Implementations just make the call and
//! report how long it took; [`call_bounded`] applies the timeout and the
//! caller's cancellation around it.

use mixplan_common::config::GeneratorConfig;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, EngineResult};

const API_VERSION: &str = "2023-06-01";
const USER_AGENT: &str = concat!("mixplan/", env!("CARGO_PKG_VERSION"));

/// Generator errors
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Response contained no text")]
    EmptyResponse,

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Generator not configured: {0}")]
    NotConfigured(String),
}

/// Raw generator text plus call duration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorOutput {
    pub text: String,
    pub elapsed: Duration,
}

/// External text producer
#[async_trait::async_trait]
pub trait SetupGenerator: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    async fn generate(&self, system: &str, user: &str) -> Result<GeneratorOutput, GeneratorError>;
}

/// Generator call bounded by `timeout` and the caller's token
///
/// Cancellation wins over a response that arrives in the same poll.
pub async fn call_bounded(
    generator: &dyn SetupGenerator,
    system: &str,
    user: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> EngineResult<GeneratorOutput> {
    let call = tokio::time::timeout(timeout, generator.generate(system, user));

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
        outcome = call => match outcome {
            Err(_) => Err(EngineError::GeneratorTimeout { after: timeout }),
            Ok(Err(e)) => Err(EngineError::Generator {
                message: format!("{}: {}", generator.name(), e),
            }),
            Ok(Ok(output)) => Ok(output),
        },
    }
}

// ============================================================================
// Messages API client
// ============================================================================

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Generator backed by a messages-style HTTP API
pub struct MessagesApiGenerator {
    http_client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
}

impl MessagesApiGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self, GeneratorError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| GeneratorError::NotConfigured("API key missing".to_string()))?;

        // Outer deadline is enforced by the caller; this only guards against a hung socket
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout + Duration::from_secs(30))
            .build()
            .map_err(|e| GeneratorError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.clone(),
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait::async_trait]
impl SetupGenerator for MessagesApiGenerator {
    fn name(&self) -> &'static str {
        "messages-api"
    }

    async fn generate(&self, system: &str, user: &str) -> Result<GeneratorOutput, GeneratorError> {
        let started = Instant::now();
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system,
            messages: vec![Message {
                role: "user",
                content: user.to_string(),
            }],
        };

        tracing::debug!(model = %self.model, url = %self.base_url, "Calling generator");

        let response = self
            .http_client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| GeneratorError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(GeneratorError::Api(status.as_u16(), error_text));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| GeneratorError::Parse(e.to_string()))?;

        let text = first_text_block(parsed).ok_or(GeneratorError::EmptyResponse)?;
        let elapsed = started.elapsed();

        tracing::info!(
            model = %self.model,
            chars = text.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Generator responded"
        );

        Ok(GeneratorOutput { text, elapsed })
    }
}

fn first_text_block(response: MessagesResponse) -> Option<String> {
    response
        .content
        .into_iter()
        .find(|block| block.kind == "text")
        .and_then(|block| block.text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_text_block_skips_other_kinds() {
        let response: MessagesResponse = serde_json::from_str(
            r#"{"content": [{"type": "thinking"}, {"type": "text", "text": "```json\n{}\n```"}]}"#,
        )
        .unwrap();
        assert_eq!(first_text_block(response).as_deref(), Some("```json\n{}\n```"));
    }

    #[test]
    fn test_missing_content_is_empty() {
        let response: MessagesResponse = serde_json::from_str(r#"{"id": "msg_1"}"#).unwrap();
        assert!(first_text_block(response).is_none());
    }

    #[test]
    fn test_requires_api_key() {
        let config = GeneratorConfig::default();
        assert!(matches!(
            MessagesApiGenerator::new(&config),
            Err(GeneratorError::NotConfigured(_))
        ));

        let config = GeneratorConfig {
            api_key: Some("sk-test".to_string()),
            ..GeneratorConfig::default()
        };
        assert!(MessagesApiGenerator::new(&config).is_ok());
    }

    #[test]
    fn test_request_shape() {
        let body = MessagesRequest {
            model: "m",
            max_tokens: 10,
            system: "sys",
            messages: vec![Message {
                role: "user",
                content: "hi".to_string(),
            }],
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["system"], "sys");
    }
}
