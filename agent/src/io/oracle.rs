//! Reasoning oracle gateway.
//!
//! The [`OracleGateway`] trait is the single structured-completion contract
//! the decision engine depends on. [`HttpOracleGateway`] speaks the
//! OpenAI-compatible chat-completions protocol served by the local sidecar.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::error::GatewayError;
use crate::io::config::OracleConfig;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Rendered prompt pair for one completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OraclePrompt {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f64,
    pub max_tokens: u32,
}

impl From<&OracleConfig> for SamplingParams {
    fn from(config: &OracleConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

#[async_trait]
pub trait OracleGateway: Send + Sync {
    /// Return the raw completion text. The text is untrusted.
    async fn complete(
        &self,
        prompt: &OraclePrompt,
        sampling: &SamplingParams,
    ) -> Result<String, GatewayError>;

    /// Cheap reachability check used before the loop starts.
    async fn probe(&self) -> Result<(), GatewayError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct HttpOracleGateway {
    client: Client,
    url: String,
    model: String,
}

impl HttpOracleGateway {
    pub fn new(config: &OracleConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            model: config.model.clone(),
        })
    }

    /// Service root derived from the completions URL (`.../v1/...` stripped).
    fn base_url(&self) -> &str {
        match self.url.rsplit_once("/v1/") {
            Some((base, _)) => base,
            None => &self.url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
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

#[async_trait]
impl OracleGateway for HttpOracleGateway {
    #[instrument(skip_all, fields(model = %self.model, max_tokens = sampling.max_tokens))]
    async fn complete(
        &self,
        prompt: &OraclePrompt,
        sampling: &SamplingParams,
    ) -> Result<String, GatewayError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user},
            ],
            "temperature": sampling.temperature,
            "max_tokens": sampling.max_tokens,
            "stream": false,
        });
        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "oracle returned error status");
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }
        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| GatewayError::Decode("completion has no message content".to_string()))?;
        debug!(chars = content.len(), "oracle replied");
        Ok(content)
    }

    async fn probe(&self) -> Result<(), GatewayError> {
        // Any HTTP response means the sidecar is up.
        self.client
            .get(self.base_url())
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_strips_versioned_path() {
        let gateway = HttpOracleGateway::new(&OracleConfig::default()).expect("gateway");
        assert_eq!(gateway.base_url(), "http://ollama:11434");
    }

    #[test]
    fn base_url_without_version_is_unchanged() {
        let config = OracleConfig {
            url: "http://sidecar:8080/complete".to_string(),
            ..OracleConfig::default()
        };
        let gateway = HttpOracleGateway::new(&config).expect("gateway");
        assert_eq!(gateway.base_url(), "http://sidecar:8080/complete");
    }

    #[test]
    fn sampling_params_follow_config() {
        let params = SamplingParams::from(&OracleConfig::default());
        assert_eq!(params.temperature, 0.7);
        assert_eq!(params.max_tokens, 256);
    }
}
