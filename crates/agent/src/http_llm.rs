use std::time::Duration;

use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::json;
use steward_core::config::LlmConfig;
use steward_core::TokenUsage;
use tracing::warn;

use crate::llm::{ChatMessage, CompletionRequest, CompletionResponse, LlmClient, LlmError};

/// OpenAI-compatible chat-completions client (Groq and OpenRouter both
/// speak this dialect). Transport failures and 5xx responses retry with
/// a short backoff up to `max_retries`.
pub struct HttpLlmClient {
    http: reqwest::Client,
    base_url: String,
    provider: String,
    api_key: Option<String>,
    max_retries: u32,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u64,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| LlmError(format!("could not build http client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            provider: config.provider.clone(),
            api_key: config.api_key.as_ref().map(|key| key.expose_secret().to_owned()),
            max_retries: config.max_retries,
        })
    }

    async fn send_once(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = WireRequest {
            model: &request.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format: request
                .json_response
                .then(|| json!({ "type": "json_object" })),
        };

        let mut builder = self.http.post(format!("{}/chat/completions", self.base_url));
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError(format!("transport error: {e}")))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(LlmError(format!("provider returned {status}")));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError(format!("provider rejected request ({status}): {detail}")));
        }

        let wire: WireResponse =
            response.json().await.map_err(|e| LlmError(format!("malformed response: {e}")))?;
        let content = wire
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError("response contained no completion".to_owned()))?;
        let usage = wire.usage.unwrap_or(WireUsage { prompt_tokens: 0, completion_tokens: 0 });

        Ok(CompletionResponse {
            content,
            usage: TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                model: request.model.clone(),
                provider: self.provider.clone(),
            },
        })
    }

    fn is_retryable(error: &LlmError) -> bool {
        error.0.starts_with("transport error") || error.0.starts_with("provider returned")
    }
}

#[async_trait::async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut attempt = 0;
        loop {
            match self.send_once(&request).await {
                Ok(response) => return Ok(response),
                Err(error) if Self::is_retryable(&error) && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        event_name = "llm.retry",
                        attempt,
                        error = %error,
                        "retrying llm request"
                    );
                    tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
