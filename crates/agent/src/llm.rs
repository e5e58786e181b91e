use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use steward_core::TokenUsage;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_owned(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_owned(), content: content.into() }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u64,
    pub temperature: f64,
    /// Ask the provider for a JSON object response (classifier calls).
    pub json_response: bool,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>, max_tokens: u64) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens,
            temperature: 0.1,
            json_response: false,
        }
    }

    /// Pre-flight token estimate: roughly four characters per prompt
    /// token, plus the full completion allowance.
    pub fn estimated_tokens(&self) -> u64 {
        let prompt_chars: usize = self.messages.iter().map(|m| m.content.len()).sum();
        (prompt_chars as u64 / 4) + self.max_tokens
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: TokenUsage,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("llm request failed: {0}")]
pub struct LlmError(pub String);

/// Seam to the inference provider. The router never sees HTTP; tests
/// script this trait directly.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

/// Replays canned responses in order and records every request it saw.
#[derive(Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<CompletionResponse, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlmClient {
    pub fn respond_with(&self, content: impl Into<String>, input_tokens: u64, output_tokens: u64) {
        self.push(Ok(CompletionResponse {
            content: content.into(),
            usage: TokenUsage {
                input_tokens,
                output_tokens,
                model: "scripted".to_owned(),
                provider: "test".to_owned(),
            },
        }));
    }

    pub fn fail_with(&self, error: impl Into<String>) {
        self.push(Err(LlmError(error.into())));
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn push(&self, entry: Result<CompletionResponse, LlmError>) {
        match self.script.lock() {
            Ok(mut script) => script.push_back(entry),
            Err(poisoned) => poisoned.into_inner().push_back(entry),
        }
    }
}

#[async_trait::async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        match self.requests.lock() {
            Ok(mut requests) => requests.push(request),
            Err(poisoned) => poisoned.into_inner().push(request),
        }
        let next = match self.script.lock() {
            Ok(mut script) => script.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        next.unwrap_or_else(|| Err(LlmError("scripted client exhausted".to_owned())))
    }
}
