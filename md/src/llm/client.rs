//! LlmClient trait and the scripted mock
//!
//! The mock doubles as the local dev fallback at the end of the model
//! resolution chain, so it lives in the library proper rather than cfg(test).

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{CompletionRequest, CompletionResponse, LlmError, StopReason, TokenUsage};

/// A provider wire client
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Provider name as used in traces and cooldown bookkeeping
    fn name(&self) -> &str;

    /// One blocking completion against a concrete model
    async fn complete(&self, model: &str, request: &CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

/// Scripted client for tests and local development
///
/// Responses are served in order; when the script runs dry it returns a
/// canned end-turn message so long loops stay deterministic.
pub struct MockLlmClient {
    name: String,
    script: Mutex<VecDeque<Result<CompletionResponse, LlmError>>>,
    /// Requests seen, for assertions
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmClient {
    pub fn new(responses: Vec<CompletionResponse>) -> Self {
        Self {
            name: "mock".to_string(),
            script: Mutex::new(responses.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn named(name: impl Into<String>, responses: Vec<CompletionResponse>) -> Self {
        Self {
            name: name.into(),
            ..Self::new(responses)
        }
    }

    /// Script an error at this position in the sequence
    pub fn push_error(&self, error: LlmError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    pub fn push_response(&self, response: CompletionResponse) {
        self.script.lock().unwrap().push_back(Ok(response));
    }

    /// Simple final text response
    pub fn text_response(text: impl Into<String>) -> CompletionResponse {
        CompletionResponse {
            content: Some(text.into()),
            tool_calls: vec![],
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
        }
    }

    /// Response asking for one tool call
    pub fn tool_response(id: &str, name: &str, input: serde_json::Value) -> CompletionResponse {
        CompletionResponse {
            content: None,
            tool_calls: vec![super::ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                input,
            }],
            stop_reason: StopReason::ToolUse,
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 20,
            },
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, _model: &str, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.script.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(Self::text_response("(mock: script exhausted)")),
        }
    }
}
