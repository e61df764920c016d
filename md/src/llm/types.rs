//! LLM request/response types
//!
//! Modeled on the Anthropic Messages API but provider-agnostic; the OpenAI
//! client maps these onto its own wire shapes.

use serde::{Deserialize, Serialize};

/// A completion request - everything needed for one LLM call
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    /// Tools the agent may call this turn
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: u32,
}

/// A message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Blocks(blocks),
        }
    }

    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(blocks),
        }
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Message content - either plain text or structured blocks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::Blocks(_) => None,
        }
    }
}

/// A content block in a message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error,
        }
    }
}

/// Response from a completion request
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    pub usage: TokenUsage,
}

/// A tool call requested by the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Why the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

impl StopReason {
    pub fn from_anthropic(s: &str) -> Self {
        match s {
            "end_turn" => StopReason::EndTurn,
            "tool_use" => StopReason::ToolUse,
            "max_tokens" => StopReason::MaxTokens,
            "stop_sequence" => StopReason::StopSequence,
            _ => StopReason::EndTurn,
        }
    }

    pub fn from_openai(s: &str) -> Self {
        match s {
            "stop" => StopReason::EndTurn,
            "tool_calls" => StopReason::ToolUse,
            "length" => StopReason::MaxTokens,
            _ => StopReason::EndTurn,
        }
    }
}

/// Token usage for fitness and budget accounting
///
/// Counts are mandatory non-negative integers; cost is fixed-point
/// micro-dollars so accounting never touches floats.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Cost in micro-USD based on model pricing tables
    pub fn cost_microusd(&self, model: &str) -> i64 {
        // (input, output) price in micro-USD per million tokens
        let (input_price, output_price): (i64, i64) = match model {
            m if m.contains("opus") => (15_000_000, 75_000_000),
            m if m.contains("sonnet") => (3_000_000, 15_000_000),
            m if m.contains("haiku") => (250_000, 1_250_000),
            _ => (3_000_000, 15_000_000),
        };
        let input_cost = self.input_tokens as i64 * input_price / 1_000_000;
        let output_cost = self.output_tokens as i64 * output_price / 1_000_000;
        input_cost + output_cost
    }
}

/// Tool definition for the LLM
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    pub fn to_anthropic_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "input_schema": self.input_schema,
        })
    }

    pub fn to_openai_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.input_schema,
            }
        })
    }
}

/// A resolved (provider, model) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelBinding {
    pub provider: String,
    pub model: String,
}

/// Caller identity attached to every LLM call for observability
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub agent_id: String,
    pub mission_id: Option<String>,
    pub phase: String,
}

/// Stable hash of a request's prompt material, for trace deduplication
pub fn prompt_hash(request: &CompletionRequest) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    request.system_prompt.hash(&mut hasher);
    for msg in &request.messages {
        if let Ok(json) = serde_json::to_string(msg) {
            json.hash(&mut hasher);
        }
    }
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, Role::User);
        assert!(matches!(msg.content, MessageContent::Text(ref s) if s == "Hello"));
    }

    #[test]
    fn test_cost_is_fixed_point() {
        let usage = TokenUsage {
            input_tokens: 1_000_000,
            output_tokens: 100_000,
        };
        // Sonnet: $3/M input + $1.50 for 100k output = $4.50 = 4_500_000 micro-USD
        assert_eq!(usage.cost_microusd("claude-sonnet-4"), 4_500_000);
        // Opus: $15 + $7.50
        assert_eq!(usage.cost_microusd("claude-opus-4"), 22_500_000);
    }

    #[test]
    fn test_stop_reason_parsing() {
        assert_eq!(StopReason::from_anthropic("tool_use"), StopReason::ToolUse);
        assert_eq!(StopReason::from_anthropic("unknown"), StopReason::EndTurn);
        assert_eq!(StopReason::from_openai("tool_calls"), StopReason::ToolUse);
        assert_eq!(StopReason::from_openai("length"), StopReason::MaxTokens);
    }

    #[test]
    fn test_prompt_hash_stable() {
        let request = CompletionRequest {
            system_prompt: "You are a reviewer".into(),
            messages: vec![Message::user("review this")],
            tools: vec![],
            max_tokens: 100,
        };
        assert_eq!(prompt_hash(&request), prompt_hash(&request.clone()));

        let other = CompletionRequest {
            system_prompt: "You are a builder".into(),
            ..request
        };
        assert_ne!(prompt_hash(&other), {
            let request = CompletionRequest {
                system_prompt: "You are a reviewer".into(),
                messages: vec![Message::user("review this")],
                tools: vec![],
                max_tokens: 100,
            };
            prompt_hash(&request)
        });
    }

    #[test]
    fn test_tool_schemas() {
        let tool = ToolDefinition::new("read_file", "Read a file", serde_json::json!({"type": "object"}));
        let anthropic = tool.to_anthropic_schema();
        assert_eq!(anthropic["name"], "read_file");
        let openai = tool.to_openai_schema();
        assert_eq!(openai["function"]["name"], "read_file");
    }
}
