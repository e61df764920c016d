//! LLM layer: provider-agnostic types, wire clients, rate limiting, gateway
//!
//! The single entry point is [`LlmGateway::call`]: it resolves the model
//! binding, takes the rate limiter, walks the provider fallback chain with
//! cooldowns, and hands back the response plus the trace material the caller
//! journals.

mod anthropic;
pub mod client;
mod error;
mod gateway;
mod limiter;
mod openai;
mod types;

pub use anthropic::AnthropicClient;
pub use client::{LlmClient, MockLlmClient};
pub use error::LlmError;
pub use gateway::{GatewayResponse, LlmGateway};
pub use limiter::RateLimiter;
pub use openai::OpenAiCompatClient;
pub use types::{
    CallContext, CompletionRequest, CompletionResponse, ContentBlock, Message, MessageContent, ModelBinding, Role,
    StopReason, TokenUsage, ToolCall, ToolDefinition, prompt_hash,
};
