//! Tool trait and result types

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::context::ToolContext;

/// Side-effect classification of a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffectClass {
    Pure,
    Filesystem,
    Network,
    Deploy,
}

/// A tool that can be called by an agent
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (matches the LLM tool_use name)
    fn name(&self) -> &'static str;

    /// Human-readable description
    fn description(&self) -> &'static str;

    /// JSON Schema for input parameters
    fn input_schema(&self) -> Value;

    /// Side-effect class; Deploy requires permission plus human approval
    fn side_effect(&self) -> SideEffectClass {
        SideEffectClass::Pure
    }

    /// Whether repeated calls with the same arguments may serve a cached
    /// result instead of re-executing
    fn idempotent(&self) -> bool {
        true
    }

    /// Per-tool timeout; None uses the configured default
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Execute the tool
    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult;
}

/// Result of a tool execution
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}
