//! Tool error types

use thiserror::Error;

/// Errors from the tool runner
///
/// Policy errors halt the agent turn and surface as an escalate message;
/// execution failures become error-flagged tool results instead.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("forbidden: tool {tool} is not in the allow-list of {agent}")]
    Forbidden { agent: String, tool: String },

    #[error("stack_mismatch: {detail}")]
    StackMismatch { detail: String },

    #[error("human approval required for {action}")]
    ApprovalRequired { action: String },

    #[error("invalid arguments for {tool}: {detail}")]
    InvalidArgs { tool: String, detail: String },

    #[error("unknown tool: {0}")]
    Unknown(String),
}

impl ToolError {
    /// Policy errors are surfaced, never retried and never hidden
    pub fn is_policy(&self) -> bool {
        matches!(
            self,
            ToolError::Forbidden { .. } | ToolError::StackMismatch { .. } | ToolError::ApprovalRequired { .. }
        )
    }
}
