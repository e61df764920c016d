//! Command execution and build tools

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::tools::context::ToolContext;
use crate::tools::traits::{SideEffectClass, Tool, ToolResult};

/// Cap on captured output per stream
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

fn truncate(output: &[u8]) -> String {
    let text = String::from_utf8_lossy(output);
    if text.len() <= MAX_OUTPUT_BYTES {
        return text.to_string();
    }
    let mut end = MAX_OUTPUT_BYTES;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...\n[output truncated]", &text[..end])
}

async fn run_in(ctx: &ToolContext, program: &str, args: &[&str]) -> ToolResult {
    let output = Command::new(program).args(args).current_dir(&ctx.root).output().await;

    match output {
        Ok(output) => {
            let stdout = truncate(&output.stdout);
            let stderr = truncate(&output.stderr);
            let code = output.status.code().unwrap_or(-1);
            let combined = format!("exit code: {}\nstdout:\n{}\nstderr:\n{}", code, stdout, stderr);
            if output.status.success() {
                ToolResult::success(combined)
            } else {
                ToolResult::error(combined)
            }
        }
        Err(e) => ToolResult::error(format!("failed to start {}: {}", program, e)),
    }
}

/// Run a shell command inside the working tree
pub struct RunCommandTool;

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &'static str {
        "run_command"
    }

    fn description(&self) -> &'static str {
        "Run a shell command inside the working tree"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string" }
            },
            "required": ["command"]
        })
    }

    fn side_effect(&self) -> SideEffectClass {
        SideEffectClass::Filesystem
    }

    fn idempotent(&self) -> bool {
        false
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(command) = input["command"].as_str() else {
            return ToolResult::error("missing command");
        };
        run_in(ctx, "sh", &["-c", command]).await
    }
}

/// Generic project builder: runs the provided build command
pub struct BuildTool;

#[async_trait]
impl Tool for BuildTool {
    fn name(&self) -> &'static str {
        "build"
    }

    fn description(&self) -> &'static str {
        "Build the project with its standard build command"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Build command; defaults to `make build`" }
            }
        })
    }

    fn side_effect(&self) -> SideEffectClass {
        SideEffectClass::Filesystem
    }

    fn idempotent(&self) -> bool {
        false
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let command = input["command"].as_str().unwrap_or("make build");
        run_in(ctx, "sh", &["-c", command]).await
    }
}

/// Android builder: all Android builds must pass through here
pub struct AndroidBuildTool;

#[async_trait]
impl Tool for AndroidBuildTool {
    fn name(&self) -> &'static str {
        "build_android"
    }

    fn description(&self) -> &'static str {
        "Build an Android project through the gradle wrapper"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task": { "type": "string", "description": "Gradle task; defaults to assembleDebug" }
            }
        })
    }

    fn side_effect(&self) -> SideEffectClass {
        SideEffectClass::Filesystem
    }

    fn idempotent(&self) -> bool {
        false
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let task = input["task"].as_str().unwrap_or("assembleDebug");
        let result = run_in(ctx, "./gradlew", &[task]).await;
        if result.is_error && result.content.contains("failed to start") {
            return ToolResult::error(format!("gradle wrapper missing in working tree: {}", result.content));
        }
        result
    }
}
