//! Deploy-class tool
//!
//! The runner gates this behind `may_deploy` plus a human approval record;
//! by the time execute runs, both have been checked.

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::tools::context::ToolContext;
use crate::tools::traits::{SideEffectClass, Tool, ToolResult};

/// Run the project's deploy script against a target
pub struct DeployTool;

#[async_trait]
impl Tool for DeployTool {
    fn name(&self) -> &'static str {
        "deploy"
    }

    fn description(&self) -> &'static str {
        "Run the project's deploy script against a named target"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "target": { "type": "string", "description": "Deploy target, e.g. staging" }
            },
            "required": ["target"]
        })
    }

    fn side_effect(&self) -> SideEffectClass {
        SideEffectClass::Deploy
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(target) = input["target"].as_str() else {
            return ToolResult::error("missing target");
        };

        let script = ctx.root.join("scripts").join("deploy.sh");
        if !script.exists() {
            // Nothing to run is still a recorded deploy intent, not a crash
            return ToolResult::success(format!(
                "deploy to {} recorded; no scripts/deploy.sh present in working tree",
                target
            ));
        }

        let output = Command::new("sh")
            .arg(script)
            .arg(target)
            .current_dir(&ctx.root)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                ToolResult::success(format!("deployed to {}:\n{}", target, String::from_utf8_lossy(&output.stdout)))
            }
            Ok(output) => ToolResult::error(format!(
                "deploy to {} failed (exit {}):\n{}",
                target,
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr)
            )),
            Err(e) => ToolResult::error(format!("deploy script failed to start: {}", e)),
        }
    }
}
