//! Memory-backed tools

use async_trait::async_trait;
use serde_json::Value;

use missionstore::MemoryLayer;

use crate::tools::context::ToolContext;
use crate::tools::traits::{Tool, ToolResult};

/// Search scoped memory from inside an agent turn
///
/// The calling agent is the viewer, so adversarial isolation applies here
/// exactly as it does for executor-driven reads.
pub struct SearchMemoryTool;

#[async_trait]
impl Tool for SearchMemoryTool {
    fn name(&self) -> &'static str {
        "search_memory"
    }

    fn description(&self) -> &'static str {
        "Search session, pattern, project and global memory"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "k": { "type": "integer", "description": "Maximum results, default 10" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(query) = input["query"].as_str() else {
            return ToolResult::error("missing query");
        };
        let k = input["k"].as_u64().unwrap_or(10) as usize;

        let Some(memory) = &ctx.memory else {
            return ToolResult::error("memory is not available in this context");
        };

        let layers = [
            MemoryLayer::Session,
            MemoryLayer::Pattern,
            MemoryLayer::Project,
            MemoryLayer::Global,
        ];
        match memory.search(ctx.viewer.as_ref(), query, &layers, &ctx.scopes, k).await {
            Ok(entries) if entries.is_empty() => ToolResult::success("no matching memory entries"),
            Ok(entries) => {
                let lines: Vec<String> = entries
                    .iter()
                    .map(|e| format!("[{}/{}] {}", e.layer, e.category, e.body))
                    .collect();
                ToolResult::success(lines.join("\n"))
            }
            Err(e) => ToolResult::error(format!("memory search failed: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AgentDefinition, Role};
    use crate::events::EventStream;
    use crate::memory::{MemoryManager, MemoryScopes};
    use crate::state::StateManager;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_search_memory_applies_isolation() {
        let state = StateManager::spawn_in_memory().unwrap();
        let events = Arc::new(EventStream::new(state.clone()));
        let memory = MemoryManager::new(state.clone(), events);

        let writer = AgentDefinition::new("dev-alice", "Alice", Role::Developer)
            .with_writable_layers(&[MemoryLayer::Pattern]);
        memory
            .put(&writer, MemoryLayer::Pattern, "run-1", "finding", "draft verdict notes", serde_json::json!({}))
            .await
            .unwrap();

        let scopes = MemoryScopes {
            pattern_run_id: Some("run-1".into()),
            ..Default::default()
        };

        let temp = tempfile::tempdir().unwrap();
        let critic = AgentDefinition::new("critic", "Critic", Role::Adversarial);
        let ctx = ToolContext::new(temp.path(), "critic")
            .with_memory(memory.clone(), scopes.clone())
            .with_viewer(critic);

        let result = SearchMemoryTool
            .execute(serde_json::json!({"query": "verdict"}), &ctx)
            .await;
        assert!(!result.is_error);
        assert!(result.content.contains("no matching"));

        // The developer viewer sees the entry
        let ctx = ToolContext::new(temp.path(), "dev-alice")
            .with_memory(memory, scopes)
            .with_viewer(writer);
        let result = SearchMemoryTool
            .execute(serde_json::json!({"query": "verdict"}), &ctx)
            .await;
        assert!(result.content.contains("draft verdict notes"));

        state.shutdown().await.unwrap();
    }
}
