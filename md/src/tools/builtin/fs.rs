//! Filesystem tools, sandboxed to the working tree

use async_trait::async_trait;
use serde_json::Value;
use walkdir::WalkDir;

use crate::tools::context::ToolContext;
use crate::tools::traits::{SideEffectClass, Tool, ToolResult};

/// Largest file the read tool returns in full
const MAX_READ_BYTES: u64 = 256 * 1024;

/// Read a file from the working tree
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Read a file from the working tree"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the working tree" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(path) = input["path"].as_str() else {
            return ToolResult::error("missing path");
        };
        let resolved = match ctx.resolve_path(path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        match tokio::fs::metadata(&resolved).await {
            Ok(meta) if meta.len() > MAX_READ_BYTES => {
                return ToolResult::error(format!("{} is too large ({} bytes)", path, meta.len()));
            }
            Err(e) => return ToolResult::error(format!("cannot stat {}: {}", path, e)),
            _ => {}
        }

        match tokio::fs::read_to_string(&resolved).await {
            Ok(content) => ToolResult::success(content),
            Err(e) => ToolResult::error(format!("cannot read {}: {}", path, e)),
        }
    }
}

/// Write a file into the working tree
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &'static str {
        "write_file"
    }

    fn description(&self) -> &'static str {
        "Write a file into the working tree, creating parent directories"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"]
        })
    }

    fn side_effect(&self) -> SideEffectClass {
        SideEffectClass::Filesystem
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let (Some(path), Some(content)) = (input["path"].as_str(), input["content"].as_str()) else {
            return ToolResult::error("missing path or content");
        };
        let resolved = match ctx.resolve_path(path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        if let Some(parent) = resolved.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            return ToolResult::error(format!("cannot create directories for {}: {}", path, e));
        }

        match tokio::fs::write(&resolved, content).await {
            Ok(()) => ToolResult::success(format!("wrote {} bytes to {}", content.len(), path)),
            Err(e) => ToolResult::error(format!("cannot write {}: {}", path, e)),
        }
    }
}

/// List files under a directory in the working tree
pub struct ListDirTool;

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &'static str {
        "list_dir"
    }

    fn description(&self) -> &'static str {
        "List files under a directory, recursively up to a depth"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "depth": { "type": "integer" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(path) = input["path"].as_str() else {
            return ToolResult::error("missing path");
        };
        let depth = input["depth"].as_u64().unwrap_or(2) as usize;
        let resolved = match ctx.resolve_path(path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        let root = ctx.root.clone();
        let listing = tokio::task::spawn_blocking(move || {
            let mut lines = Vec::new();
            for entry in WalkDir::new(&resolved).max_depth(depth).into_iter().flatten() {
                let rel = entry.path().strip_prefix(&root).unwrap_or(entry.path());
                let suffix = if entry.file_type().is_dir() { "/" } else { "" };
                lines.push(format!("{}{}", rel.display(), suffix));
            }
            lines
        })
        .await;

        match listing {
            Ok(lines) if lines.is_empty() => ToolResult::error(format!("{} does not exist or is empty", path)),
            Ok(lines) => ToolResult::success(lines.join("\n")),
            Err(e) => ToolResult::error(format!("listing failed: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_write_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(temp.path(), "dev-alice");

        let written = WriteFileTool
            .execute(serde_json::json!({"path": "src/app.rs", "content": "fn app() {}"}), &ctx)
            .await;
        assert!(!written.is_error);

        let read = ReadFileTool
            .execute(serde_json::json!({"path": "src/app.rs"}), &ctx)
            .await;
        assert_eq!(read.content, "fn app() {}");
    }

    #[tokio::test]
    async fn test_read_missing_file_is_error() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(temp.path(), "dev-alice");
        let result = ReadFileTool.execute(serde_json::json!({"path": "nope.txt"}), &ctx).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_sandbox_escape_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(temp.path(), "dev-alice");
        let result = ReadFileTool
            .execute(serde_json::json!({"path": "../../etc/passwd"}), &ctx)
            .await;
        assert!(result.is_error);
        assert!(result.content.contains("escapes"));
    }

    #[tokio::test]
    async fn test_list_dir() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir(temp.path().join("src")).unwrap();
        std::fs::write(temp.path().join("src/lib.rs"), "").unwrap();
        let ctx = ToolContext::new(temp.path(), "dev-alice");

        let result = ListDirTool.execute(serde_json::json!({"path": "src"}), &ctx).await;
        assert!(!result.is_error);
        assert!(result.content.contains("lib.rs"));
    }
}
