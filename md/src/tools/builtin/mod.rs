//! Builtin tools

mod deploy;
mod fs;
mod memory;
mod shell;

pub use deploy::DeployTool;
pub use fs::{ListDirTool, ReadFileTool, WriteFileTool};
pub use memory::SearchMemoryTool;
pub use shell::{AndroidBuildTool, BuildTool, RunCommandTool};

use std::sync::Arc;

use super::traits::Tool;

/// The standard tool set
pub fn standard_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ReadFileTool),
        Arc::new(WriteFileTool),
        Arc::new(ListDirTool),
        Arc::new(RunCommandTool),
        Arc::new(BuildTool),
        Arc::new(AndroidBuildTool),
        Arc::new(SearchMemoryTool),
        Arc::new(DeployTool),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_set_is_complete() {
        let names: Vec<&str> = standard_tools().iter().map(|t| t.name()).collect();
        for expected in [
            "read_file",
            "write_file",
            "list_dir",
            "run_command",
            "build",
            "build_android",
            "search_memory",
            "deploy",
        ] {
            assert!(names.contains(&expected), "missing {}", expected);
        }
    }
}
