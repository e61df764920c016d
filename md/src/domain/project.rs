//! Projects: created by the external caller, never mutated by the core

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A project the missions run against
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    /// Working tree the tools operate in
    pub root: PathBuf,
    /// Glob patterns for project documents (vision, values, conventions),
    /// relative to `root`; seeded into project-layer memory at admission
    #[serde(default)]
    pub documents: Vec<String>,
    /// Default technology tag for selection
    #[serde(default = "default_technology")]
    pub technology: String,
}

fn default_technology() -> String {
    "generic".to_string()
}

impl Project {
    pub fn new(id: impl Into<String>, name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            root: root.into(),
            documents: Vec::new(),
            technology: default_technology(),
        }
    }
}
