//! Agent definition registry
//!
//! Definitions are data, not code: loaded from YAML and resolved at runtime
//! by id or role. Unknown references surface as structural errors at the
//! call site.

use std::collections::HashMap;
use std::path::Path;

use eyre::{Context, Result};
use tracing::{debug, info};

use crate::domain::{AgentDefinition, Role};

/// Registry of agent definitions keyed by stable id
#[derive(Default, Clone)]
pub struct AgentRegistry {
    agents: HashMap<String, AgentDefinition>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, agent: AgentDefinition) {
        debug!(agent_id = %agent.id, role = %agent.role, "Registering agent");
        self.agents.insert(agent.id.clone(), agent);
    }

    pub fn get(&self, id: &str) -> Option<&AgentDefinition> {
        self.agents.get(id)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Candidates for a role, optionally narrowed by technology
    ///
    /// Technology narrowing is a preference: when nobody matches the tag,
    /// the full role set comes back so selection can still proceed.
    pub fn by_role(&self, role: Role, technology: Option<&str>) -> Vec<&AgentDefinition> {
        let all: Vec<&AgentDefinition> = self.agents.values().filter(|a| a.role == role).collect();
        if let Some(technology) = technology {
            let narrowed: Vec<&AgentDefinition> =
                all.iter().copied().filter(|a| a.technology == technology).collect();
            if !narrowed.is_empty() {
                return narrowed;
            }
        }
        all
    }

    /// Parse definitions from a YAML document (a list of agents)
    pub fn load_yaml(&mut self, yaml: &str) -> Result<usize> {
        let agents: Vec<AgentDefinition> = serde_yaml::from_str(yaml).context("Failed to parse agent definitions")?;
        let count = agents.len();
        for agent in agents {
            self.register(agent);
        }
        Ok(count)
    }

    /// Load every `*.yml`/`*.yaml` file in a directory
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) -> Result<usize> {
        let dir = dir.as_ref();
        if !dir.exists() {
            return Ok(0);
        }
        let mut loaded = 0;
        for entry in std::fs::read_dir(dir).context("Failed to read agents directory")? {
            let path = entry?.path();
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e == "yml" || e == "yaml")
                .unwrap_or(false);
            if is_yaml {
                let content = std::fs::read_to_string(&path)
                    .context(format!("Failed to read {}", path.display()))?;
                loaded += self.load_yaml(&content)?;
            }
        }
        info!(count = loaded, dir = %dir.display(), "Loaded agent definitions");
        Ok(loaded)
    }
}
