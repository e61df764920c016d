//! Agent definitions: role, permissions, LLM category, tool allow-list

use serde::{Deserialize, Serialize};

use super::MemoryLayer;

/// Role classification of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Developer,
    Qa,
    Security,
    Product,
    Architecture,
    Devops,
    Orchestrator,
    Adversarial,
    Other,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Developer => "developer",
            Role::Qa => "qa",
            Role::Security => "security",
            Role::Product => "product",
            Role::Architecture => "architecture",
            Role::Devops => "devops",
            Role::Orchestrator => "orchestrator",
            Role::Adversarial => "adversarial",
            Role::Other => "other",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How much blocking power an agent's veto carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VetoLevel {
    #[default]
    None,
    Advisory,
    Strong,
    Absolute,
}

/// Model weight class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelWeight {
    #[default]
    Heavy,
    Light,
}

/// What the model is tuned toward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFlavor {
    #[default]
    Reasoning,
    Production,
    Redaction,
}

/// Preferred LLM category: weight x flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LlmCategory {
    pub weight: ModelWeight,
    pub flavor: ModelFlavor,
}

impl LlmCategory {
    /// Stable tag used for routing config keys, e.g. "heavy-reasoning"
    pub fn tag(&self) -> String {
        let weight = match self.weight {
            ModelWeight::Heavy => "heavy",
            ModelWeight::Light => "light",
        };
        let flavor = match self.flavor {
            ModelFlavor::Reasoning => "reasoning",
            ModelFlavor::Production => "production",
            ModelFlavor::Redaction => "redaction",
        };
        format!("{}-{}", weight, flavor)
    }
}

/// Agent permissions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Permissions {
    /// Veto strength in review edges
    #[serde(rename = "veto-level")]
    pub veto_level: VetoLevel,

    /// May spawn sub-turns in hierarchical patterns
    #[serde(rename = "may-delegate")]
    pub may_delegate: bool,

    /// Layers this agent may write memory into
    #[serde(rename = "writable-layers")]
    pub writable_layers: Vec<MemoryLayer>,

    /// May invoke deploy-class tools (still needs a human approval record)
    #[serde(rename = "may-deploy")]
    pub may_deploy: bool,

    /// Action tags that always require a human approval record
    #[serde(rename = "requires-human-approval-for")]
    pub requires_human_approval_for: Vec<String>,
}

impl Permissions {
    pub fn may_write_layer(&self, layer: MemoryLayer) -> bool {
        self.writable_layers.contains(&layer)
    }
}

/// A registered agent definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub id: String,
    pub name: String,
    pub role: Role,
    #[serde(rename = "llm-category", default)]
    pub llm_category: LlmCategory,
    #[serde(default)]
    pub permissions: Permissions,
    /// Tool allow-list, by tool name
    #[serde(default)]
    pub tools: Vec<String>,
    /// Technology the agent specializes in ("angular_19", "generic", ...)
    #[serde(default = "default_technology")]
    pub technology: String,
}

fn default_technology() -> String {
    "generic".to_string()
}

impl AgentDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
            llm_category: LlmCategory::default(),
            permissions: Permissions::default(),
            tools: Vec::new(),
            technology: default_technology(),
        }
    }

    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.tools = tools.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_veto(mut self, level: VetoLevel) -> Self {
        self.permissions.veto_level = level;
        self
    }

    pub fn with_writable_layers(mut self, layers: &[MemoryLayer]) -> Self {
        self.permissions.writable_layers = layers.to_vec();
        self
    }

    pub fn is_adversarial(&self) -> bool {
        self.role == Role::Adversarial
    }

    pub fn allows_tool(&self, tool: &str) -> bool {
        self.tools.iter().any(|t| t == tool)
    }
}
