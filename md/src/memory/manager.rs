//! MemoryManager over the state actor

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use missionstore::{MemoryEntry, MemoryLayer, MemoryQuery, SearchMode};

use crate::domain::{AgentDefinition, Project};
use crate::events::{CoreEvent, EventStream};
use crate::state::{StateError, StateManager};

/// Memory layer errors
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Agent {agent} may not write the {layer} layer")]
    Forbidden { agent: String, layer: MemoryLayer },

    #[error("State error: {0}")]
    State(#[from] StateError),
}

/// The scope ids a caller currently lives in
///
/// Missing scopes simply exclude that layer from reads.
#[derive(Debug, Clone, Default)]
pub struct MemoryScopes {
    pub session_id: Option<String>,
    pub pattern_run_id: Option<String>,
    pub project_id: Option<String>,
}

impl MemoryScopes {
    /// Scope id used for the global layer
    pub const GLOBAL: &'static str = "global";

    fn scope_for(&self, layer: MemoryLayer) -> Option<String> {
        match layer {
            MemoryLayer::Session => self.session_id.clone(),
            MemoryLayer::Pattern => self.pattern_run_id.clone(),
            MemoryLayer::Project => self.project_id.clone(),
            MemoryLayer::Global => Some(Self::GLOBAL.to_string()),
        }
    }
}

/// The memory manager
#[derive(Clone)]
pub struct MemoryManager {
    state: StateManager,
    events: Arc<EventStream>,
}

impl MemoryManager {
    pub fn new(state: StateManager, events: Arc<EventStream>) -> Self {
        Self { state, events }
    }

    /// Write one entry; requires the agent's write permission for the layer
    pub async fn put(
        &self,
        agent: &AgentDefinition,
        layer: MemoryLayer,
        scope_id: &str,
        category: &str,
        text: &str,
        metadata: serde_json::Value,
    ) -> Result<String, MemoryError> {
        if !agent.permissions.may_write_layer(layer) {
            return Err(MemoryError::Forbidden {
                agent: agent.id.clone(),
                layer,
            });
        }
        let entry = MemoryEntry::new(layer, scope_id, category, text, metadata);
        let id = entry.id.clone();
        self.state.put_memory(entry).await?;
        debug!(agent = %agent.id, %layer, scope_id, category, "Memory entry written");
        Ok(id)
    }

    /// Write one entry on behalf of the core itself (phase closures, retros)
    pub async fn put_system(
        &self,
        layer: MemoryLayer,
        scope_id: &str,
        category: &str,
        text: &str,
        metadata: serde_json::Value,
    ) -> Result<String, MemoryError> {
        let entry = MemoryEntry::new(layer, scope_id, category, text, metadata);
        let id = entry.id.clone();
        self.state.put_memory(entry).await?;
        Ok(id)
    }

    /// Search the given layers within the caller's scopes
    ///
    /// The viewer identity drives the isolation rule: an adversarial viewer
    /// never sees the pattern layer of the run it is judging. Index failures
    /// degrade to a linear scan and emit a degraded-mode event; callers never
    /// see an error from that path.
    pub async fn search(
        &self,
        viewer: Option<&AgentDefinition>,
        query: &str,
        layers: &[MemoryLayer],
        scopes: &MemoryScopes,
        k: usize,
    ) -> Result<Vec<MemoryEntry>, MemoryError> {
        let allowed = self.allowed_scopes(viewer, layers, scopes);
        if allowed.is_empty() {
            return Ok(Vec::new());
        }

        let (entries, mode) = self
            .state
            .search_memory(
                query,
                MemoryQuery {
                    scopes: allowed,
                    category: None,
                    limit: if k == 0 { 20 } else { k },
                },
            )
            .await?;

        if mode == SearchMode::LinearScan {
            warn!("Memory search served by linear scan");
            self.events
                .emit(CoreEvent::MemoryDegraded {
                    detail: "full-text index bypassed, linear scan served the query".to_string(),
                })
                .await;
        }

        Ok(entries)
    }

    fn allowed_scopes(
        &self,
        viewer: Option<&AgentDefinition>,
        layers: &[MemoryLayer],
        scopes: &MemoryScopes,
    ) -> Vec<(MemoryLayer, String)> {
        let adversarial = viewer.map(|v| v.is_adversarial()).unwrap_or(false);
        layers
            .iter()
            .filter(|layer| !(adversarial && **layer == MemoryLayer::Pattern))
            .filter_map(|layer| scopes.scope_for(*layer).map(|scope| (*layer, scope)))
            .collect()
    }

    /// Read-only fetch by entry id, for non-core tooling
    pub async fn get(&self, entry_id: &str) -> Result<Option<MemoryEntry>, MemoryError> {
        Ok(self.state.get_memory(entry_id).await?)
    }

    /// Expire a session or pattern scope when its run ends
    pub async fn expire_scope(&self, layer: MemoryLayer, scope_id: &str) -> Result<usize, MemoryError> {
        let count = self.state.expire_memory_scope(layer, scope_id).await?;
        debug!(%layer, scope_id, count, "Expired memory scope");
        Ok(count)
    }

    /// Seed project documents into project-layer memory
    ///
    /// Glob patterns resolve relative to the project root. Re-seeding is a
    /// no-op when the scope already holds document entries.
    pub async fn seed_project(&self, project: &Project) -> Result<usize, MemoryError> {
        let existing = self
            .state
            .list_memory_scope(MemoryLayer::Project, &project.id, Some("document"), 1)
            .await?;
        if !existing.is_empty() {
            debug!(project = %project.id, "Project documents already seeded");
            return Ok(0);
        }

        let mut seeded = 0;
        for pattern in &project.documents {
            let full_pattern = project.root.join(pattern);
            let Ok(paths) = glob::glob(&full_pattern.to_string_lossy()) else {
                warn!(pattern, "Invalid document glob, skipping");
                continue;
            };
            for entry in paths.flatten() {
                if !entry.is_file() {
                    continue;
                }
                let Ok(text) = std::fs::read_to_string(&entry) else {
                    warn!(path = %entry.display(), "Unreadable project document, skipping");
                    continue;
                };
                let metadata = serde_json::json!({ "source": entry.to_string_lossy() });
                self.put_system(MemoryLayer::Project, &project.id, "document", &text, metadata)
                    .await?;
                seeded += 1;
            }
        }

        if seeded > 0 {
            info!(project = %project.id, seeded, "Seeded project documents into memory");
        }
        Ok(seeded)
    }

    pub(crate) fn state(&self) -> &StateManager {
        &self.state
    }
}
