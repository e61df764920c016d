//! Memory entries: four-layer scoped storage with full-text search
//!
//! Entries live in exactly one layer. Ranking uses the FTS5 `bm25()` score;
//! ties break toward the more local layer (session beats pattern beats
//! project beats global). A damaged FTS index degrades to a regex linear
//! scan over the base table with the same ranking contract.

use regex::RegexBuilder;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Result, Store, StoreError, now_millis};

/// The four nested memory layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryLayer {
    Session,
    Pattern,
    Project,
    Global,
}

impl MemoryLayer {
    /// Tie-break rank: lower is more local and wins
    pub fn rank(&self) -> u8 {
        match self {
            MemoryLayer::Session => 0,
            MemoryLayer::Pattern => 1,
            MemoryLayer::Project => 2,
            MemoryLayer::Global => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryLayer::Session => "session",
            MemoryLayer::Pattern => "pattern",
            MemoryLayer::Project => "project",
            MemoryLayer::Global => "global",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "session" => Some(MemoryLayer::Session),
            "pattern" => Some(MemoryLayer::Pattern),
            "project" => Some(MemoryLayer::Project),
            "global" => Some(MemoryLayer::Global),
            _ => None,
        }
    }
}

impl std::fmt::Display for MemoryLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stored memory entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub layer: MemoryLayer,
    pub scope_id: String,
    pub category: String,
    pub body: String,
    pub metadata: serde_json::Value,
    pub created_at: i64,
}

/// Scope filter for a search: the allowed (layer, scope_id) pairs
///
/// The memory manager computes this set after applying permission and
/// isolation rules; the store only enforces what it is given.
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    pub scopes: Vec<(MemoryLayer, String)>,
    pub category: Option<String>,
    pub limit: usize,
}

/// How a search was actually served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    FullText,
    LinearScan,
}

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryEntry> {
    let layer: String = row.get("layer")?;
    let metadata: String = row.get("metadata")?;
    Ok(MemoryEntry {
        id: row.get("id")?,
        layer: MemoryLayer::parse(&layer).unwrap_or(MemoryLayer::Global),
        scope_id: row.get("scope_id")?,
        category: row.get("category")?,
        body: row.get("body")?,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        created_at: row.get("created_at")?,
    })
}

/// Build the `(layer, scope_id) IN (...)` clause and its parameters
fn scope_clause(scopes: &[(MemoryLayer, String)]) -> (String, Vec<String>) {
    let mut parts = Vec::with_capacity(scopes.len());
    let mut values = Vec::with_capacity(scopes.len() * 2);
    for (layer, scope_id) in scopes {
        parts.push("(m.layer = ? AND m.scope_id = ?)".to_string());
        values.push(layer.as_str().to_string());
        values.push(scope_id.clone());
    }
    (parts.join(" OR "), values)
}

/// Quote query terms so user text cannot inject FTS5 syntax
fn fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

impl Store {
    /// Insert a memory entry
    pub fn put_memory(&self, entry: &MemoryEntry) -> Result<()> {
        self.conn.execute(
            "INSERT INTO memory_entries (id, layer, scope_id, category, body, metadata, deleted, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
            params![
                entry.id,
                entry.layer.as_str(),
                entry.scope_id,
                entry.category,
                entry.body,
                entry.metadata.to_string(),
                entry.created_at,
            ],
        )?;
        Ok(())
    }

    /// Fetch a single entry by id (soft-deleted entries are invisible)
    pub fn get_memory(&self, id: &str) -> Result<Option<MemoryEntry>> {
        use rusqlite::OptionalExtension;
        self.conn
            .query_row(
                "SELECT * FROM memory_entries m WHERE id = ?1 AND deleted = 0",
                params![id],
                entry_from_row,
            )
            .optional()
            .map_err(StoreError::from)
    }

    /// Search allowed scopes for a query, ranked best-first
    ///
    /// Returns the results plus the mode that served them; callers emit a
    /// degraded-mode event when the index had to be bypassed, but never see
    /// an error from the fallback path.
    pub fn search_memory(&self, query: &str, filter: &MemoryQuery) -> Result<(Vec<MemoryEntry>, SearchMode)> {
        if filter.scopes.is_empty() || query.trim().is_empty() {
            return Ok((Vec::new(), SearchMode::FullText));
        }

        match self.search_memory_fts(query, filter) {
            Ok(entries) => Ok((entries, SearchMode::FullText)),
            Err(e) => {
                warn!(error = %e, "Memory FTS search failed, falling back to linear scan");
                let entries = self.search_memory_linear(query, filter)?;
                Ok((entries, SearchMode::LinearScan))
            }
        }
    }

    fn search_memory_fts(&self, query: &str, filter: &MemoryQuery) -> Result<Vec<MemoryEntry>> {
        let (clause, scope_values) = scope_clause(&filter.scopes);
        let mut sql = format!(
            "SELECT m.*, bm25(memory_fts) AS score, \
             CASE m.layer WHEN 'session' THEN 0 WHEN 'pattern' THEN 1 WHEN 'project' THEN 2 ELSE 3 END AS layer_rank \
             FROM memory_fts f JOIN memory_entries m ON m.rowid = f.rowid \
             WHERE memory_fts MATCH ? AND m.deleted = 0 AND ({clause})"
        );
        let mut values: Vec<String> = vec![fts_query(query)];
        values.extend(scope_values);
        if let Some(category) = &filter.category {
            sql.push_str(" AND m.category = ?");
            values.push(category.clone());
        }
        sql.push_str(&format!(
            " ORDER BY score ASC, layer_rank ASC, m.created_at DESC LIMIT {}",
            filter.limit.max(1)
        ));

        let mut stmt = self.conn.prepare(&sql)?;
        let iter = stmt.query_map(rusqlite::params_from_iter(values.iter()), entry_from_row)?;
        let mut entries = Vec::new();
        for row in iter {
            entries.push(row?);
        }
        Ok(entries)
    }

    fn search_memory_linear(&self, query: &str, filter: &MemoryQuery) -> Result<Vec<MemoryEntry>> {
        let (clause, scope_values) = scope_clause(&filter.scopes);
        let mut sql = format!("SELECT m.* FROM memory_entries m WHERE m.deleted = 0 AND ({clause})");
        let mut values = scope_values;
        if let Some(category) = &filter.category {
            sql.push_str(" AND m.category = ?");
            values.push(category.clone());
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let iter = stmt.query_map(rusqlite::params_from_iter(values.iter()), entry_from_row)?;

        let terms: Vec<regex::Regex> = query
            .split_whitespace()
            .filter_map(|t| {
                RegexBuilder::new(&regex::escape(t))
                    .case_insensitive(true)
                    .build()
                    .ok()
            })
            .collect();

        let mut scored: Vec<(usize, MemoryEntry)> = Vec::new();
        for row in iter {
            let entry = row?;
            let hits: usize = terms.iter().map(|re| re.find_iter(&entry.body).count()).sum();
            if hits > 0 {
                scored.push((hits, entry));
            }
        }
        // More hits first, then the more local layer, then recency
        scored.sort_by(|(ha, a), (hb, b)| {
            hb.cmp(ha)
                .then(a.layer.rank().cmp(&b.layer.rank()))
                .then(b.created_at.cmp(&a.created_at))
        });
        scored.truncate(filter.limit.max(1));
        Ok(scored.into_iter().map(|(_, e)| e).collect())
    }

    /// List entries in one scope (for context injection), newest first
    pub fn list_memory_scope(
        &self,
        layer: MemoryLayer,
        scope_id: &str,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        let mut sql = "SELECT * FROM memory_entries m WHERE layer = ?1 AND scope_id = ?2 AND deleted = 0".to_string();
        let mut values: Vec<String> = vec![layer.as_str().to_string(), scope_id.to_string()];
        if let Some(category) = category {
            sql.push_str(" AND category = ?3");
            values.push(category.to_string());
        }
        sql.push_str(&format!(" ORDER BY created_at DESC LIMIT {}", limit.max(1)));

        let mut stmt = self.conn.prepare(&sql)?;
        let iter = stmt.query_map(rusqlite::params_from_iter(values.iter()), entry_from_row)?;
        let mut entries = Vec::new();
        for row in iter {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Soft-delete every entry in a scope; session and pattern layers expire
    /// through this when their run ends
    pub fn expire_memory_scope(&self, layer: MemoryLayer, scope_id: &str) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE memory_entries SET deleted = 1 WHERE layer = ?1 AND scope_id = ?2 AND deleted = 0",
            params![layer.as_str(), scope_id],
        )?;
        Ok(changed)
    }
}

/// Convenience constructor used by the manager and tests
impl MemoryEntry {
    pub fn new(
        layer: MemoryLayer,
        scope_id: impl Into<String>,
        category: impl Into<String>,
        body: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            layer,
            scope_id: scope_id.into(),
            category: category.into(),
            body: body.into(),
            metadata,
            created_at: now_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(store: &Store, layer: MemoryLayer, scope: &str, body: &str) -> String {
        let entry = MemoryEntry::new(layer, scope, "lesson", body, serde_json::json!({}));
        let id = entry.id.clone();
        store.put_memory(&entry).unwrap();
        id
    }

    fn all_scopes() -> Vec<(MemoryLayer, String)> {
        vec![
            (MemoryLayer::Session, "sess-1".into()),
            (MemoryLayer::Pattern, "pat-1".into()),
            (MemoryLayer::Project, "proj-1".into()),
            (MemoryLayer::Global, "global".into()),
        ]
    }

    #[test]
    fn test_put_and_search_round_trip() {
        let store = Store::open_in_memory().unwrap();
        put(&store, MemoryLayer::Project, "proj-1", "retrospective: tighten the velocity estimates");

        let (results, mode) = store
            .search_memory(
                "velocity",
                &MemoryQuery {
                    scopes: vec![(MemoryLayer::Project, "proj-1".into())],
                    category: None,
                    limit: 20,
                },
            )
            .unwrap();
        assert_eq!(mode, SearchMode::FullText);
        assert_eq!(results.len(), 1);
        assert!(results[0].body.contains("velocity"));
    }

    #[test]
    fn test_scope_filter_excludes_other_scopes() {
        let store = Store::open_in_memory().unwrap();
        put(&store, MemoryLayer::Pattern, "pat-1", "secret deliberation about the verdict");
        put(&store, MemoryLayer::Project, "proj-1", "verdict conventions for this project");

        // A viewer without the pattern scope must not see pattern entries
        let (results, _) = store
            .search_memory(
                "verdict",
                &MemoryQuery {
                    scopes: vec![(MemoryLayer::Project, "proj-1".into())],
                    category: None,
                    limit: 20,
                },
            )
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].layer, MemoryLayer::Project);
    }

    #[test]
    fn test_local_layer_wins_ties() {
        let store = Store::open_in_memory().unwrap();
        put(&store, MemoryLayer::Global, "global", "deployment checklist");
        put(&store, MemoryLayer::Session, "sess-1", "deployment checklist");

        let (results, _) = store
            .search_memory(
                "deployment checklist",
                &MemoryQuery {
                    scopes: all_scopes(),
                    category: None,
                    limit: 20,
                },
            )
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].layer, MemoryLayer::Session);
    }

    #[test]
    fn test_expire_scope_hides_entries() {
        let store = Store::open_in_memory().unwrap();
        let id = put(&store, MemoryLayer::Session, "sess-1", "short lived note");

        let expired = store.expire_memory_scope(MemoryLayer::Session, "sess-1").unwrap();
        assert_eq!(expired, 1);
        assert!(store.get_memory(&id).unwrap().is_none());

        let (results, _) = store
            .search_memory(
                "note",
                &MemoryQuery {
                    scopes: vec![(MemoryLayer::Session, "sess-1".into())],
                    category: None,
                    limit: 20,
                },
            )
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_linear_scan_matches_fts_contract() {
        let store = Store::open_in_memory().unwrap();
        put(&store, MemoryLayer::Project, "proj-1", "retry budget exhausted twice");
        put(&store, MemoryLayer::Global, "global", "retry with backoff on transient faults");

        let filter = MemoryQuery {
            scopes: all_scopes(),
            category: None,
            limit: 20,
        };
        let linear = store.search_memory_linear("retry", &filter).unwrap();
        assert_eq!(linear.len(), 2);
        // Single hit each: project layer outranks global
        assert_eq!(linear[0].layer, MemoryLayer::Project);
    }

    #[test]
    fn test_fts_query_quoting() {
        assert_eq!(fts_query("hello world"), "\"hello\" OR \"world\"");
        // FTS operators are neutralized by quoting
        assert_eq!(fts_query("a AND b"), "\"a\" OR \"AND\" OR \"b\"");
    }

    #[test]
    fn test_category_filter() {
        let store = Store::open_in_memory().unwrap();
        let lesson = MemoryEntry::new(
            MemoryLayer::Project,
            "proj-1",
            "retro",
            "sprint went long",
            serde_json::json!({}),
        );
        store.put_memory(&lesson).unwrap();

        let (hits, _) = store
            .search_memory(
                "sprint",
                &MemoryQuery {
                    scopes: vec![(MemoryLayer::Project, "proj-1".into())],
                    category: Some("retro".into()),
                    limit: 5,
                },
            )
            .unwrap();
        assert_eq!(hits.len(), 1);

        let (misses, _) = store
            .search_memory(
                "sprint",
                &MemoryQuery {
                    scopes: vec![(MemoryLayer::Project, "proj-1".into())],
                    category: Some("vision".into()),
                    limit: 5,
                },
            )
            .unwrap();
        assert!(misses.is_empty());
    }
}
