//! Context injection: the bounded prompt fragment fed into each agent turn
//!
//! Budget: vision excerpt ≤ 3000 chars, prior sprint retros ≤ 2000 chars,
//! top-k global lessons ≤ 3000 chars, whole fragment ≤ 8000 chars.

use handlebars::Handlebars;
use tracing::debug;

use missionstore::MemoryLayer;

use super::manager::{MemoryError, MemoryManager, MemoryScopes};

/// Character budgets for the fragment sections
#[derive(Debug, Clone, Copy)]
pub struct ContextBudget {
    pub vision: usize,
    pub retros: usize,
    pub lessons: usize,
    pub total: usize,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            vision: 3000,
            retros: 2000,
            lessons: 3000,
            total: 8000,
        }
    }
}

const FRAGMENT_TEMPLATE: &str = "\
{{#if vision}}## Project vision\n{{vision}}\n\n{{/if}}\
{{#if retros}}## Prior sprint retrospectives\n{{retros}}\n\n{{/if}}\
{{#if lessons}}## Lessons\n{{lessons}}\n{{/if}}";

/// Truncate on a char boundary without splitting a code point
fn clip(text: &str, budget: usize) -> String {
    if text.len() <= budget {
        return text.to_string();
    }
    let mut end = budget;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

impl MemoryManager {
    /// Build the bounded context fragment for an agent turn
    ///
    /// `phase` scopes the retro lookup; retros of other phases still rank
    /// because the project layer is shared, but the freshest come first.
    pub async fn inject_context(
        &self,
        project_id: &str,
        phase: &str,
        _sprint: u32,
        budget: ContextBudget,
    ) -> Result<String, MemoryError> {
        let vision_entries = self
            .state()
            .list_memory_scope(MemoryLayer::Project, project_id, Some("document"), 2)
            .await?;
        let vision = vision_entries
            .iter()
            .map(|e| e.body.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let retro_entries = self
            .state()
            .list_memory_scope(MemoryLayer::Project, project_id, Some("retro"), 5)
            .await?;
        let retros = retro_entries
            .iter()
            .map(|e| format!("- {}", e.body))
            .collect::<Vec<_>>()
            .join("\n");

        let lesson_entries = self
            .search(
                None,
                phase,
                &[MemoryLayer::Global],
                &MemoryScopes {
                    project_id: Some(project_id.to_string()),
                    ..Default::default()
                },
                5,
            )
            .await?;
        let lessons = lesson_entries
            .iter()
            .map(|e| format!("- {}", e.body))
            .collect::<Vec<_>>()
            .join("\n");

        let fragment = build_context_fragment(&vision, &retros, &lessons, budget);
        debug!(project_id, phase, chars = fragment.len(), "Context fragment built");
        Ok(fragment)
    }
}

/// Render the fragment under its budgets; total never exceeds `budget.total`
pub fn build_context_fragment(vision: &str, retros: &str, lessons: &str, budget: ContextBudget) -> String {
    let handlebars = Handlebars::new();
    let data = serde_json::json!({
        "vision": clip(vision.trim(), budget.vision),
        "retros": clip(retros.trim(), budget.retros),
        "lessons": clip(lessons.trim(), budget.lessons),
    });

    let rendered = handlebars
        .render_template(FRAGMENT_TEMPLATE, &data)
        .unwrap_or_default();
    clip(&rendered, budget.total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_sections_render_nothing() {
        let fragment = build_context_fragment("", "", "", ContextBudget::default());
        assert!(fragment.is_empty());
    }

    #[test]
    fn test_sections_have_headers() {
        let fragment = build_context_fragment(
            "Build a reliable checkout",
            "- sprint 1 ran long",
            "- keep migrations reversible",
            ContextBudget::default(),
        );
        assert!(fragment.contains("## Project vision"));
        assert!(fragment.contains("## Prior sprint retrospectives"));
        assert!(fragment.contains("## Lessons"));
    }

    #[test]
    fn test_section_budgets_enforced() {
        let long = "x".repeat(10_000);
        let fragment = build_context_fragment(&long, &long, &long, ContextBudget::default());
        assert!(fragment.len() <= 8000 + '…'.len_utf8());
    }

    #[test]
    fn test_clip_respects_char_boundaries() {
        let text = "héllo wörld".repeat(100);
        let clipped = clip(&text, 37);
        assert!(clipped.len() <= 37 + '…'.len_utf8());
        // Must not panic and must be valid UTF-8 by construction
        assert!(clipped.ends_with('…'));
    }
}
