//! L1 - semantic review, one LLM call
//!
//! Only execution-flavored patterns pay for this; discussion patterns skip
//! it. The reviewer is a fresh viewer with no pattern-memory access, so the
//! verdict is not anchored on the team's own notes.

use std::sync::Arc;

use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::GuardConfig;
use crate::domain::PatternType;
use crate::llm::{CallContext, CompletionRequest, LlmGateway, Message};

/// L1 verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticVerdict {
    Pass,
    Reject { reason: String },
}

impl SemanticVerdict {
    pub fn rejected(&self) -> bool {
        matches!(self, SemanticVerdict::Reject { .. })
    }
}

const REVIEW_TEMPLATE: &str = "\
You are a strict independent reviewer. Judge whether the following agent \
output genuinely accomplishes its task. Reject fabricated results, vague \
deflection, and work that claims completion without substance.\n\n\
## Task\n{{task}}\n\n## Output under review\n{{output}}\n\n\
Answer with exactly one line: either PASS or REJECT: <short reason>.";

/// The semantic reviewer
pub struct SemanticReviewer {
    gateway: Arc<LlmGateway>,
    enabled: bool,
}

impl SemanticReviewer {
    pub fn new(gateway: Arc<LlmGateway>, config: &GuardConfig) -> Self {
        Self {
            gateway,
            enabled: config.l1_enabled,
        }
    }

    /// Whether L1 applies to a pattern at all
    pub fn applies_to(&self, pattern_type: PatternType) -> bool {
        self.enabled && pattern_type.is_execution_flavored()
    }

    /// Review one turn; None when L1 does not apply
    pub async fn review(
        &self,
        pattern_type: PatternType,
        task: &str,
        output: &str,
        context: &CallContext,
    ) -> Option<SemanticVerdict> {
        if !self.applies_to(pattern_type) {
            debug!(pattern = %pattern_type, "L1 skipped");
            return None;
        }

        let handlebars = Handlebars::new();
        let prompt = handlebars
            .render_template(REVIEW_TEMPLATE, &serde_json::json!({ "task": task, "output": output }))
            .unwrap_or_default();

        let request = CompletionRequest {
            system_prompt: "You review agent work for substance. One line verdicts only.".to_string(),
            messages: vec![Message::user(prompt)],
            tools: vec![],
            max_tokens: 200,
        };

        let reviewer_context = CallContext {
            agent_id: "l1-reviewer".to_string(),
            mission_id: context.mission_id.clone(),
            phase: context.phase.clone(),
        };

        match self.gateway.call(&reviewer_context, "light-reasoning", None, &request).await {
            Ok(result) => {
                let text = result.response.content.unwrap_or_default();
                Some(parse_verdict(&text))
            }
            Err(e) => {
                // A broken reviewer never blocks the pattern
                warn!(error = %e, "L1 review call failed, treating as pass");
                Some(SemanticVerdict::Pass)
            }
        }
    }
}

fn parse_verdict(text: &str) -> SemanticVerdict {
    let trimmed = text.trim();
    for line in trimmed.lines() {
        let line = line.trim();
        if let Some(reason) = line.strip_prefix("REJECT") {
            let reason = reason.trim_start_matches(':').trim();
            return SemanticVerdict::Reject {
                reason: if reason.is_empty() {
                    "no reason given".to_string()
                } else {
                    reason.to_string()
                },
            };
        }
        if line.starts_with("PASS") {
            return SemanticVerdict::Pass;
        }
    }
    // An unparseable verdict is a pass; the deterministic layer already ran
    SemanticVerdict::Pass
}
