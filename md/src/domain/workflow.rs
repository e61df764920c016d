//! Workflow templates: ordered phase specs with gates and failure policies

use serde::{Deserialize, Serialize};

/// Gate predicate evaluated at the phase boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePredicate {
    /// Every non-adversarial node completed; adversarial nodes did not reject
    AllApproved,
    /// No node ended vetoed
    NoVeto,
    /// Phase always passes; failures become annotations
    Always,
    /// Phase stays open until a human approval event
    Checkpoint,
}

/// What to do when a phase fails its gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Re-run the pattern with the previous sprint's memory appended
    Retry,
    /// Advance, mission ends done_with_issues
    Skip,
    /// Terminate the mission as failed
    Abort,
    /// Pause and wait for a human decision
    HumanDecide,
}

/// One phase of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseSpec {
    pub name: String,
    /// Pattern this phase runs, by id
    pub pattern: String,
    pub gate: GatePredicate,
    /// Phase classification for fitness keys ("dev", "review", "plan", ...)
    #[serde(rename = "phase-type", default = "default_phase_type")]
    pub phase_type: String,
    /// Technology context for selection ("angular_19", "generic", ...)
    #[serde(default = "default_technology")]
    pub technology: String,
    /// Sprint bound; 0 means "use the default for the phase type"
    #[serde(rename = "max-sprints", default)]
    pub max_sprints: u32,
    #[serde(rename = "failure-policy", default = "default_failure_policy")]
    pub failure_policy: FailurePolicy,
}

fn default_phase_type() -> String {
    "dev".to_string()
}

fn default_technology() -> String {
    "generic".to_string()
}

fn default_failure_policy() -> FailurePolicy {
    FailurePolicy::Retry
}

impl PhaseSpec {
    /// Dev phases iterate, everything else gets one sprint by default
    pub fn effective_max_sprints(&self, dev_default: u32) -> u32 {
        if self.max_sprints > 0 {
            return self.max_sprints;
        }
        if self.is_dev() { dev_default } else { 1 }
    }

    pub fn is_dev(&self) -> bool {
        self.phase_type == "dev"
    }
}

/// An ordered workflow of phases
///
/// Missions pin the template at admission; later edits never alter an
/// in-flight run (the orchestrator keeps its own clone).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: String,
    pub name: String,
    pub phases: Vec<PhaseSpec>,
}

impl WorkflowTemplate {
    pub fn phase(&self, index: usize) -> Option<&PhaseSpec> {
        self.phases.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_max_sprints() {
        let dev = PhaseSpec {
            name: "implement".into(),
            pattern: "dev-loop".into(),
            gate: GatePredicate::NoVeto,
            phase_type: "dev".into(),
            technology: "generic".into(),
            max_sprints: 0,
            failure_policy: FailurePolicy::Retry,
        };
        assert_eq!(dev.effective_max_sprints(5), 5);

        let review = PhaseSpec {
            phase_type: "review".into(),
            ..dev.clone()
        };
        assert_eq!(review.effective_max_sprints(5), 1);

        let pinned = PhaseSpec { max_sprints: 3, ..dev };
        assert_eq!(pinned.effective_max_sprints(5), 3);
    }

    #[test]
    fn test_deserialize_workflow() {
        let yaml = r#"
id: wf-standard
name: Standard delivery
phases:
  - name: plan
    pattern: plan-solo
    gate: all_approved
    phase-type: plan
  - name: implement
    pattern: dev-sequential
    gate: no_veto
    phase-type: dev
    max-sprints: 4
    failure-policy: retry
  - name: release-gate
    pattern: release-review
    gate: checkpoint
    failure-policy: human_decide
"#;
        let wf: WorkflowTemplate = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(wf.phases.len(), 3);
        assert_eq!(wf.phases[0].gate, GatePredicate::AllApproved);
        assert_eq!(wf.phases[1].max_sprints, 4);
        assert_eq!(wf.phases[2].failure_policy, FailurePolicy::HumanDecide);
    }
}
