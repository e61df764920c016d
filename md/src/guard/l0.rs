//! L0 - deterministic, zero-LLM scoring
//!
//! Each catalogue family contributes a weight per hit. score < 5 passes,
//! 5..7 is a soft pass with warnings attached, >= 7 or any always-reject
//! family rejects outright.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::config::GuardConfig;

/// Catalogue families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    Slop,
    Mock,
    FakeBuild,
    Hallucination,
    Lie,
    StackMismatch,
    ThinOutput,
}

impl Family {
    /// Score added per hit
    pub fn weight(&self) -> u32 {
        match self {
            Family::Slop | Family::Mock => 3,
            Family::FakeBuild | Family::Hallucination | Family::Lie | Family::StackMismatch => 7,
            Family::ThinOutput => 2,
        }
    }

    /// Families whose presence rejects regardless of the total score.
    /// Slop rejects only by scale, which [`DeterministicGuard`] handles
    /// separately.
    pub fn always_rejects(&self) -> bool {
        matches!(
            self,
            Family::Hallucination | Family::StackMismatch | Family::FakeBuild
        )
    }
}

/// One catalogue hit with its evidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyHit {
    pub family: Family,
    pub evidence: String,
}

/// The decision for a turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardDecision {
    Pass,
    /// Warning attached, no retry
    SoftPass,
    Reject,
}

/// Full L0 report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardReport {
    pub decision: GuardDecision,
    pub score: u32,
    pub hits: Vec<FamilyHit>,
}

impl GuardReport {
    pub fn rejected(&self) -> bool {
        self.decision == GuardDecision::Reject
    }
}

/// What the guard sees of one agent turn
#[derive(Debug, Clone, Default)]
pub struct TurnView {
    pub output: String,
    /// Prompt the turn answered, for echo detection
    pub prompt: String,
    /// Names of tools actually executed this turn
    pub tools_used: Vec<String>,
    pub round_cap_reached: bool,
    /// Technology declared by the current phase
    pub technology: String,
    /// Working tree root for existence checks; empty disables the Lie family
    pub worktree: Option<std::path::PathBuf>,
}

static SLOP_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ["lorem ipsum", r"\bplaceholder\b", r"\bTBD\b", r"\bXXX\b"]
        .iter()
        .map(|p| RegexBuilder::new(p).case_insensitive(true).build().unwrap())
        .collect()
});

static MOCK_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)TODO:? implement",
        r"NotImplementedError",
        r"unimplemented!\(\)",
        r"todo!\(\)",
        r"(?i)\bstub(bed)? (out|implementation)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static BUILD_CLAIM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)BUILD SUCCESS(FUL)?|compilation succeeded").unwrap());

static ACTION_CLAIMS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (Regex::new(r"(?i)\bI (ran|executed|invoked) the\b").unwrap(), "claims a tool execution"),
        (Regex::new(r"(?i)\bI (created|wrote|updated|edited) the file\b").unwrap(), "claims a file write"),
        (Regex::new(r"(?i)\ball tests pass(ed)?\b").unwrap(), "claims a test run"),
        (Regex::new(r"(?i)\bI deployed\b").unwrap(), "claims a deploy"),
    ]
});

/// File-path looking tokens referenced in output
static PATH_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[\w./-]+/[\w.-]+\.(rs|kt|java|ts|js|py|go|md|toml|yml|yaml|json|xml)\b").unwrap());

/// Platform markers that clash with a declared stack
fn foreign_stack_markers(technology: &str) -> &'static [&'static str] {
    if technology.starts_with("android") {
        &["SwiftUI", "xcodebuild", "Info.plist", "ng build", "angular.json"]
    } else if technology.starts_with("angular") || technology.starts_with("react") {
        &["gradlew", "AndroidManifest.xml", "xcodebuild", "SwiftUI"]
    } else if technology.starts_with("ios") {
        &["gradlew", "AndroidManifest.xml", "ng build"]
    } else {
        &[]
    }
}

/// Slop hit count at or past which scale alone rejects
const SLOP_REJECT_SCALE: usize = 3;

/// The L0 guard
pub struct DeterministicGuard {
    min_output_chars: usize,
}

impl DeterministicGuard {
    pub fn new(config: &GuardConfig) -> Self {
        Self {
            min_output_chars: config.min_output_chars,
        }
    }

    /// Score one turn
    pub fn evaluate(&self, turn: &TurnView) -> GuardReport {
        let mut hits = Vec::new();
        let output = turn.output.as_str();

        let mut slop_hits = 0;
        for pattern in SLOP_PATTERNS.iter() {
            for found in pattern.find_iter(output) {
                slop_hits += 1;
                hits.push(FamilyHit {
                    family: Family::Slop,
                    evidence: found.as_str().to_string(),
                });
            }
        }

        for pattern in MOCK_PATTERNS.iter() {
            if let Some(found) = pattern.find(output) {
                hits.push(FamilyHit {
                    family: Family::Mock,
                    evidence: found.as_str().to_string(),
                });
            }
        }

        // A build-success claim with no build tool in the turn is fabricated
        let ran_build = turn.tools_used.iter().any(|t| t.starts_with("build") || t == "run_command");
        if BUILD_CLAIM.is_match(output) && !ran_build {
            hits.push(FamilyHit {
                family: Family::FakeBuild,
                evidence: "build success claimed without a build tool call".to_string(),
            });
        }

        // Action claims with no tool call at all this turn
        if turn.tools_used.is_empty() {
            for (pattern, label) in ACTION_CLAIMS.iter() {
                if pattern.is_match(output) {
                    hits.push(FamilyHit {
                        family: Family::Hallucination,
                        evidence: format!("{} but no tool was called", label),
                    });
                    break;
                }
            }
        }

        // Referenced files absent from the working tree
        if let Some(worktree) = &turn.worktree {
            for token in PATH_TOKEN.find_iter(output).take(20) {
                let path = token.as_str().trim_start_matches("./");
                if !worktree.join(path).exists() {
                    hits.push(FamilyHit {
                        family: Family::Lie,
                        evidence: format!("references {} which does not exist", path),
                    });
                    break;
                }
            }
        }

        for marker in foreign_stack_markers(&turn.technology) {
            if output.contains(marker) {
                hits.push(FamilyHit {
                    family: Family::StackMismatch,
                    evidence: format!("{} does not belong to the {} stack", marker, turn.technology),
                });
                break;
            }
        }

        if output.trim().len() < self.min_output_chars {
            hits.push(FamilyHit {
                family: Family::ThinOutput,
                evidence: format!("output below {} chars", self.min_output_chars),
            });
        } else if is_echo(&turn.prompt, output) {
            hits.push(FamilyHit {
                family: Family::ThinOutput,
                evidence: "output mirrors the prompt".to_string(),
            });
        } else if is_repetitive(output) {
            hits.push(FamilyHit {
                family: Family::ThinOutput,
                evidence: "output repeats itself".to_string(),
            });
        }

        let score: u32 = hits.iter().map(|h| h.family.weight()).sum();
        let always_reject =
            hits.iter().any(|h| h.family.always_rejects()) || slop_hits >= SLOP_REJECT_SCALE;

        let decision = if always_reject || score >= 7 {
            GuardDecision::Reject
        } else if score >= 5 {
            GuardDecision::SoftPass
        } else {
            GuardDecision::Pass
        };

        GuardReport { decision, score, hits }
    }
}

/// Output that is mostly a copy of the prompt
fn is_echo(prompt: &str, output: &str) -> bool {
    if prompt.len() < 80 || output.len() < 80 {
        return false;
    }
    let head: String = prompt.chars().take(200).collect();
    output.contains(head.trim())
}

/// More than half of the non-trivial lines are duplicates
fn is_repetitive(output: &str) -> bool {
    let lines: Vec<&str> = output.lines().map(str::trim).filter(|l| l.len() > 10).collect();
    if lines.len() < 6 {
        return false;
    }
    let unique: std::collections::HashSet<&&str> = lines.iter().collect();
    unique.len() * 2 < lines.len()
}
