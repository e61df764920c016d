//! Mission runs: status lifecycle, WSJF priority, resume cursor

use serde::{Deserialize, Serialize};

/// Mission run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    Queued,
    Running,
    Paused,
    Done,
    DoneWithIssues,
    Failed,
}

impl MissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissionStatus::Queued => "queued",
            MissionStatus::Running => "running",
            MissionStatus::Paused => "paused",
            MissionStatus::Done => "done",
            MissionStatus::DoneWithIssues => "done_with_issues",
            MissionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(MissionStatus::Queued),
            "running" => Some(MissionStatus::Running),
            "paused" => Some(MissionStatus::Paused),
            "done" => Some(MissionStatus::Done),
            "done_with_issues" => Some(MissionStatus::DoneWithIssues),
            "failed" => Some(MissionStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MissionStatus::Done | MissionStatus::DoneWithIssues | MissionStatus::Failed
        )
    }

    /// Statuses that must be re-admitted after a restart
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MissionStatus::Running | MissionStatus::Paused)
    }
}

impl std::fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// WSJF prioritization inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wsjf {
    pub business_value: i64,
    pub time_criticality: i64,
    pub risk_reduction: i64,
    pub job_duration: i64,
}

impl Wsjf {
    /// `(bv + tc + rr) / duration` scaled to milli-units; larger is earlier.
    /// Integer fixed-point keeps queue ordering deterministic.
    pub fn score_milli(&self) -> i64 {
        let cost_of_delay = self.business_value + self.time_criticality + self.risk_reduction;
        let duration = self.job_duration.max(1);
        cost_of_delay * 1000 / duration
    }
}

/// An admitted mission run (domain view over the stored row)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionRun {
    pub id: String,
    pub project_id: String,
    pub workflow_id: String,
    pub status: MissionStatus,
    pub wsjf: Wsjf,
    pub phase_index: usize,
    pub sprint: u32,
    pub created_at: i64,
}

impl MissionRun {
    pub fn from_row(row: &missionstore::MissionRow) -> Self {
        Self {
            id: row.id.clone(),
            project_id: row.project_id.clone(),
            workflow_id: row.workflow_id.clone(),
            status: MissionStatus::parse(&row.status).unwrap_or(MissionStatus::Failed),
            wsjf: Wsjf {
                business_value: row.business_value,
                time_criticality: row.time_criticality,
                risk_reduction: row.risk_reduction,
                job_duration: row.job_duration,
            },
            phase_index: row.phase_index.max(0) as usize,
            sprint: row.sprint.max(1) as u32,
            created_at: row.created_at,
        }
    }
}

/// Sprint lifecycle inside a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SprintStatus {
    Planning,
    Active,
    Review,
    Completed,
    Failed,
}

impl SprintStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SprintStatus::Planning => "planning",
            SprintStatus::Active => "active",
            SprintStatus::Review => "review",
            SprintStatus::Completed => "completed",
            SprintStatus::Failed => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            MissionStatus::Queued,
            MissionStatus::Running,
            MissionStatus::Paused,
            MissionStatus::Done,
            MissionStatus::DoneWithIssues,
            MissionStatus::Failed,
        ] {
            assert_eq!(MissionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(MissionStatus::parse("nope"), None);
    }

    #[test]
    fn test_terminal_and_recoverable() {
        assert!(MissionStatus::Done.is_terminal());
        assert!(MissionStatus::DoneWithIssues.is_terminal());
        assert!(!MissionStatus::Paused.is_terminal());
        assert!(MissionStatus::Running.is_recoverable());
        assert!(MissionStatus::Paused.is_recoverable());
        assert!(!MissionStatus::Queued.is_recoverable());
    }

    #[test]
    fn test_wsjf_ordering() {
        let urgent = Wsjf {
            business_value: 8,
            time_criticality: 9,
            risk_reduction: 3,
            job_duration: 2,
        };
        let slow = Wsjf {
            business_value: 9,
            time_criticality: 9,
            risk_reduction: 9,
            job_duration: 9,
        };
        assert!(urgent.score_milli() > slow.score_milli());
        assert_eq!(urgent.score_milli(), 10_000);
    }

    #[test]
    fn test_wsjf_zero_duration_does_not_divide_by_zero() {
        let wsjf = Wsjf {
            business_value: 1,
            time_criticality: 1,
            risk_reduction: 1,
            job_duration: 0,
        };
        assert_eq!(wsjf.score_milli(), 3000);
    }
}
