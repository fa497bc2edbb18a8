//! Review subsystem domain types: a review owns per-reviewer verdicts and
//! aggregates them to a final outcome.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use store::{IndexValue, Record, now_ms};

use super::finding::{Finding, Severity};
use super::ids::generate_review_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    InProgress,
    Completed,
    Aborted,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictValue {
    Approved,
    Rejected,
    NeedsRevision,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub review_id: String,
    pub reviewer_agent_id: String,
    pub verdict: VerdictValue,
    pub findings: Vec<Finding>,
    pub notes: String,
    pub submitted_at: i64,
}

/// Freeform synthesis a reviewer may attach alongside its verdict; optional,
/// distinct from the structured findings list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Critique {
    pub review_id: String,
    pub reviewer_agent_id: String,
    pub text: String,
    pub submitted_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub id: String,
    pub task_id: String,
    pub phase_index: i64,
    pub status: ReviewStatus,
    pub final_verdict: Option<VerdictValue>,
    pub num_reviewers: u32,
    pub auto_spawned: bool,
    pub reviewer_agent_ids: Vec<String>,
    pub verdicts: Vec<Verdict>,
    pub critiques: Vec<Critique>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl Review {
    pub fn new(task_id: String, phase_index: i64, num_reviewers: u32, auto_spawned: bool, reviewer_agent_ids: Vec<String>) -> Self {
        let now = now_ms();
        Self {
            id: generate_review_id(),
            task_id,
            phase_index,
            status: ReviewStatus::InProgress,
            final_verdict: None,
            num_reviewers,
            auto_spawned,
            reviewer_agent_ids,
            verdicts: Vec::new(),
            critiques: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// True once every expected reviewer has submitted a verdict.
    pub fn all_submitted(&self) -> bool {
        self.verdicts.len() as u32 >= self.num_reviewers
    }

    /// Aggregation rule (§4.3): any rejection wins outright; any
    /// needs-revision (absent a rejection) is treated as a rejection for
    /// phase-advancement purposes; unanimous approval is the only path to
    /// `Approved`.
    pub fn aggregate(&self) -> VerdictValue {
        if self.verdicts.iter().any(|v| v.verdict == VerdictValue::Rejected) {
            VerdictValue::Rejected
        } else if self.verdicts.iter().any(|v| v.verdict == VerdictValue::NeedsRevision) {
            VerdictValue::Rejected
        } else {
            VerdictValue::Approved
        }
    }

    /// Findings worth surfacing to the next round of agents: blockers, or
    /// critical/high severity, drawn from every submitted verdict.
    pub fn rejection_findings(&self) -> Vec<&Finding> {
        self.verdicts
            .iter()
            .flat_map(|v| v.findings.iter())
            .filter(|f| f.severity.is_priority() || matches!(f.finding_type, super::finding::FindingType::Blocker))
            .collect()
    }
}

impl Record for Review {
    fn id(&self) -> &str {
        &self.id
    }
    fn updated_at(&self) -> i64 {
        self.updated_at
    }
    fn collection_name() -> &'static str {
        "reviews"
    }
    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut m = HashMap::new();
        m.insert("task_id".to_string(), IndexValue::String(self.task_id.clone()));
        m.insert("phase_index".to_string(), IndexValue::Int(self.phase_index));
        m.insert("status".to_string(), IndexValue::String(format!("{:?}", self.status)));
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::finding::FindingType;

    fn verdict(v: VerdictValue) -> Verdict {
        Verdict {
            review_id: "r1".into(),
            reviewer_agent_id: "reviewer-1".into(),
            verdict: v,
            findings: Vec::new(),
            notes: String::new(),
            submitted_at: now_ms(),
        }
    }

    #[test]
    fn unanimous_approval_approves() {
        let mut r = Review::new("TASK-1".into(), 0, 2, true, vec!["reviewer-1".into(), "reviewer-2".into()]);
        r.verdicts.push(verdict(VerdictValue::Approved));
        r.verdicts.push(verdict(VerdictValue::Approved));
        assert_eq!(r.aggregate(), VerdictValue::Approved);
    }

    #[test]
    fn any_rejection_rejects() {
        let mut r = Review::new("TASK-1".into(), 0, 2, true, vec!["reviewer-1".into(), "reviewer-2".into()]);
        r.verdicts.push(verdict(VerdictValue::Approved));
        r.verdicts.push(verdict(VerdictValue::Rejected));
        assert_eq!(r.aggregate(), VerdictValue::Rejected);
    }

    #[test]
    fn needs_revision_counts_as_rejection() {
        let mut r = Review::new("TASK-1".into(), 0, 2, true, vec!["reviewer-1".into(), "reviewer-2".into()]);
        r.verdicts.push(verdict(VerdictValue::Approved));
        r.verdicts.push(verdict(VerdictValue::NeedsRevision));
        assert_eq!(r.aggregate(), VerdictValue::Rejected);
    }

    #[test]
    fn all_submitted_requires_every_reviewer() {
        let mut r = Review::new("TASK-1".into(), 0, 2, true, vec!["reviewer-1".into(), "reviewer-2".into()]);
        assert!(!r.all_submitted());
        r.verdicts.push(verdict(VerdictValue::Approved));
        assert!(!r.all_submitted());
        r.verdicts.push(verdict(VerdictValue::Approved));
        assert!(r.all_submitted());
    }

    #[test]
    fn rejection_findings_filters_by_severity_and_blocker_type() {
        let mut r = Review::new("TASK-1".into(), 0, 1, true, vec!["reviewer-1".into()]);
        let mut v = verdict(VerdictValue::Rejected);
        v.findings.push(Finding::new(
            "TASK-1".into(),
            "reviewer-1".into(),
            0,
            FindingType::Blocker,
            Severity::Medium,
            "tests fail".into(),
            None,
        ));
        v.findings.push(Finding::new(
            "TASK-1".into(),
            "reviewer-1".into(),
            0,
            FindingType::Insight,
            Severity::Low,
            "nit".into(),
            None,
        ));
        r.verdicts.push(v);
        let surfaced = r.rejection_findings();
        assert_eq!(surfaced.len(), 1);
        assert_eq!(surfaced[0].message, "tests fail");
    }
}
