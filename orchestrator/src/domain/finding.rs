//! Append-only progress and finding events, plus the "latest per agent"
//! materialization the state store keeps for fast status queries.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use store::{IndexValue, Record, now_ms};

use super::agent::AgentStatus;

/// One line of an agent's progress JSONL, mirrored here so the audit trail
/// and the queryable row agree on shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub timestamp: i64,
    pub agent_id: String,
    pub status: String,
    pub message: String,
    pub progress: u8,
}

/// The latest progress row per agent; upserted on every `record_progress`
/// call so point-in-time aggregates don't need to scan the JSONL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProgressLatest {
    pub agent_id: String,
    pub task_id: String,
    pub status: AgentStatus,
    pub message: String,
    pub progress: u8,
    pub updated_at: i64,
}

impl Record for AgentProgressLatest {
    fn id(&self) -> &str {
        &self.agent_id
    }
    fn updated_at(&self) -> i64 {
        self.updated_at
    }
    fn collection_name() -> &'static str {
        "agent_progress_latest"
    }
    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut m = HashMap::new();
        m.insert("task_id".to_string(), IndexValue::String(self.task_id.clone()));
        m
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingType {
    Issue,
    Solution,
    Insight,
    Recommendation,
    Blocker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn is_priority(&self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub task_id: String,
    pub agent_id: String,
    pub phase_index: i64,
    pub finding_type: FindingType,
    pub severity: Severity,
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub timestamp: i64,
}

impl Finding {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_id: String,
        agent_id: String,
        phase_index: i64,
        finding_type: FindingType,
        severity: Severity,
        message: String,
        data: Option<serde_json::Value>,
    ) -> Self {
        let now = now_ms();
        Self {
            id: format!("{agent_id}-{now}-{}", uuid::Uuid::now_v7().simple()),
            task_id,
            agent_id,
            phase_index,
            finding_type,
            severity,
            message,
            data,
            timestamp: now,
        }
    }
}

impl Record for Finding {
    fn id(&self) -> &str {
        &self.id
    }
    fn updated_at(&self) -> i64 {
        self.timestamp
    }
    fn collection_name() -> &'static str {
        "agent_findings"
    }
    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut m = HashMap::new();
        m.insert("task_id".to_string(), IndexValue::String(self.task_id.clone()));
        m.insert("agent_id".to_string(), IndexValue::String(self.agent_id.clone()));
        m.insert("phase_index".to_string(), IndexValue::Int(self.phase_index));
        m.insert("severity".to_string(), IndexValue::String(format!("{:?}", self.severity)));
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_and_high_are_priority() {
        assert!(Severity::Critical.is_priority());
        assert!(Severity::High.is_priority());
        assert!(!Severity::Medium.is_priority());
        assert!(!Severity::Low.is_priority());
    }
}
