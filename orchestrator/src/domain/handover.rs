//! Handover domain type: a token-budgeted summary of one completed phase,
//! generated automatically on approval and also submittable by agents.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use store::{IndexValue, Record, now_ms};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandoverMetrics {
    pub agent_count: u32,
    pub finding_count: u32,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handover {
    pub id: String,
    pub task_id: String,
    pub from_phase_index: i64,
    pub summary: String,
    pub key_findings: Vec<String>,
    pub artifacts: Vec<String>,
    pub blockers_resolved: Vec<String>,
    pub recommendations: Vec<String>,
    pub metrics: HandoverMetrics,
    pub created_at: i64,
}

impl Handover {
    pub fn id_for(task_id: &str, from_phase_index: i64) -> String {
        format!("{task_id}#handover#{from_phase_index}")
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_id: String,
        from_phase_index: i64,
        summary: String,
        key_findings: Vec<String>,
        artifacts: Vec<String>,
        blockers_resolved: Vec<String>,
        recommendations: Vec<String>,
        metrics: HandoverMetrics,
    ) -> Self {
        Self {
            id: Self::id_for(&task_id, from_phase_index),
            task_id,
            from_phase_index,
            summary,
            key_findings,
            artifacts,
            blockers_resolved,
            recommendations,
            metrics,
            created_at: now_ms(),
        }
    }
}

impl Record for Handover {
    fn id(&self) -> &str {
        &self.id
    }
    fn updated_at(&self) -> i64 {
        self.created_at
    }
    fn collection_name() -> &'static str {
        "handovers"
    }
    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut m = HashMap::new();
        m.insert("task_id".to_string(), IndexValue::String(self.task_id.clone()));
        m
    }
}
