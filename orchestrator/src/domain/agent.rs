//! Agent domain type: one external LLM process instance hosted in a
//! multiplexer session.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use store::{IndexValue, Record, now_ms};

use super::ids::generate_agent_id;

/// Closed status sum type replacing the duck-typed strings multiple
/// upstream writers historically produced; `normalize_legacy_status` is the
/// one place that maps free-form input onto this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Running,
    Working,
    Blocked,
    Reviewing,
    Completed,
    Failed,
    Error,
    Terminated,
    Killed,
    /// Legacy terminal value; collapsed onto the same terminal bucket as
    /// `Completed` per the source's own apparent treatment (spec §9 open
    /// question).
    PhaseCompleted,
}

impl AgentStatus {
    pub const ACTIVE: [AgentStatus; 4] = [Self::Running, Self::Working, Self::Blocked, Self::Reviewing];
    pub const TERMINAL: [AgentStatus; 6] = [
        Self::Completed,
        Self::Failed,
        Self::Error,
        Self::Terminated,
        Self::Killed,
        Self::PhaseCompleted,
    ];

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }

    /// Map a free-form legacy status string (from any self-reporting writer)
    /// onto the closed set. Unknown strings become `Working`, the least
    /// committal active bucket, rather than being rejected outright — the
    /// ingestion path logs a warning instead (see `agent::update_progress`).
    pub fn normalize_legacy(raw: &str) -> Self {
        match raw {
            "running" | "starting" | "pending" => Self::Running,
            "working" | "in_progress" => Self::Working,
            "blocked" => Self::Blocked,
            "reviewing" => Self::Reviewing,
            "completed" | "complete" | "done" => Self::Completed,
            "failed" => Self::Failed,
            "error" => Self::Error,
            "terminated" => Self::Terminated,
            "killed" => Self::Killed,
            "phase_completed" => Self::PhaseCompleted,
            _ => Self::Working,
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self).ok().and_then(|v| v.as_str().map(str::to_string));
        write!(f, "{}", s.unwrap_or_else(|| "unknown".to_string()))
    }
}

/// Structured record of a termination's resource-cleanup pass; always
/// attached to the agent row even when some steps failed partially (§4.4,
/// §7 `Cleanup-partial`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupReport {
    pub session_killed: bool,
    pub orphans_killed: Vec<i32>,
    pub prompt_file_deleted: bool,
    pub logs_archived: bool,
    pub orphan_survivors: Vec<i32>,
    pub errors: Vec<String>,
}

/// Non-blocking completion validation attached when an agent self-reports
/// `completed`. Never refuses the transition; surfaces suspicion for a
/// reviewer or human to weigh.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionValidation {
    /// 0.0 (no confidence this genuinely finished) to 1.0.
    pub confidence: f32,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentFilePaths {
    pub prompt_file: String,
    pub stream_log: String,
    pub progress_log: String,
    pub findings_log: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub task_id: String,
    pub agent_type: String,
    pub parent: String,
    pub depth: u32,
    /// -1 for reviewer agents, which are not bound to a work phase.
    pub phase_index: i64,
    pub session_name: String,
    pub pid: i32,
    pub status: AgentStatus,
    pub progress: u8,
    pub files: AgentFilePaths,
    pub cleanup: Option<CleanupReport>,
    pub validation: Option<CompletionValidation>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl Agent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_id: String,
        agent_type: String,
        parent: String,
        depth: u32,
        phase_index: i64,
        session_name: String,
        pid: i32,
        files: AgentFilePaths,
    ) -> Self {
        let now = now_ms();
        Self {
            id: generate_agent_id(&agent_type),
            task_id,
            agent_type,
            parent,
            depth,
            phase_index,
            session_name,
            pid,
            status: AgentStatus::Running,
            progress: 0,
            files,
            cleanup: None,
            validation: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_reviewer(&self) -> bool {
        self.phase_index < 0
    }
}

impl Record for Agent {
    fn id(&self) -> &str {
        &self.id
    }
    fn updated_at(&self) -> i64 {
        self.updated_at
    }
    fn collection_name() -> &'static str {
        "agents"
    }
    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut m = HashMap::new();
        m.insert("task_id".to_string(), IndexValue::String(self.task_id.clone()));
        m.insert("status".to_string(), IndexValue::String(format!("{:?}", self.status)));
        m.insert("phase_index".to_string(), IndexValue::Int(self.phase_index));
        m.insert("parent".to_string(), IndexValue::String(self.parent.clone()));
        m
    }
}
