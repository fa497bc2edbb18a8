//! Task domain type: the top-level unit of work a client submits.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use store::{IndexValue, Record, now_ms};

use super::ids::generate_task_id;

/// Client-supplied urgency. Scheduler and dashboard ordering only; does not
/// gate admission on its own (see `TaskLimits`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
}

impl Default for Priority {
    fn default() -> Self {
        Self::P2
    }
}

/// Task lifecycle. `Initialized` is the state between `create_task` and the
/// first successful `deploy_agent`; everything after that is `Active` until
/// the terminal phase resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Initialized,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self).ok().and_then(|v| v.as_str().map(str::to_string));
        write!(f, "{}", s.unwrap_or_else(|| "unknown".to_string()))
    }
}

/// Caps enforced at spawn time. Defaults are conservative; callers creating
/// tasks for long pipelines can raise them explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskLimits {
    pub max_agents: u32,
    pub max_concurrent: u32,
    pub max_depth: u32,
}

impl Default for TaskLimits {
    fn default() -> Self {
        Self {
            max_agents: 50,
            max_concurrent: 8,
            max_depth: 4,
        }
    }
}

/// Optional context supplied at `create_task` time, folded into phase 0's
/// first agents' prompts alongside whatever the context accumulator adds
/// from later phases.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskContext {
    pub background: Option<String>,
    pub deliverables: Vec<String>,
    pub success_criteria: Vec<String>,
    pub constraints: Vec<String>,
    pub relevant_files: Vec<String>,
    pub related_docs: Vec<String>,
    /// Free-form prior conversation, subject to the truncation rules in
    /// `conversation_history_truncated` before it reaches a prompt.
    pub conversation_history: Vec<ConversationTurn>,
}

/// One turn of conversation history supplied by the creating client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: ConversationRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationRole {
    User,
    Assistant,
}

/// Source spec §9: user turns are kept up to 8KB; assistant turns are
/// hard-capped at 150 chars. This is the upstream prompt-token budget the
/// original implementation tuned for; implementers inheriting this system
/// should revisit the constants before relying on them for a different
/// model family.
const USER_TURN_MAX_BYTES: usize = 8 * 1024;
const ASSISTANT_TURN_MAX_CHARS: usize = 150;

impl TaskContext {
    /// Apply the conversation-history truncation rules in place.
    pub fn truncate_conversation_history(&mut self) {
        for turn in &mut self.conversation_history {
            match turn.role {
                ConversationRole::User => {
                    if turn.content.len() > USER_TURN_MAX_BYTES {
                        let mut end = USER_TURN_MAX_BYTES;
                        while !turn.content.is_char_boundary(end) {
                            end -= 1;
                        }
                        turn.content.truncate(end);
                    }
                }
                ConversationRole::Assistant => {
                    if turn.content.chars().count() > ASSISTANT_TURN_MAX_CHARS {
                        turn.content = turn.content.chars().take(ASSISTANT_TURN_MAX_CHARS).collect();
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub priority: Priority,
    pub workspace_path: String,
    pub creator_cwd: String,
    pub status: TaskStatus,
    pub current_phase_index: i64,
    pub limits: TaskLimits,
    pub context: TaskContext,
    /// Incremented on every phase-engine-guarded mutation to this row;
    /// see `store::Store::update_if_version`.
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl Task {
    pub fn new(
        description: String,
        priority: Priority,
        workspace_path: String,
        creator_cwd: String,
        limits: TaskLimits,
        mut context: TaskContext,
    ) -> Self {
        context.truncate_conversation_history();
        let now = now_ms();
        Self {
            id: generate_task_id(),
            description,
            priority,
            workspace_path,
            creator_cwd,
            status: TaskStatus::Initialized,
            current_phase_index: 0,
            limits,
            context,
            version: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

impl Record for Task {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "tasks"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut m = HashMap::new();
        m.insert("status".to_string(), IndexValue::String(format!("{:?}", self.status)));
        m.insert("priority".to_string(), IndexValue::String(format!("{:?}", self.priority)));
        m
    }
}
