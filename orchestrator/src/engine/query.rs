//! Read-side API (§4.8): the RPC surface's `get_task_status`, `list_tasks`,
//! `get_review_status`, `get_handover_context` and friends all resolve to
//! one of these functions. Nothing here mutates state, so every function
//! takes only the pieces of [`crate::engine::EngineContext`] it needs plus,
//! where cross-workspace visibility matters, a [`crate::global_index::GlobalIndex`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{Agent, AgentStatus, Finding, Handover, Phase, Review, Task};
use crate::global_index::{GlobalIndex, TaskIndexEntry};
use crate::state::{GlobalCounts, PhaseAgentCounts, StateError, StateManager};
use crate::workspace::WorkspaceLayout;

use super::{EngineError, EngineResult};

/// Filters accepted by `list_tasks`. Every field is optional; an absent
/// filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct TaskListFilter {
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub status: Option<crate::domain::TaskStatus>,
    pub workspace_path: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// One row of `list_tasks`: enough to render a task list without a second
/// round-trip per task, merged from whichever workspace actually owns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: String,
    pub workspace_path: String,
    pub description: String,
    pub priority: crate::domain::Priority,
    pub status: crate::domain::TaskStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<Task> for TaskSummary {
    fn from(t: Task) -> Self {
        Self { task_id: t.id, workspace_path: t.workspace_path, description: t.description, priority: t.priority, status: t.status, created_at: t.created_at, updated_at: t.updated_at }
    }
}

impl From<TaskIndexEntry> for TaskSummary {
    fn from(t: TaskIndexEntry) -> Self {
        Self { task_id: t.task_id, workspace_path: t.workspace_path, description: t.description, priority: t.priority, status: t.status, created_at: t.created_at, updated_at: t.updated_at }
    }
}

/// List tasks for the current workspace, merged with every other workspace
/// the machine-wide global index knows about (`global` is `None` when a
/// caller only cares about its own workspace, e.g. the health daemon).
pub async fn list_tasks(state: &StateManager, global: Option<&GlobalIndex>, filter: &TaskListFilter) -> EngineResult<Vec<TaskSummary>> {
    let mut merged: BTreeMap<String, TaskSummary> = BTreeMap::new();

    for task in state.list_tasks().await? {
        merged.insert(task.id.clone(), task.into());
    }

    if let Some(index) = global {
        let entries = match &filter.workspace_path {
            Some(path) => index.list_tasks_for_workspace(path).map_err(store_err)?,
            None => index.list_tasks().map_err(store_err)?,
        };
        for entry in entries {
            // A task this process's own StateManager already loaded is the
            // authoritative, freshest copy; the global index only fills in
            // tasks that live in other workspaces.
            merged.entry(entry.task_id.clone()).or_insert_with(|| entry.into());
        }
    }

    let mut rows: Vec<TaskSummary> = merged
        .into_values()
        .filter(|t| filter.since.is_none_or(|since| t.created_at >= since))
        .filter(|t| filter.until.is_none_or(|until| t.created_at <= until))
        .filter(|t| filter.status.is_none_or(|status| t.status == status))
        .filter(|t| filter.workspace_path.as_ref().is_none_or(|path| &t.workspace_path == path))
        .collect();

    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let rows = rows.into_iter().skip(filter.offset);
    Ok(match filter.limit {
        Some(limit) => rows.take(limit).collect(),
        None => rows.collect(),
    })
}

fn store_err(e: store::StoreError) -> EngineError {
    EngineError::State(StateError::from(e))
}

/// Full snapshot of one task: the task row plus every phase, agent, review,
/// and handover that belongs to it. This is what `get_task_status` returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task: Task,
    pub phases: Vec<Phase>,
    pub agents: Vec<AgentView>,
    pub reviews: Vec<Review>,
    pub handovers: Vec<Handover>,
}

/// An agent row with its status resolved against the freshest progress
/// report rather than the (possibly stale) canonical row — see
/// [`effective_status`] for why the two can disagree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentView {
    #[serde(flatten)]
    pub agent: Agent,
    pub effective_status: AgentStatus,
}

pub async fn get_task(state: &StateManager, layout: &WorkspaceLayout, task_id: &str) -> EngineResult<TaskSnapshot> {
    let task = state.get_task(task_id).await?;
    let phases = state.list_phases(task_id).await?;
    let raw_agents = state.list_agents_by_task(task_id).await?;
    let reviews = state.list_reviews_by_task(task_id).await?;
    let handovers = state.list_handovers(task_id).await?;

    let mut agents = Vec::with_capacity(raw_agents.len());
    for agent in raw_agents {
        let effective_status = effective_status(state, layout, &agent).await?;
        agents.push(AgentView { agent, effective_status });
    }

    Ok(TaskSnapshot { task, phases, agents, reviews, handovers })
}

pub async fn get_phase(state: &StateManager, task_id: &str, phase_index: i64) -> EngineResult<Phase> {
    Ok(state.get_phase(task_id, phase_index).await?)
}

pub async fn get_phase_agent_counts(state: &StateManager, task_id: &str, phase_index: i64) -> EngineResult<PhaseAgentCounts> {
    Ok(state.get_phase_agent_counts(task_id, phase_index).await?)
}

pub async fn get_agent(state: &StateManager, layout: &WorkspaceLayout, agent_id: &str) -> EngineResult<AgentView> {
    let agent = state.get_agent(agent_id).await?;
    let effective_status = effective_status(state, layout, &agent).await?;
    Ok(AgentView { agent, effective_status })
}

pub async fn get_agent_findings(state: &StateManager, agent_id: &str) -> EngineResult<Vec<Finding>> {
    Ok(state.list_findings_by_agent(agent_id).await?)
}

/// Cross-workspace counts plus a status breakdown, the source for a
/// dashboard's headline numbers.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DashboardSummary {
    pub local: GlobalCounts,
    pub local_task_counts: BTreeMap<String, usize>,
    pub workspaces_registered: usize,
    pub cross_workspace_tasks: usize,
    pub cross_workspace_task_counts: BTreeMap<String, usize>,
}

pub async fn get_dashboard_summary(state: &StateManager, global: Option<&GlobalIndex>) -> EngineResult<DashboardSummary> {
    let local = state.get_active_counts().await?;

    let mut local_task_counts = BTreeMap::new();
    for task in state.list_tasks().await? {
        *local_task_counts.entry(format!("{:?}", task.status)).or_insert(0usize) += 1;
    }

    let mut summary = DashboardSummary { local, local_task_counts, ..Default::default() };

    if let Some(index) = global {
        let workspaces = index.list_workspaces().map_err(store_err)?;
        let tasks = index.list_tasks().map_err(store_err)?;
        summary.workspaces_registered = workspaces.len();
        summary.cross_workspace_tasks = tasks.len();
        for task in tasks {
            *summary.cross_workspace_task_counts.entry(format!("{:?}", task.status)).or_insert(0usize) += 1;
        }
    }

    Ok(summary)
}

/// Also used to interpret a raw progress-report status string at ingestion
/// time; kept in the query layer because only queries need its distinction
/// between a recognized and an unrecognized status string (see below).
fn normalize_query_status(raw: &str, progress: u8) -> AgentStatus {
    match raw {
        "pending" | "starting" => AgentStatus::Running,
        "running" => AgentStatus::Running,
        "working" | "in_progress" => AgentStatus::Working,
        "blocked" => AgentStatus::Blocked,
        "reviewing" => AgentStatus::Reviewing,
        "completed" | "complete" | "done" => AgentStatus::Completed,
        "failed" => AgentStatus::Failed,
        "error" => AgentStatus::Error,
        "terminated" => AgentStatus::Terminated,
        "killed" => AgentStatus::Killed,
        "phase_completed" => AgentStatus::PhaseCompleted,
        // An agent type we don't recognize the raw string for: fall back to
        // progress, the same rule ingestion-time normalization can't apply
        // (it has no "unrecognized" bucket once the value is typed).
        _ if progress >= 100 => AgentStatus::Completed,
        _ if progress == 0 => AgentStatus::Running,
        _ => AgentStatus::Working,
    }
}

/// An agent's canonical `status` field only changes on a terminal
/// transition (`finalize_terminal`); ordinary progress reports update
/// `AgentProgressLatest` instead. A query asking "what is this agent doing
/// right now" should prefer the latest progress report over a stale
/// `Running` row left over from spawn — unless the canonical row is already
/// terminal, in which case it's authoritative and progress reports (which
/// may lag behind termination) should not override it.
async fn effective_status(state: &StateManager, layout: &WorkspaceLayout, agent: &Agent) -> EngineResult<AgentStatus> {
    let _ = layout;
    if agent.status.is_terminal() {
        return Ok(agent.status);
    }

    match state.get_agent_progress_latest(&agent.id).await? {
        Some(latest) => Ok(normalize_query_status(&format!("{}", latest.status), latest.progress)),
        None => Ok(agent.status),
    }
}
