//! Commands and replies exchanged with the state-store actor.

use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{Agent, AgentProgressLatest, Finding, Handover, Phase, PhaseStatus, Review, Task, Verdict};

/// Closed error taxonomy for the state-store boundary (spec §7).
#[derive(Debug, Error, Clone)]
pub enum StateError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("stale version: {0}")]
    StaleVersion(String),
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),
    #[error("manual approval blocked: {0}")]
    ManualApprovalBlocked(String),
    #[error("resource error: {0}")]
    Resource(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("actor channel closed")]
    ChannelClosed,
}

impl From<store::StoreError> for StateError {
    fn from(e: store::StoreError) -> Self {
        match e {
            store::StoreError::NotFound { collection, id } => Self::NotFound(format!("{collection}/{id}")),
            other => Self::Store(other.to_string()),
        }
    }
}

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug)]
pub struct PhaseAgentCounts {
    pub total: u32,
    pub active: u32,
    pub terminal: u32,
}

#[derive(Debug, Default)]
pub struct TaskCounts {
    pub total_agents: u32,
    pub active_agents: u32,
    pub terminal_agents: u32,
}

#[derive(Debug, Default)]
pub struct GlobalCounts {
    pub total_tasks: u32,
    pub active_tasks: u32,
    pub total_active_agents: u32,
}

pub(super) type Reply<T> = oneshot::Sender<StateResult<T>>;

#[derive(Debug)]
pub enum StateCommand {
    CreateTask {
        task: Task,
        reply: Reply<Task>,
    },
    GetTask {
        task_id: String,
        reply: Reply<Task>,
    },
    ListTasks {
        reply: Reply<Vec<Task>>,
    },
    TransitionTaskToActive {
        task_id: String,
        reply: Reply<Task>,
    },
    MarkTaskTerminal {
        task_id: String,
        status: crate::domain::TaskStatus,
        reply: Reply<Task>,
    },

    CreatePhase {
        phase: Phase,
        reply: Reply<Phase>,
    },
    GetPhase {
        task_id: String,
        phase_index: i64,
        reply: Reply<Phase>,
    },
    ListPhases {
        task_id: String,
        reply: Reply<Vec<Phase>>,
    },
    TransitionPhase {
        task_id: String,
        phase_index: i64,
        to: PhaseStatus,
        expected_version: i64,
        reason: Option<String>,
        reply: Reply<Phase>,
    },

    CreateAgent {
        agent: Agent,
        reply: Reply<Agent>,
    },
    GetAgent {
        agent_id: String,
        reply: Reply<Agent>,
    },
    ListAgentsByTask {
        task_id: String,
        reply: Reply<Vec<Agent>>,
    },
    ListAgentsByPhase {
        task_id: String,
        phase_index: i64,
        reply: Reply<Vec<Agent>>,
    },
    ListAgentsByParent {
        parent_agent_id: String,
        reply: Reply<Vec<Agent>>,
    },
    UpdateAgent {
        agent: Agent,
        reply: Reply<()>,
    },
    MarkAgentTerminal {
        agent_id: String,
        status: crate::domain::AgentStatus,
        reply: Reply<(Agent, bool)>, // bool: true if this call performed the transition
    },

    RecordProgress {
        event: crate::domain::ProgressEvent,
        reply: Reply<()>,
    },
    GetAgentProgressLatest {
        agent_id: String,
        reply: Reply<Option<AgentProgressLatest>>,
    },

    RecordFinding {
        finding: Finding,
        reply: Reply<()>,
    },
    ListFindingsByTask {
        task_id: String,
        reply: Reply<Vec<Finding>>,
    },
    ListFindingsByAgent {
        agent_id: String,
        reply: Reply<Vec<Finding>>,
    },

    CreateReview {
        review: Review,
        reply: Reply<Review>,
    },
    GetReview {
        review_id: String,
        reply: Reply<Review>,
    },
    ListReviewsByTask {
        task_id: String,
        reply: Reply<Vec<Review>>,
    },
    SubmitVerdict {
        review_id: String,
        verdict: Verdict,
        reply: Reply<Review>,
    },
    FinalizeReview {
        review_id: String,
        status: crate::domain::ReviewStatus,
        final_verdict: Option<crate::domain::VerdictValue>,
        reply: Reply<Review>,
    },

    CreateHandover {
        handover: Handover,
        reply: Reply<Handover>,
    },
    GetHandover {
        task_id: String,
        from_phase_index: i64,
        reply: Reply<Option<Handover>>,
    },
    ListHandovers {
        task_id: String,
        reply: Reply<Vec<Handover>>,
    },

    GetTaskCounts {
        task_id: String,
        reply: Reply<TaskCounts>,
    },
    GetPhaseAgentCounts {
        task_id: String,
        phase_index: i64,
        reply: Reply<PhaseAgentCounts>,
    },
    GetActiveCounts {
        reply: Reply<GlobalCounts>,
    },

    Sync {
        reply: Reply<()>,
    },
    Shutdown,
}
