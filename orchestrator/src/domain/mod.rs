//! Domain types for the orchestrator: tasks, phases, agents, reviews,
//! findings, and handovers. Every persisted type implements `store::Record`;
//! the parent-child agent graph is an on-demand traversal over `Agent`'s
//! indexed `parent` field rather than a separate in-memory graph structure
//! (spec redesign note: "cycle-prone parent->child agent graph").

mod agent;
mod finding;
mod handover;
mod ids;
mod phase;
mod review;
mod task;

pub use agent::{Agent, AgentFilePaths, AgentStatus, CleanupReport, CompletionValidation};
pub use finding::{AgentProgressLatest, Finding, FindingType, ProgressEvent, Severity};
pub use handover::{Handover, HandoverMetrics};
pub use ids::{generate_agent_id, generate_review_id, generate_task_id};
pub use phase::{InvalidTransition, Phase, PhaseStatus};
pub use review::{Critique, Review, ReviewStatus, Verdict, VerdictValue};
pub use task::{ConversationRole, ConversationTurn, Priority, Task, TaskContext, TaskLimits, TaskStatus};

pub use store::{Filter, FilterOp, IndexValue, Record, Store, StoreError, StoreResult};
