//! The engine modules turn the state store's low-level CRUD into the
//! orchestrator's actual behavior: advancing phases, triggering and
//! finalizing reviews, spawning and retiring agents, accumulating context,
//! and writing handovers. Each module is a set of free functions over a
//! [`crate::state::StateManager`] handle rather than a god-object, so the
//! call graph between them (phase advancement triggers a review; a
//! finalized review triggers a handover and the next phase) stays explicit.

pub mod context;
pub mod handover;
pub mod lifecycle;
pub mod multiplexer;
pub mod phase;
pub mod query;
pub mod review;

use thiserror::Error;

use crate::config::Config;
use crate::events::EventBus;
use crate::prompts::PromptLoader;
use crate::state::{StateError, StateManager};
use crate::workspace::WorkspaceLayout;
use multiplexer::{Multiplexer, MultiplexerError};

/// Bundles every dependency an engine function needs, so call sites pass one
/// handle instead of five. Cheap to construct per-call: every field is a
/// borrow or an `Arc`-backed clone.
#[derive(Clone, Copy)]
pub struct EngineContext<'a> {
    pub state: &'a StateManager,
    pub events: &'a EventBus,
    pub multiplexer: &'a dyn Multiplexer,
    pub prompts: &'a PromptLoader,
    pub layout: &'a WorkspaceLayout,
    pub config: &'a Config,
}

/// Closed error taxonomy for the engine layer (spec §7): every RPC-facing
/// operation returns one of these, which the RPC surface maps onto the
/// wire-level `error` code without needing to inspect message text.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error("multiplexer error: {0}")]
    Multiplexer(#[from] MultiplexerError),
    #[error("prompt rendering failed: {0}")]
    Prompt(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),
    #[error("manual approval blocked: {0}")]
    ManualApprovalBlocked(String),
}

impl EngineError {
    /// The wire-level error code (§6), stable regardless of the underlying
    /// variant's Display text.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::State(StateError::NotFound(_)) => "not_found",
            EngineError::State(StateError::StaleVersion(_)) => "stale_version",
            EngineError::State(StateError::InvalidTransition(_)) => "invalid_transition",
            EngineError::State(StateError::Validation(_)) => "validation_failed",
            EngineError::State(StateError::LimitExceeded(_)) => "limit_exceeded",
            EngineError::State(StateError::ManualApprovalBlocked(_)) => "manual_approval_blocked",
            EngineError::State(StateError::Resource(_)) => "internal",
            EngineError::State(StateError::Store(_)) => "internal",
            EngineError::State(StateError::ChannelClosed) => "internal",
            EngineError::Multiplexer(_) => "internal",
            EngineError::Prompt(_) => "internal",
            EngineError::Io(_) => "internal",
            EngineError::Validation(_) => "validation_failed",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::ManualApprovalBlocked(_) => "manual_approval_blocked",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
