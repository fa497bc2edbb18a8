//! Multi-agent orchestrator for headless LLM-coding agents.
//!
//! A task decomposes into a sequence of phases; each phase is worked by one
//! or more spawned coding agents and gated by an automatic review before the
//! next phase activates. Every mutation goes through a single actor
//! ([`state::StateManager`]) serializing access to an embedded SQLite store
//! ([`store`]); a background health daemon ([`daemon`]) reaps agents whose
//! tmux session or process has died or whose output has gone stale.
//!
//! # Modules
//!
//! - [`domain`] - task/phase/agent/review/finding/handover types
//! - [`state`] - the serializing actor in front of the store
//! - [`engine`] - lifecycle, phase, review, handover, context, and query logic
//! - [`events`] - the in-process event bus and its JSONL/global-index subscribers
//! - [`global_index`] - cross-workspace task/workspace registry
//! - [`workspace`] - on-disk path layout
//! - [`prompts`] - agent prompt templates and rendering
//! - [`daemon`] - background health-scan loop and its process lifecycle
//! - [`registry`] - per-task `AGENT_REGISTRY.json` mirror
//! - [`output`] - stream-log retrieval and truncation
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod cli;
pub mod config;
pub mod daemon;
pub mod domain;
pub mod engine;
pub mod events;
pub mod global_index;
pub mod output;
pub mod prompts;
pub mod registry;
pub mod state;
pub mod workspace;

pub use config::Config;
pub use domain::{Filter, FilterOp, IndexValue, Record, Store, StoreError};
pub use engine::{EngineContext, EngineError, EngineResult};
pub use events::{Event, EventBus, EventLogger, create_event_bus};
pub use global_index::GlobalIndex;
pub use prompts::{PromptLoader, PromptSpec};
pub use state::{StateCommand, StateError as StateManagerError, StateManager};
pub use workspace::{GlobalLayout, WorkspaceLayout};
