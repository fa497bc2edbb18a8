//! StateManager: the single task that owns a workspace's `store::Store`.
//!
//! All mutation and read traffic goes through a command/reply channel so the
//! database connection is never shared across threads directly (spec §5,
//! "state-owning actor"). Because every command is processed sequentially by
//! one task, read-then-write sequences inside a single command handler (the
//! phase-transition version check, the agent terminal-status gate) are
//! automatically race-free without extra locking.

use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::domain::{
    Agent, AgentProgressLatest, AgentStatus, Filter, Finding, Handover, IndexValue, Phase, PhaseStatus, ProgressEvent, Record,
    Review, ReviewStatus, Store, Task, TaskStatus, Verdict, VerdictValue,
};

use super::messages::{GlobalCounts, PhaseAgentCounts, Reply, StateCommand, StateError, StateResult, TaskCounts};

/// Broadcast to in-process subscribers (the health daemon's phase-check
/// trigger, a future websocket integrator). Distinct from the command/reply
/// channel so a slow subscriber never stalls command processing.
#[derive(Debug, Clone)]
pub enum StateEvent {
    TaskCreated { task_id: String },
    TaskTransitioned { task_id: String, status: TaskStatus },
    PhaseTransitioned { task_id: String, phase_index: i64, status: PhaseStatus },
    AgentSpawned { task_id: String, agent_id: String },
    AgentTerminal { task_id: String, agent_id: String, status: AgentStatus },
    ReviewTriggered { task_id: String, phase_index: i64, review_id: String },
    ReviewFinalized { task_id: String, review_id: String, verdict: VerdictValue },
    HandoverCreated { task_id: String, from_phase_index: i64 },
}

#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
    event_tx: broadcast::Sender<StateEvent>,
}

fn reply<T>(reply: Reply<T>, value: StateResult<T>) {
    let _ = reply.send(value);
}

impl StateManager {
    pub fn spawn(store_path: impl AsRef<std::path::Path>) -> StateResult<Self> {
        let store = Store::open(store_path.as_ref()).map_err(StateError::from)?;
        Self::spawn_from_store(store)
    }

    /// Like [`Self::spawn`], but with an explicit legacy-mirror path (the
    /// workspace's `registry/GLOBAL_REGISTRY.json`, per [`crate::workspace::WorkspaceLayout`])
    /// instead of the store's derived `<same-stem>.json` default.
    pub fn spawn_with_mirror(store_path: impl AsRef<std::path::Path>, mirror_path: impl AsRef<std::path::Path>) -> StateResult<Self> {
        let store = Store::open_with_mirror(store_path.as_ref(), mirror_path.as_ref()).map_err(StateError::from)?;
        Self::spawn_from_store(store)
    }

    fn spawn_from_store(store: Store) -> StateResult<Self> {
        let (tx, rx) = mpsc::channel(256);
        let (event_tx, _) = broadcast::channel(256);
        tokio::spawn(actor_loop(store, rx, event_tx.clone()));
        Ok(Self { tx, event_tx })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.event_tx.subscribe()
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> StateCommand) -> StateResult<T> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.tx.send(make(tx)).await.map_err(|_| StateError::ChannelClosed)?;
        rx.await.map_err(|_| StateError::ChannelClosed)?
    }

    pub async fn create_task(&self, task: Task) -> StateResult<Task> {
        self.call(|reply| StateCommand::CreateTask { task, reply }).await
    }

    pub async fn get_task(&self, task_id: impl Into<String>) -> StateResult<Task> {
        let task_id = task_id.into();
        self.call(|reply| StateCommand::GetTask { task_id, reply }).await
    }

    pub async fn list_tasks(&self) -> StateResult<Vec<Task>> {
        self.call(|reply| StateCommand::ListTasks { reply }).await
    }

    pub async fn transition_task_to_active(&self, task_id: impl Into<String>) -> StateResult<Task> {
        let task_id = task_id.into();
        self.call(|reply| StateCommand::TransitionTaskToActive { task_id, reply }).await
    }

    pub async fn mark_task_terminal(&self, task_id: impl Into<String>, status: TaskStatus) -> StateResult<Task> {
        let task_id = task_id.into();
        self.call(|reply| StateCommand::MarkTaskTerminal { task_id, status, reply }).await
    }

    pub async fn create_phase(&self, phase: Phase) -> StateResult<Phase> {
        self.call(|reply| StateCommand::CreatePhase { phase, reply }).await
    }

    pub async fn get_phase(&self, task_id: impl Into<String>, phase_index: i64) -> StateResult<Phase> {
        let task_id = task_id.into();
        self.call(|reply| StateCommand::GetPhase { task_id, phase_index, reply }).await
    }

    pub async fn list_phases(&self, task_id: impl Into<String>) -> StateResult<Vec<Phase>> {
        let task_id = task_id.into();
        self.call(|reply| StateCommand::ListPhases { task_id, reply }).await
    }

    pub async fn transition_phase(
        &self,
        task_id: impl Into<String>,
        phase_index: i64,
        to: PhaseStatus,
        expected_version: i64,
        reason: Option<String>,
    ) -> StateResult<Phase> {
        let task_id = task_id.into();
        self.call(|reply| StateCommand::TransitionPhase {
            task_id,
            phase_index,
            to,
            expected_version,
            reason,
            reply,
        })
        .await
    }

    pub async fn create_agent(&self, agent: Agent) -> StateResult<Agent> {
        self.call(|reply| StateCommand::CreateAgent { agent, reply }).await
    }

    pub async fn get_agent(&self, agent_id: impl Into<String>) -> StateResult<Agent> {
        let agent_id = agent_id.into();
        self.call(|reply| StateCommand::GetAgent { agent_id, reply }).await
    }

    pub async fn list_agents_by_task(&self, task_id: impl Into<String>) -> StateResult<Vec<Agent>> {
        let task_id = task_id.into();
        self.call(|reply| StateCommand::ListAgentsByTask { task_id, reply }).await
    }

    pub async fn list_agents_by_phase(&self, task_id: impl Into<String>, phase_index: i64) -> StateResult<Vec<Agent>> {
        let task_id = task_id.into();
        self.call(|reply| StateCommand::ListAgentsByPhase { task_id, phase_index, reply }).await
    }

    pub async fn list_agents_by_parent(&self, parent_agent_id: impl Into<String>) -> StateResult<Vec<Agent>> {
        let parent_agent_id = parent_agent_id.into();
        self.call(|reply| StateCommand::ListAgentsByParent { parent_agent_id, reply }).await
    }

    pub async fn update_agent(&self, agent: Agent) -> StateResult<()> {
        self.call(|reply| StateCommand::UpdateAgent { agent, reply }).await
    }

    /// Returns the agent's post-call state and whether *this* call performed
    /// the active->terminal transition (false if it was already terminal),
    /// which is what callers gate their one-time side effects on.
    pub async fn mark_agent_terminal(&self, agent_id: impl Into<String>, status: AgentStatus) -> StateResult<(Agent, bool)> {
        let agent_id = agent_id.into();
        self.call(|reply| StateCommand::MarkAgentTerminal { agent_id, status, reply }).await
    }

    pub async fn record_progress(&self, event: ProgressEvent) -> StateResult<()> {
        self.call(|reply| StateCommand::RecordProgress { event, reply }).await
    }

    pub async fn get_agent_progress_latest(&self, agent_id: impl Into<String>) -> StateResult<Option<AgentProgressLatest>> {
        let agent_id = agent_id.into();
        self.call(|reply| StateCommand::GetAgentProgressLatest { agent_id, reply }).await
    }

    pub async fn record_finding(&self, finding: Finding) -> StateResult<()> {
        self.call(|reply| StateCommand::RecordFinding { finding, reply }).await
    }

    pub async fn list_findings_by_task(&self, task_id: impl Into<String>) -> StateResult<Vec<Finding>> {
        let task_id = task_id.into();
        self.call(|reply| StateCommand::ListFindingsByTask { task_id, reply }).await
    }

    pub async fn list_findings_by_agent(&self, agent_id: impl Into<String>) -> StateResult<Vec<Finding>> {
        let agent_id = agent_id.into();
        self.call(|reply| StateCommand::ListFindingsByAgent { agent_id, reply }).await
    }

    pub async fn create_review(&self, review: Review) -> StateResult<Review> {
        self.call(|reply| StateCommand::CreateReview { review, reply }).await
    }

    pub async fn get_review(&self, review_id: impl Into<String>) -> StateResult<Review> {
        let review_id = review_id.into();
        self.call(|reply| StateCommand::GetReview { review_id, reply }).await
    }

    pub async fn list_reviews_by_task(&self, task_id: impl Into<String>) -> StateResult<Vec<Review>> {
        let task_id = task_id.into();
        self.call(|reply| StateCommand::ListReviewsByTask { task_id, reply }).await
    }

    pub async fn submit_verdict(&self, review_id: impl Into<String>, verdict: Verdict) -> StateResult<Review> {
        let review_id = review_id.into();
        self.call(|reply| StateCommand::SubmitVerdict { review_id, verdict, reply }).await
    }

    pub async fn finalize_review(
        &self,
        review_id: impl Into<String>,
        status: ReviewStatus,
        final_verdict: Option<VerdictValue>,
    ) -> StateResult<Review> {
        let review_id = review_id.into();
        self.call(|reply| StateCommand::FinalizeReview { review_id, status, final_verdict, reply }).await
    }

    pub async fn create_handover(&self, handover: Handover) -> StateResult<Handover> {
        self.call(|reply| StateCommand::CreateHandover { handover, reply }).await
    }

    pub async fn get_handover(&self, task_id: impl Into<String>, from_phase_index: i64) -> StateResult<Option<Handover>> {
        let task_id = task_id.into();
        self.call(|reply| StateCommand::GetHandover { task_id, from_phase_index, reply }).await
    }

    pub async fn list_handovers(&self, task_id: impl Into<String>) -> StateResult<Vec<Handover>> {
        let task_id = task_id.into();
        self.call(|reply| StateCommand::ListHandovers { task_id, reply }).await
    }

    pub async fn get_task_counts(&self, task_id: impl Into<String>) -> StateResult<TaskCounts> {
        let task_id = task_id.into();
        self.call(|reply| StateCommand::GetTaskCounts { task_id, reply }).await
    }

    pub async fn get_phase_agent_counts(&self, task_id: impl Into<String>, phase_index: i64) -> StateResult<PhaseAgentCounts> {
        let task_id = task_id.into();
        self.call(|reply| StateCommand::GetPhaseAgentCounts { task_id, phase_index, reply }).await
    }

    pub async fn get_active_counts(&self) -> StateResult<GlobalCounts> {
        self.call(|reply| StateCommand::GetActiveCounts { reply }).await
    }

    pub async fn sync(&self) -> StateResult<()> {
        self.call(|reply| StateCommand::Sync { reply }).await
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(StateCommand::Shutdown).await;
    }
}

async fn actor_loop(store: Store, mut rx: mpsc::Receiver<StateCommand>, events: broadcast::Sender<StateEvent>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::Shutdown => {
                debug!("state actor: shutdown received");
                break;
            }
            other => handle(&store, &events, other),
        }
    }
}

fn handle(store: &Store, events: &broadcast::Sender<StateEvent>, cmd: StateCommand) {
    match cmd {
        StateCommand::CreateTask { task, reply: r } => {
            let res = store.create(&task).map(|_| task.clone()).map_err(StateError::from);
            if res.is_ok() {
                let _ = events.send(StateEvent::TaskCreated { task_id: task.id.clone() });
            }
            reply(r, res);
        }
        StateCommand::GetTask { task_id, reply: r } => {
            reply(r, get_required::<Task>(store, &task_id));
        }
        StateCommand::ListTasks { reply: r } => {
            reply(r, store.list::<Task>(&[]).map_err(StateError::from));
        }
        StateCommand::TransitionTaskToActive { task_id, reply: r } => {
            let res = (|| {
                let mut task = get_required::<Task>(store, &task_id)?;
                if task.status != TaskStatus::Initialized {
                    return Ok(task);
                }
                task.status = TaskStatus::Active;
                task.updated_at = store::now_ms();
                task.version += 1;
                store.update(&task)?;
                Ok(task)
            })();
            if let Ok(ref t) = res {
                let _ = events.send(StateEvent::TaskTransitioned { task_id: t.id.clone(), status: t.status });
            }
            reply(r, res);
        }
        StateCommand::MarkTaskTerminal { task_id, status, reply: r } => {
            let res = (|| {
                let mut task = get_required::<Task>(store, &task_id)?;
                if task.status.is_terminal() {
                    return Ok(task);
                }
                task.status = status;
                task.updated_at = store::now_ms();
                task.completed_at = Some(task.updated_at);
                task.version += 1;
                store.update(&task)?;
                Ok(task)
            })();
            if let Ok(ref t) = res {
                let _ = events.send(StateEvent::TaskTransitioned { task_id: t.id.clone(), status: t.status });
            }
            reply(r, res);
        }

        StateCommand::CreatePhase { phase, reply: r } => {
            let res = store.create(&phase).map(|_| phase.clone()).map_err(StateError::from);
            reply(r, res);
        }
        StateCommand::GetPhase { task_id, phase_index, reply: r } => {
            let id = Phase::id_for(&task_id, phase_index);
            reply(r, get_required_by_id::<Phase>(store, &id));
        }
        StateCommand::ListPhases { task_id, reply: r } => {
            let mut phases = store
                .list::<Phase>(&[Filter::eq("task_id", IndexValue::String(task_id))])
                .map_err(StateError::from);
            if let Ok(ref mut ps) = phases {
                ps.sort_by_key(|p| p.phase_index);
            }
            reply(r, phases);
        }
        StateCommand::TransitionPhase {
            task_id,
            phase_index,
            to,
            expected_version,
            reason,
            reply: r,
        } => {
            let res = (|| {
                let id = Phase::id_for(&task_id, phase_index);
                let mut phase = get_required_by_id::<Phase>(store, &id)?;
                if phase.version != expected_version {
                    return Err(StateError::StaleVersion(id));
                }
                crate::domain::PhaseStatus::validate_transition(phase.status, to)
                    .map_err(|e| StateError::InvalidTransition(e.to_string()))?;
                phase.status = to;
                phase.version += 1;
                phase.updated_at = store::now_ms();
                if to == PhaseStatus::AwaitingReview {
                    phase.auto_submitted_at = Some(phase.updated_at);
                    phase.auto_submitted_reason = reason;
                }
                store.update(&phase)?;
                Ok(phase)
            })();
            if let Ok(ref p) = res {
                let _ = events.send(StateEvent::PhaseTransitioned {
                    task_id: p.task_id.clone(),
                    phase_index: p.phase_index,
                    status: p.status,
                });
            }
            reply(r, res);
        }

        StateCommand::CreateAgent { agent, reply: r } => {
            let res = store.create(&agent).map(|_| agent.clone()).map_err(StateError::from);
            if res.is_ok() {
                let _ = events.send(StateEvent::AgentSpawned { task_id: agent.task_id.clone(), agent_id: agent.id.clone() });
            }
            reply(r, res);
        }
        StateCommand::GetAgent { agent_id, reply: r } => {
            reply(r, get_required_by_id::<Agent>(store, &agent_id));
        }
        StateCommand::ListAgentsByTask { task_id, reply: r } => {
            reply(r, store.list::<Agent>(&[Filter::eq("task_id", IndexValue::String(task_id))]).map_err(StateError::from));
        }
        StateCommand::ListAgentsByPhase { task_id, phase_index, reply: r } => {
            let res = store
                .list::<Agent>(&[
                    Filter::eq("task_id", IndexValue::String(task_id)),
                    Filter::eq("phase_index", IndexValue::Int(phase_index)),
                ])
                .map_err(StateError::from);
            reply(r, res);
        }
        StateCommand::ListAgentsByParent { parent_agent_id, reply: r } => {
            reply(
                r,
                store
                    .list::<Agent>(&[Filter::eq("parent", IndexValue::String(parent_agent_id))])
                    .map_err(StateError::from),
            );
        }
        StateCommand::UpdateAgent { agent, reply: r } => {
            reply(r, store.update(&agent).map_err(StateError::from));
        }
        StateCommand::MarkAgentTerminal { agent_id, status, reply: r } => {
            let res = (|| {
                let mut agent = get_required_by_id::<Agent>(store, &agent_id)?;
                if agent.status.is_terminal() {
                    // Already terminal: gate on the *prior* status read here so a
                    // repeated call (daemon marks failed, agent later self-reports
                    // completed) never double-fires terminal-transition bookkeeping.
                    return Ok((agent, false));
                }
                agent.status = status;
                agent.updated_at = store::now_ms();
                agent.completed_at = Some(agent.updated_at);
                store.update(&agent)?;
                Ok((agent, true))
            })();
            if let Ok((ref a, true)) = res {
                let _ = events.send(StateEvent::AgentTerminal {
                    task_id: a.task_id.clone(),
                    agent_id: a.id.clone(),
                    status: a.status,
                });
            }
            reply(r, res);
        }

        StateCommand::RecordProgress { event, reply: r } => {
            let res = (|| {
                let agent = get_required_by_id::<Agent>(store, &event.agent_id)?;
                let status = AgentStatus::normalize_legacy(&event.status);
                let latest = AgentProgressLatest {
                    agent_id: event.agent_id.clone(),
                    task_id: agent.task_id.clone(),
                    status,
                    message: event.message.clone(),
                    progress: event.progress,
                    updated_at: event.timestamp,
                };
                store.update(&latest)?;
                Ok(())
            })();
            reply(r, res);
        }
        StateCommand::GetAgentProgressLatest { agent_id, reply: r } => {
            reply(r, store.get::<AgentProgressLatest>(&agent_id).map_err(StateError::from));
        }

        StateCommand::RecordFinding { finding, reply: r } => {
            reply(r, store.create(&finding).map_err(StateError::from));
        }
        StateCommand::ListFindingsByTask { task_id, reply: r } => {
            reply(
                r,
                store
                    .list::<Finding>(&[Filter::eq("task_id", IndexValue::String(task_id))])
                    .map_err(StateError::from),
            );
        }
        StateCommand::ListFindingsByAgent { agent_id, reply: r } => {
            reply(
                r,
                store
                    .list::<Finding>(&[Filter::eq("agent_id", IndexValue::String(agent_id))])
                    .map_err(StateError::from),
            );
        }

        StateCommand::CreateReview { review, reply: r } => {
            let res = store.create(&review).map(|_| review.clone()).map_err(StateError::from);
            if res.is_ok() {
                let _ = events.send(StateEvent::ReviewTriggered {
                    task_id: review.task_id.clone(),
                    phase_index: review.phase_index,
                    review_id: review.id.clone(),
                });
            }
            reply(r, res);
        }
        StateCommand::GetReview { review_id, reply: r } => {
            reply(r, get_required_by_id::<Review>(store, &review_id));
        }
        StateCommand::ListReviewsByTask { task_id, reply: r } => {
            reply(r, store.list::<Review>(&[Filter::eq("task_id", IndexValue::String(task_id))]).map_err(StateError::from));
        }
        StateCommand::SubmitVerdict { review_id, verdict, reply: r } => {
            let res = (|| {
                let mut review = get_required_by_id::<Review>(store, &review_id)?;
                if review.status != ReviewStatus::InProgress {
                    return Err(StateError::InvalidTransition(format!("review {review_id} is not in progress")));
                }
                if review.verdicts.iter().any(|v| v.reviewer_agent_id == verdict.reviewer_agent_id) {
                    return Err(StateError::Validation(format!(
                        "reviewer {} already submitted a verdict for {review_id}",
                        verdict.reviewer_agent_id
                    )));
                }
                review.verdicts.push(verdict);
                review.updated_at = store::now_ms();
                store.update(&review)?;
                Ok(review)
            })();
            reply(r, res);
        }
        StateCommand::FinalizeReview { review_id, status, final_verdict, reply: r } => {
            let res = (|| {
                let mut review = get_required_by_id::<Review>(store, &review_id)?;
                if review.status != ReviewStatus::InProgress {
                    return Ok(review);
                }
                review.status = status;
                review.final_verdict = final_verdict;
                review.updated_at = store::now_ms();
                review.completed_at = Some(review.updated_at);
                store.update(&review)?;
                Ok(review)
            })();
            if let Ok(ref rv) = res {
                if let Some(v) = rv.final_verdict {
                    let _ = events.send(StateEvent::ReviewFinalized { task_id: rv.task_id.clone(), review_id: rv.id.clone(), verdict: v });
                }
            }
            reply(r, res);
        }

        StateCommand::CreateHandover { handover, reply: r } => {
            let res = store.create(&handover).map(|_| handover.clone()).map_err(StateError::from);
            if res.is_ok() {
                let _ = events.send(StateEvent::HandoverCreated {
                    task_id: handover.task_id.clone(),
                    from_phase_index: handover.from_phase_index,
                });
            }
            reply(r, res);
        }
        StateCommand::GetHandover { task_id, from_phase_index, reply: r } => {
            let id = Handover::id_for(&task_id, from_phase_index);
            reply(r, store.get::<Handover>(&id).map_err(StateError::from));
        }
        StateCommand::ListHandovers { task_id, reply: r } => {
            reply(
                r,
                store
                    .list::<Handover>(&[Filter::eq("task_id", IndexValue::String(task_id))])
                    .map_err(StateError::from),
            );
        }

        StateCommand::GetTaskCounts { task_id, reply: r } => {
            let res = store
                .list::<Agent>(&[Filter::eq("task_id", IndexValue::String(task_id))])
                .map(|agents| {
                    let active = agents.iter().filter(|a| a.status.is_active()).count() as u32;
                    TaskCounts {
                        total_agents: agents.len() as u32,
                        active_agents: active,
                        terminal_agents: agents.len() as u32 - active,
                    }
                })
                .map_err(StateError::from);
            reply(r, res);
        }
        StateCommand::GetPhaseAgentCounts { task_id, phase_index, reply: r } => {
            let res = store
                .list::<Agent>(&[
                    Filter::eq("task_id", IndexValue::String(task_id)),
                    Filter::eq("phase_index", IndexValue::Int(phase_index)),
                ])
                .map(|agents| {
                    let active = agents.iter().filter(|a| a.status.is_active()).count() as u32;
                    PhaseAgentCounts {
                        total: agents.len() as u32,
                        active,
                        terminal: agents.len() as u32 - active,
                    }
                })
                .map_err(StateError::from);
            reply(r, res);
        }
        StateCommand::GetActiveCounts { reply: r } => {
            let res = (|| {
                let tasks = store.list::<Task>(&[])?;
                let agents = store.list::<Agent>(&[])?;
                Ok(GlobalCounts {
                    total_tasks: tasks.len() as u32,
                    active_tasks: tasks.iter().filter(|t| t.status == TaskStatus::Active).count() as u32,
                    total_active_agents: agents.iter().filter(|a| a.status.is_active()).count() as u32,
                })
            })()
            .map_err(|e: store::StoreError| StateError::from(e));
            reply(r, res);
        }

        StateCommand::Sync { reply: r } => {
            reply(r, store.sync().map_err(StateError::from));
        }
        StateCommand::Shutdown => unreachable!("handled in actor_loop"),
    }
}

fn get_required<R: Record>(store: &Store, id: &str) -> StateResult<R> {
    store
        .get::<R>(id)
        .map_err(StateError::from)?
        .ok_or_else(|| StateError::NotFound(format!("{}/{id}", R::collection_name())))
}

fn get_required_by_id<R: Record>(store: &Store, id: &str) -> StateResult<R> {
    get_required::<R>(store, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Priority, TaskContext, TaskLimits};

    async fn harness() -> StateManager {
        StateManager::spawn(format!("{}/state.sqlite3", tempfile::tempdir().unwrap().keep().display())).unwrap()
    }

    fn new_task() -> Task {
        Task::new(
            "Investigate the flaky checkout test".into(),
            Priority::P1,
            "/ws".into(),
            "/cwd".into(),
            TaskLimits::default(),
            TaskContext::default(),
        )
    }

    #[tokio::test]
    async fn create_and_get_task_roundtrip() {
        let mgr = harness().await;
        let task = new_task();
        let created = mgr.create_task(task.clone()).await.unwrap();
        let fetched = mgr.get_task(&created.id).await.unwrap();
        assert_eq!(fetched.id, task.id);
    }

    #[tokio::test]
    async fn mark_agent_terminal_is_exactly_once() {
        let mgr = harness().await;
        let task = mgr.create_task(new_task()).await.unwrap();
        let agent = Agent::new(
            task.id.clone(),
            "investigator".into(),
            "orchestrator".into(),
            1,
            0,
            "sess".into(),
            111,
            crate::domain::AgentFilePaths {
                prompt_file: "p".into(),
                stream_log: "s".into(),
                progress_log: "pr".into(),
                findings_log: "f".into(),
            },
        );
        mgr.create_agent(agent.clone()).await.unwrap();

        let (a1, transitioned1) = mgr.mark_agent_terminal(&agent.id, AgentStatus::Failed).await.unwrap();
        assert!(transitioned1);
        assert_eq!(a1.status, AgentStatus::Failed);

        // Repeated terminal marking (e.g. agent self-reports completed after
        // the daemon already marked it failed) must not re-fire.
        let (a2, transitioned2) = mgr.mark_agent_terminal(&agent.id, AgentStatus::Completed).await.unwrap();
        assert!(!transitioned2);
        assert_eq!(a2.status, AgentStatus::Failed);
    }

    #[tokio::test]
    async fn transition_phase_rejects_stale_version() {
        let mgr = harness().await;
        let task = mgr.create_task(new_task()).await.unwrap();
        let phase = Phase::new(task.id.clone(), 0, "Investigation".into(), "desc".into());
        mgr.create_phase(phase.clone()).await.unwrap();

        mgr.transition_phase(&task.id, 0, PhaseStatus::Active, 0, None).await.unwrap();
        let stale = mgr.transition_phase(&task.id, 0, PhaseStatus::AwaitingReview, 0, None).await;
        assert!(matches!(stale, Err(StateError::StaleVersion(_))));

        let ok = mgr.transition_phase(&task.id, 0, PhaseStatus::AwaitingReview, 1, None).await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn transition_phase_rejects_invalid_edge() {
        let mgr = harness().await;
        let task = mgr.create_task(new_task()).await.unwrap();
        let phase = Phase::new(task.id.clone(), 0, "Investigation".into(), "desc".into());
        mgr.create_phase(phase.clone()).await.unwrap();

        let res = mgr.transition_phase(&task.id, 0, PhaseStatus::Approved, 0, None).await;
        assert!(matches!(res, Err(StateError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn submit_verdict_rejects_duplicate_reviewer() {
        let mgr = harness().await;
        let task = mgr.create_task(new_task()).await.unwrap();
        let review = Review::new(task.id.clone(), 0, 2, true, vec!["reviewer-1".into(), "reviewer-2".into()]);
        mgr.create_review(review.clone()).await.unwrap();

        let v = Verdict {
            review_id: review.id.clone(),
            reviewer_agent_id: "reviewer-1".into(),
            verdict: VerdictValue::Approved,
            findings: Vec::new(),
            notes: String::new(),
            submitted_at: store::now_ms(),
        };
        mgr.submit_verdict(&review.id, v.clone()).await.unwrap();
        let dup = mgr.submit_verdict(&review.id, v).await;
        assert!(matches!(dup, Err(StateError::Validation(_))));
    }

    /// Spec §8 property 1: for any interleaving of spawn/terminal-transition
    /// operations across a small pool of agents, `active_agents` must equal
    /// the number of agents whose status is not terminal, checked after
    /// *every* operation rather than only at the end of the sequence.
    mod active_counter_property {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone, Copy)]
        enum AgentOp {
            Spawn(usize),
            Complete(usize),
            Fail(usize),
            Kill(usize),
        }

        const POOL_SIZE: usize = 5;

        fn op_strategy() -> impl Strategy<Value = AgentOp> {
            (0..POOL_SIZE).prop_flat_map(|i| {
                prop_oneof![
                    Just(AgentOp::Spawn(i)),
                    Just(AgentOp::Complete(i)),
                    Just(AgentOp::Fail(i)),
                    Just(AgentOp::Kill(i)),
                ]
            })
        }

        async fn run_ops(ops: &[AgentOp]) -> Vec<String> {
            let mgr = harness().await;
            let task = mgr.create_task(new_task()).await.unwrap();
            let mut ids: Vec<Option<String>> = vec![None; POOL_SIZE];
            let mut failures = Vec::new();

            for (step, op) in ops.iter().enumerate() {
                match *op {
                    AgentOp::Spawn(i) => {
                        if ids[i].is_none() {
                            let agent = Agent::new(
                                task.id.clone(),
                                "investigator".into(),
                                "orchestrator".into(),
                                1,
                                0,
                                format!("sess-{i}"),
                                100 + i as i32,
                                crate::domain::AgentFilePaths {
                                    prompt_file: "p".into(),
                                    stream_log: "s".into(),
                                    progress_log: "pr".into(),
                                    findings_log: "f".into(),
                                },
                            );
                            let created = mgr.create_agent(agent).await.unwrap();
                            ids[i] = Some(created.id);
                        }
                    }
                    AgentOp::Complete(i) => {
                        if let Some(id) = &ids[i] {
                            let _ = mgr.mark_agent_terminal(id, AgentStatus::Completed).await;
                        }
                    }
                    AgentOp::Fail(i) => {
                        if let Some(id) = &ids[i] {
                            let _ = mgr.mark_agent_terminal(id, AgentStatus::Failed).await;
                        }
                    }
                    AgentOp::Kill(i) => {
                        if let Some(id) = &ids[i] {
                            let _ = mgr.mark_agent_terminal(id, AgentStatus::Killed).await;
                        }
                    }
                }

                let counts = mgr.get_task_counts(&task.id).await.unwrap();
                let agents = mgr.list_agents_by_task(&task.id).await.unwrap();
                let expected = agents.iter().filter(|a| !a.status.is_terminal()).count() as u32;
                if counts.active_agents != expected {
                    failures.push(format!(
                        "after step {step} ({op:?}): active_agents={} expected={}",
                        counts.active_agents, expected
                    ));
                }
            }
            failures
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(48))]

            #[test]
            fn active_counter_invariant_holds_under_interleaving(
                ops in prop::collection::vec(op_strategy(), 1..40)
            ) {
                let rt = tokio::runtime::Runtime::new().unwrap();
                let failures = rt.block_on(run_ops(&ops));
                prop_assert!(failures.is_empty(), "active-counter invariant violated: {:?}", failures);
            }
        }
    }
}
