//! Agent lifecycle (§4.4): spawn via the multiplexer, progress and finding
//! ingestion, termination with process-tree verification and log archiving.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use crate::domain::{Agent, AgentFilePaths, AgentStatus, CleanupReport, CompletionValidation, Finding, PhaseStatus, ProgressEvent, Task, TaskStatus};
use crate::events::Event;
use crate::prompts::PromptSpec;

use super::{EngineContext, EngineError, EngineResult};

/// Parameters for spawning one agent. `deploy_agent` and `spawn_child_agent`
/// (§6) both funnel through [`spawn_agent`]; they differ only in how they
/// build this request.
pub struct SpawnRequest {
    pub agent_type: String,
    pub parent: String,
    pub depth: u32,
    pub is_reviewer: bool,
    /// Phase a reviewer is evaluating; ignored for non-reviewer requests,
    /// which always bind to the task's current phase.
    pub reviewed_phase_index: i64,
}

impl SpawnRequest {
    pub fn top_level(agent_type: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            parent: "orchestrator".into(),
            depth: 1,
            is_reviewer: false,
            reviewed_phase_index: -1,
        }
    }

    pub fn child(agent_type: impl Into<String>, parent: impl Into<String>, depth: u32) -> Self {
        Self {
            agent_type: agent_type.into(),
            parent: parent.into(),
            depth,
            is_reviewer: false,
            reviewed_phase_index: -1,
        }
    }

    pub fn reviewer(parent: impl Into<String>, reviewed_phase_index: i64) -> Self {
        Self {
            agent_type: "reviewer".into(),
            parent: parent.into(),
            depth: 1,
            is_reviewer: true,
            reviewed_phase_index,
        }
    }
}

/// Spawn one agent (§4.4 step 1-6): validate limits and phase binding,
/// render its prompt, hand it to the multiplexer, and register it.
pub async fn spawn_agent(ctx: EngineContext<'_>, task: &Task, req: SpawnRequest) -> EngineResult<Agent> {
    if req.depth > task.limits.max_depth {
        return Err(EngineError::LimitExceeded(format!(
            "depth {} exceeds task max_depth {}",
            req.depth, task.limits.max_depth
        )));
    }

    let counts = ctx.state.get_task_counts(&task.id).await?;
    if counts.total_agents >= task.limits.max_agents {
        return Err(EngineError::LimitExceeded(format!(
            "task {} already has {} agents (max_agents {})",
            task.id, counts.total_agents, task.limits.max_agents
        )));
    }
    if !req.is_reviewer && counts.active_agents >= task.limits.max_concurrent {
        return Err(EngineError::LimitExceeded(format!(
            "task {} already has {} active agents (max_concurrent {})",
            task.id, counts.active_agents, task.limits.max_concurrent
        )));
    }

    let phase_index = if req.is_reviewer { -1 } else { task.current_phase_index };
    if !req.is_reviewer {
        let phase = ctx.state.get_phase(&task.id, phase_index).await?;
        if phase.status != PhaseStatus::Active {
            return Err(EngineError::Validation(format!(
                "phase {phase_index} is not ACTIVE (status {:?})",
                phase.status
            )));
        }
    }

    let agent_id = crate::domain::generate_agent_id(&req.agent_type);
    let session_name = agent_id.clone();

    let files = AgentFilePaths {
        prompt_file: ctx.layout.prompt_file_path(&task.id, &agent_id).to_string_lossy().into_owned(),
        stream_log: ctx.layout.stream_log_path(&task.id, &agent_id).to_string_lossy().into_owned(),
        progress_log: ctx.layout.progress_log_path(&task.id, &agent_id).to_string_lossy().into_owned(),
        findings_log: ctx.layout.findings_log_path(&task.id, &agent_id).to_string_lossy().into_owned(),
    };

    let prompt_spec = if req.is_reviewer {
        PromptSpec::for_reviewer(&agent_id, &task.id, &task.description, req.reviewed_phase_index)
    } else {
        let phase = ctx.state.get_phase(&task.id, phase_index).await?;
        let context = super::context::accumulate(
            ctx.state,
            task,
            &phase,
            ctx.config.context.max_tokens,
            ctx.config.context.max_findings,
        )
        .await?;
        PromptSpec::for_agent(&agent_id, &req.agent_type, &task.id, &task.description, phase_index, Some(req.parent.clone()), req.depth)
            .with_accumulated_context(context)
    };

    let rendered = ctx.prompts.render(&prompt_spec).map_err(|e| EngineError::Prompt(e.to_string()))?;

    ctx.layout.ensure_task_dirs(&task.id)?;
    std::fs::write(&files.prompt_file, &rendered)?;

    let mut args = ctx.config.agent_command.args.clone();
    args.push(files.prompt_file.clone());
    let pid = ctx
        .multiplexer
        .create_session(&session_name, &ctx.config.agent_command.program, &args, Path::new(&task.workspace_path))
        .await?;

    let agent = Agent::new(task.id.clone(), req.agent_type.clone(), req.parent, req.depth, phase_index, session_name, pid, files);
    let created = ctx.state.create_agent(agent).await?;

    if let Ok(roster) = ctx.state.list_agents_by_task(&task.id).await {
        crate::registry::refresh(ctx.layout, &task.id, &roster);
    }

    ctx.events.emit(Event::AgentSpawned {
        task_id: task.id.clone(),
        agent_id: created.id.clone(),
        agent_type: created.agent_type.clone(),
        phase_index: created.phase_index,
    });

    if task.status == TaskStatus::Initialized {
        let updated = ctx.state.transition_task_to_active(&task.id).await?;
        ctx.events.emit(Event::TaskTransitioned {
            task_id: updated.id.clone(),
            status: updated.status.to_string(),
        });
    }

    info!(task_id = %task.id, agent_id = %created.id, agent_type = %created.agent_type, pid, "lifecycle: agent spawned");
    Ok(created)
}

/// Ingest one progress report (§4.4). Accepts reports from agents bound to a
/// non-current phase with a warning rather than rejecting them, matching the
/// backward-compatibility carve-out in the spec.
pub async fn update_progress(
    ctx: EngineContext<'_>,
    task_id: &str,
    agent_id: &str,
    status: &str,
    message: String,
    progress: u8,
) -> EngineResult<()> {
    let agent = ctx.state.get_agent(agent_id).await?;
    let task = ctx.state.get_task(task_id).await?;

    if !agent.is_reviewer() && agent.phase_index != task.current_phase_index {
        warn!(
            task_id, agent_id, agent_phase = agent.phase_index, current_phase = task.current_phase_index,
            "lifecycle: progress reported for non-current phase, accepted for backward compatibility"
        );
    }

    let event = ProgressEvent {
        timestamp: store::now_ms(),
        agent_id: agent_id.to_string(),
        status: status.to_string(),
        message,
        progress,
    };
    append_progress_jsonl(&ctx, task_id, agent_id, &event)?;
    ctx.state.record_progress(event).await?;

    ctx.events.emit(Event::AgentProgress {
        task_id: task_id.to_string(),
        agent_id: agent_id.to_string(),
        status: status.to_string(),
        progress,
    });

    let normalized = AgentStatus::normalize_legacy(status);
    if normalized.is_terminal() {
        finalize_terminal(ctx, &task, &agent, normalized, None).await?;
    }

    Ok(())
}

/// Append one finding (§4.4). Writing the JSONL line never blocks on the
/// state store insert; the audit trail is primary (§7 propagation policy).
pub async fn report_finding(ctx: EngineContext<'_>, finding: Finding) -> EngineResult<()> {
    append_finding_jsonl(&ctx, &finding)?;
    ctx.events.emit(Event::FindingReported {
        task_id: finding.task_id.clone(),
        agent_id: finding.agent_id.clone(),
        phase_index: finding.phase_index,
        severity: format!("{:?}", finding.severity),
    });
    ctx.state.record_finding(finding).await?;
    Ok(())
}

/// `kill_agent` (§6): terminate and clean up on user request. A no-op
/// returning the current row if the agent is already terminal.
pub async fn terminate_agent(ctx: EngineContext<'_>, task_id: &str, agent_id: &str, reason: Option<String>) -> EngineResult<Agent> {
    let task = ctx.state.get_task(task_id).await?;
    let agent = ctx.state.get_agent(agent_id).await?;
    if agent.status.is_terminal() {
        return Ok(agent);
    }
    finalize_terminal(ctx, &task, &agent, AgentStatus::Terminated, reason).await?;
    ctx.state.get_agent(agent_id).await.map_err(EngineError::from)
}

/// Mark an agent dead as detected by the health daemon (session gone, pid
/// dead, or stuck past the stale threshold): same terminal-transition
/// bookkeeping as a self-report or user kill.
pub async fn mark_dead(ctx: EngineContext<'_>, task_id: &str, agent_id: &str, reason: String) -> EngineResult<()> {
    let task = ctx.state.get_task(task_id).await?;
    let agent = ctx.state.get_agent(agent_id).await?;
    if agent.status.is_terminal() {
        return Ok(());
    }
    finalize_terminal(ctx, &task, &agent, AgentStatus::Failed, Some(reason)).await
}

/// Exactly-once terminal-transition bookkeeping (§5): completion validation,
/// resource cleanup, phase-completion check / reviewer-dead handling. Gated
/// on `mark_agent_terminal`'s own exactly-once guarantee, so calling this
/// twice for the same agent only does work once.
async fn finalize_terminal(ctx: EngineContext<'_>, task: &Task, agent: &Agent, status: AgentStatus, reason: Option<String>) -> EngineResult<()> {
    let (updated, transitioned) = ctx.state.mark_agent_terminal(&agent.id, status).await?;
    if !transitioned {
        return Ok(());
    }

    ctx.events.emit(Event::AgentTerminal {
        task_id: task.id.clone(),
        agent_id: updated.id.clone(),
        status: updated.status,
        reason: reason.clone(),
    });

    if matches!(updated.status, AgentStatus::Completed | AgentStatus::PhaseCompleted) {
        let validation = validate_completion(&ctx, &updated).await;
        let mut with_validation = updated.clone();
        with_validation.validation = Some(validation);
        ctx.state.update_agent(with_validation).await?;
    }

    let report = cleanup_agent(&ctx, &updated).await;
    let mut with_cleanup = ctx.state.get_agent(&updated.id).await?;
    with_cleanup.cleanup = Some(report);
    ctx.state.update_agent(with_cleanup).await?;

    if let Ok(roster) = ctx.state.list_agents_by_task(&task.id).await {
        crate::registry::refresh(ctx.layout, &task.id, &roster);
    }

    if updated.is_reviewer() {
        handle_reviewer_terminal(ctx, task, &updated).await?;
    } else {
        super::phase::check_phase_completion(ctx, &task.id, updated.phase_index).await?;
    }

    Ok(())
}

async fn handle_reviewer_terminal(ctx: EngineContext<'_>, task: &Task, agent: &Agent) -> EngineResult<()> {
    let reviews = ctx.state.list_reviews_by_task(&task.id).await?;
    for review in reviews
        .into_iter()
        .filter(|r| r.status == crate::domain::ReviewStatus::InProgress && r.reviewer_agent_ids.contains(&agent.id))
    {
        super::review::handle_reviewer_dead(ctx, task, &review).await?;
    }
    Ok(())
}

/// Non-blocking heuristic confidence score attached when an agent
/// self-reports `completed` (§4.4). Never refuses the transition.
async fn validate_completion(ctx: &EngineContext<'_>, agent: &Agent) -> CompletionValidation {
    let mut warnings = Vec::new();
    let mut confidence: f32 = 1.0;

    match ctx.state.get_agent_progress_latest(&agent.id).await {
        Ok(Some(latest)) if latest.progress < 100 => {
            warnings.push(format!("agent reported completed at progress {}", latest.progress));
            confidence -= 0.3;
        }
        Ok(None) => {
            warnings.push("no progress history recorded before completion".to_string());
            confidence -= 0.4;
        }
        _ => {}
    }

    if store::now_ms() - agent.created_at < 5_000 {
        warnings.push("agent completed suspiciously quickly".to_string());
        confidence -= 0.3;
    }

    CompletionValidation {
        confidence: confidence.max(0.0),
        warnings,
    }
}

/// Resource cleanup on termination (§4.4): kill the session, verify the
/// process tree, delete the prompt file, archive logs. Every step is
/// best-effort; failures are recorded but never mask the terminal
/// transition that already happened.
async fn cleanup_agent(ctx: &EngineContext<'_>, agent: &Agent) -> CleanupReport {
    let mut report = CleanupReport::default();

    if ctx.multiplexer.session_exists(&agent.session_name).await {
        match ctx.multiplexer.kill_session(&agent.session_name).await {
            Ok(()) => report.session_killed = true,
            Err(e) => report.errors.push(format!("kill_session: {e}")),
        }
    } else {
        report.session_killed = true;
    }

    for delay_ms in [100, 300, 800] {
        if !process_alive(agent.pid) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
    if process_alive(agent.pid) {
        match kill_pid(agent.pid) {
            Ok(()) => report.orphans_killed.push(agent.pid),
            Err(e) => {
                report.errors.push(format!("sigkill {}: {e}", agent.pid));
                report.orphan_survivors.push(agent.pid);
            }
        }
    }

    match std::fs::remove_file(&agent.files.prompt_file) {
        Ok(()) => report.prompt_file_deleted = true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => report.prompt_file_deleted = true,
        Err(e) => report.errors.push(format!("prompt file removal: {e}")),
    }

    if ctx.config.storage.keep_logs {
        match archive_logs(ctx, agent).await {
            Ok(()) => report.logs_archived = true,
            Err(e) => report.errors.push(format!("log archive: {e}")),
        }
    }

    report
}

pub(crate) fn process_alive(pid: i32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

fn kill_pid(pid: i32) -> std::io::Result<()> {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), nix::sys::signal::Signal::SIGKILL)
        .map_err(|e| std::io::Error::from_raw_os_error(e as i32))
}

/// Move an agent's log files into the task's archive directory, waiting
/// briefly for file-size stability so we never truncate a live writer.
async fn archive_logs(ctx: &EngineContext<'_>, agent: &Agent) -> std::io::Result<()> {
    let archive_dir = ctx.layout.archive_dir(&agent.task_id);
    std::fs::create_dir_all(&archive_dir)?;

    for path_str in [&agent.files.stream_log, &agent.files.progress_log, &agent.files.findings_log] {
        let path = Path::new(path_str);
        if !path.exists() {
            continue;
        }
        if !wait_for_size_stable(path).await {
            warn!(?path, "lifecycle: log size did not stabilize before archiving, moving anyway");
        }
        let dest = archive_dir.join(path.file_name().unwrap_or_default());
        if let Err(rename_err) = std::fs::rename(path, &dest) {
            // Cross-device rename (archive dir on another filesystem): fall
            // back to a tolerant copy+remove rather than losing the log.
            std::fs::copy(path, &dest)?;
            std::fs::remove_file(path)?;
            warn!(?path, %rename_err, "lifecycle: rename failed, fell back to copy+remove");
        }
    }
    Ok(())
}

async fn wait_for_size_stable(path: &Path) -> bool {
    let mut last = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let current = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if current == last {
            return true;
        }
        last = current;
    }
    false
}

fn append_progress_jsonl(ctx: &EngineContext<'_>, task_id: &str, agent_id: &str, event: &ProgressEvent) -> EngineResult<()> {
    let path = ctx.layout.progress_log_path(task_id, agent_id);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(event).map_err(|e| EngineError::Validation(e.to_string()))?;
    writeln!(file, "{line}")?;
    Ok(())
}

fn append_finding_jsonl(ctx: &EngineContext<'_>, finding: &Finding) -> EngineResult<()> {
    let path = ctx.layout.findings_log_path(&finding.task_id, &finding.agent_id);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(finding).map_err(|e| EngineError::Validation(e.to_string()))?;
    writeln!(file, "{line}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::domain::{Priority, TaskContext, TaskLimits};
    use crate::engine::multiplexer::MockMultiplexer;
    use crate::events::EventBus;
    use crate::prompts::PromptLoader;
    use crate::state::StateManager;

    async fn harness() -> (StateManager, EventBus, MockMultiplexer, PromptLoader, crate::workspace::WorkspaceLayout, Config, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let state = StateManager::spawn(dir.path().join("state.sqlite3")).unwrap();
        let events = EventBus::new(64);
        let mux = MockMultiplexer::new();
        let prompts = PromptLoader::embedded_only();
        let layout = crate::workspace::WorkspaceLayout::new(dir.path());
        let config = Config::default();
        (state, events, mux, prompts, layout, config, dir)
    }

    fn new_task(workspace: &str) -> Task {
        Task::new(
            "Investigate the flaky checkout test".into(),
            Priority::P1,
            workspace.into(),
            "/cwd".into(),
            TaskLimits::default(),
            TaskContext::default(),
        )
    }

    #[tokio::test]
    async fn spawn_agent_activates_task_and_binds_current_phase() {
        let (state, events, mux, prompts, layout, config, dir) = harness().await;
        let ctx = EngineContext { state: &state, events: &events, multiplexer: &mux, prompts: &prompts, layout: &layout, config: &config };

        let task = state.create_task(new_task(&dir.path().to_string_lossy())).await.unwrap();
        let phase = crate::domain::Phase::new(task.id.clone(), 0, "Investigation".into(), "desc".into());
        state.create_phase(phase).await.unwrap();
        state.transition_phase(&task.id, 0, PhaseStatus::Active, 0, None).await.unwrap();

        let req = SpawnRequest::top_level("investigator");
        let agent = spawn_agent(ctx, &task, req).await.unwrap();
        assert_eq!(agent.phase_index, 0);
        assert_eq!(agent.status, AgentStatus::Running);

        let reloaded = state.get_task(&task.id).await.unwrap();
        assert_eq!(reloaded.status, TaskStatus::Active);
    }

    #[tokio::test]
    async fn spawn_agent_rejects_when_phase_not_active() {
        let (state, events, mux, prompts, layout, config, dir) = harness().await;
        let ctx = EngineContext { state: &state, events: &events, multiplexer: &mux, prompts: &prompts, layout: &layout, config: &config };

        let task = state.create_task(new_task(&dir.path().to_string_lossy())).await.unwrap();
        let phase = crate::domain::Phase::new(task.id.clone(), 0, "Investigation".into(), "desc".into());
        state.create_phase(phase).await.unwrap();

        let req = SpawnRequest::top_level("investigator");
        let err = spawn_agent(ctx, &task, req).await.unwrap_err();
        assert_eq!(err.code(), "validation_failed");
    }

    #[tokio::test]
    async fn update_progress_to_completed_marks_agent_terminal_and_cleans_up() {
        let (state, events, mux, prompts, layout, config, dir) = harness().await;
        let ctx = EngineContext { state: &state, events: &events, multiplexer: &mux, prompts: &prompts, layout: &layout, config: &config };

        let task = state.create_task(new_task(&dir.path().to_string_lossy())).await.unwrap();
        let phase = crate::domain::Phase::new(task.id.clone(), 0, "Investigation".into(), "desc".into());
        state.create_phase(phase).await.unwrap();
        state.transition_phase(&task.id, 0, PhaseStatus::Active, 0, None).await.unwrap();

        let agent = spawn_agent(ctx, &task, SpawnRequest::top_level("investigator")).await.unwrap();
        assert!(mux.session_exists(&agent.session_name).await);

        update_progress(ctx, &task.id, &agent.id, "completed", "done".into(), 100).await.unwrap();

        let reloaded = state.get_agent(&agent.id).await.unwrap();
        assert_eq!(reloaded.status, AgentStatus::Completed);
        assert!(reloaded.cleanup.unwrap().session_killed);
        assert!(!mux.session_exists(&agent.session_name).await);
    }
}
