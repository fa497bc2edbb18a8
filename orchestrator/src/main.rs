//! `orc` - CLI entry point for the multi-agent orchestrator.
//!
//! Each invocation is a short-lived process: it loads configuration, opens
//! the workspace's state store, builds one [`EngineContext`] worth of
//! dependencies, dispatches the parsed subcommand, and exits. The state
//! store itself tolerates this (SQLite WAL + busy-timeout), so the CLI, the
//! background health daemon, and any concurrently-running `orc` invocation
//! all read and write the same workspace safely.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, FromArgMatches};
use eyre::{Context, Result, bail, eyre};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use orchestrator::cli::{Cli, Command, DaemonCommand, OutputFormat, generate_after_help};
use orchestrator::config::Config;
use orchestrator::daemon::{DaemonProcess, HealthDaemon};
use orchestrator::domain::{Finding, FindingType, Phase, Priority, Severity, Task, TaskContext, TaskLimits, Verdict, VerdictValue};
use orchestrator::engine::multiplexer::{Multiplexer, TmuxMultiplexer};
use orchestrator::engine::{self, EngineContext, EngineError};
use orchestrator::events::{Event, EventBus, create_event_bus};
use orchestrator::global_index::GlobalIndex;
use orchestrator::output::{OutputRequest, ResponseFormat};
use orchestrator::prompts::PromptLoader;
use orchestrator::state::StateManager;
use orchestrator::workspace::{GlobalLayout, WorkspaceLayout};

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    setup_logging(cli.log_level.as_deref()).context("failed to set up logging")?;

    let app = App::load(cli.config.as_deref()).context("failed to initialize orchestrator")?;
    let format = cli.format.clone();

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Some(Command::CreateTask { description, priority, phases, background }) => {
            cmd_create_task(&app, description, priority, phases, background, &format).await
        }
        Some(Command::GetTaskStatus { task_id }) => cmd_get_task_status(&app, &task_id, &format).await,
        Some(Command::ListTasks { status, all_workspaces, limit }) => {
            cmd_list_tasks(&app, status, all_workspaces, limit, &format).await
        }
        Some(Command::DeployAgent { task_id, agent_type, parent }) => {
            cmd_deploy_agent(&app, &task_id, &agent_type, parent, &format).await
        }
        Some(Command::SpawnChildAgent { task_id, parent_agent_id, agent_type }) => {
            cmd_spawn_child_agent(&app, &task_id, &parent_agent_id, &agent_type, &format).await
        }
        Some(Command::UpdateAgentProgress { task_id, agent_id, status, message, progress }) => {
            cmd_update_agent_progress(&app, &task_id, &agent_id, &status, message, progress).await
        }
        Some(Command::ReportAgentFinding { task_id, agent_id, finding_type, severity, message }) => {
            cmd_report_agent_finding(&app, &task_id, &agent_id, &finding_type, &severity, message).await
        }
        Some(Command::KillAgent { task_id, agent_id, reason }) => cmd_kill_agent(&app, &task_id, &agent_id, reason, &format).await,
        Some(Command::GetAgentOutput { task_id, agent_id, response_format, max_bytes }) => {
            cmd_get_agent_output(&app, &task_id, &agent_id, &response_format, max_bytes).await
        }
        Some(Command::RequestPhaseReview { task_id, phase_index }) => cmd_request_phase_review(&app, &task_id, phase_index, &format).await,
        Some(Command::SubmitReview { review_id, reviewer_agent_id, verdict, notes }) => {
            cmd_submit_review(&app, &review_id, &reviewer_agent_id, &verdict, notes, &format).await
        }
        Some(Command::ApprovePhase { task_id, phase_index }) => cmd_set_phase_outcome(&app, &task_id, phase_index, true, &format).await,
        Some(Command::RejectPhase { task_id, phase_index }) => cmd_set_phase_outcome(&app, &task_id, phase_index, false, &format).await,
        Some(Command::GetReviewStatus { task_id, review_id }) => cmd_get_review_status(&app, &task_id, &review_id, &format).await,
        Some(Command::GetPhaseHandover { task_id, phase_index }) => cmd_get_phase_handover(&app, &task_id, phase_index, &format).await,
        Some(Command::SubmitPhaseHandover { task_id, phase_index }) => cmd_submit_phase_handover(&app, &task_id, phase_index, &format).await,
        Some(Command::GetHandoverContext { task_id }) => cmd_get_handover_context(&app, &task_id).await,
        Some(Command::DashboardSummary) => cmd_dashboard_summary(&app, &format).await,
        Some(Command::Daemon { command }) => match command {
            DaemonCommand::Start { foreground } => cmd_daemon_start(app, foreground).await,
            DaemonCommand::Stop => cmd_daemon_stop(),
            DaemonCommand::Status { format } => cmd_daemon_status(&format),
            DaemonCommand::Ping => cmd_daemon_ping(),
        },
        Some(Command::DaemonRun) => cmd_daemon_run(app).await,
        None => {
            Cli::command().after_help(generate_after_help()).print_help()?;
            println!();
            Ok(())
        }
    }
}

/// Every owned dependency an [`EngineContext`] borrows from for the
/// lifetime of one CLI invocation.
struct App {
    config: Config,
    state: StateManager,
    events: Arc<EventBus>,
    multiplexer: Arc<dyn Multiplexer>,
    prompts: PromptLoader,
    layout: WorkspaceLayout,
    global_layout: GlobalLayout,
    workspace_path: String,
}

impl App {
    fn load(config_path: Option<&Path>) -> Result<Self> {
        let config = Config::load(config_path).context("failed to load configuration")?;
        let layout = WorkspaceLayout::new(&config.storage.workspace_base);
        layout.ensure_registry_dir().context("failed to create registry directory")?;

        let state = StateManager::spawn_with_mirror(layout.state_db_path(), layout.global_registry_json_path())
            .context("failed to open state store")?;

        let events = create_event_bus();
        let multiplexer: Arc<dyn Multiplexer> = Arc::new(TmuxMultiplexer);
        let prompts = PromptLoader::new(layout.base());
        let global_layout = GlobalLayout::new(&config.storage.global_dir);
        let workspace_path = std::env::current_dir().unwrap_or_default().to_string_lossy().to_string();

        info!(workspace = %workspace_path, "orc: initialized");
        Ok(Self { config, state, events, multiplexer, prompts, layout, global_layout, workspace_path })
    }

    fn ctx(&self) -> EngineContext<'_> {
        EngineContext {
            state: &self.state,
            events: self.events.as_ref(),
            multiplexer: self.multiplexer.as_ref(),
            prompts: &self.prompts,
            layout: &self.layout,
            config: &self.config,
        }
    }

    /// Best-effort handle onto the cross-workspace index; absent entirely
    /// rather than fatal if the global directory can't be opened, since
    /// every RPC operation here is scoped to the current workspace first.
    fn global_index(&self) -> Option<GlobalIndex> {
        GlobalIndex::open(&self.global_layout)
            .inspect_err(|e| tracing::warn!(error = %e, "orc: failed to open global index"))
            .ok()
    }

    /// Mirror a task's current state into the global index so `list_tasks
    /// --all-workspaces` and the daemon's global pass see it without this
    /// process staying alive.
    fn sync_global(&self, task: &Task) {
        if let Some(index) = self.global_index() {
            if let Err(e) = index.register_workspace(&self.workspace_path) {
                tracing::warn!(error = %e, "orc: failed to register workspace with global index");
            }
            if let Err(e) = index.upsert_task(task) {
                tracing::warn!(error = %e, "orc: failed to upsert task into global index");
            }
        }
    }
}

fn engine_err(e: EngineError) -> eyre::Error {
    eyre!("{e} [{}]", e.code())
}

fn emit<T: Serialize>(value: &T, _format: &OutputFormat) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_priority(s: &str) -> Result<Priority> {
    match s.to_lowercase().as_str() {
        "p0" => Ok(Priority::P0),
        "p1" => Ok(Priority::P1),
        "p2" => Ok(Priority::P2),
        "p3" => Ok(Priority::P3),
        other => bail!("invalid priority {other:?}, expected one of p0, p1, p2, p3 [validation_failed]"),
    }
}

fn parse_finding_type(s: &str) -> Result<FindingType> {
    match s.to_lowercase().as_str() {
        "issue" => Ok(FindingType::Issue),
        "solution" => Ok(FindingType::Solution),
        "insight" => Ok(FindingType::Insight),
        "recommendation" => Ok(FindingType::Recommendation),
        "blocker" => Ok(FindingType::Blocker),
        other => bail!("invalid finding_type {other:?}, expected issue, solution, insight, recommendation, or blocker [validation_failed]"),
    }
}

fn parse_severity(s: &str) -> Result<Severity> {
    match s.to_lowercase().as_str() {
        "low" => Ok(Severity::Low),
        "medium" => Ok(Severity::Medium),
        "high" => Ok(Severity::High),
        "critical" => Ok(Severity::Critical),
        other => bail!("invalid severity {other:?}, expected low, medium, high, or critical [validation_failed]"),
    }
}

fn parse_verdict(s: &str) -> Result<VerdictValue> {
    match s.to_lowercase().as_str() {
        "approved" | "approve" => Ok(VerdictValue::Approved),
        "rejected" | "reject" => Ok(VerdictValue::Rejected),
        "needs_revision" | "needs-revision" => Ok(VerdictValue::NeedsRevision),
        other => bail!("invalid verdict {other:?}, expected approved, rejected, or needs_revision [validation_failed]"),
    }
}

fn parse_task_status(s: &str) -> Result<orchestrator::domain::TaskStatus> {
    use orchestrator::domain::TaskStatus::*;
    match s.to_lowercase().as_str() {
        "initialized" => Ok(Initialized),
        "active" => Ok(Active),
        "completed" => Ok(Completed),
        "failed" => Ok(Failed),
        "cancelled" | "canceled" => Ok(Cancelled),
        other => bail!("invalid status {other:?} [validation_failed]"),
    }
}

/// Parse one `--phase name:description` occurrence.
fn parse_phase_spec(raw: &str) -> Result<(String, String)> {
    match raw.split_once(':') {
        Some((name, description)) if !name.trim().is_empty() => Ok((name.trim().to_string(), description.trim().to_string())),
        _ => bail!("invalid --phase {raw:?}, expected NAME:DESCRIPTION [validation_failed]"),
    }
}

async fn cmd_create_task(
    app: &App,
    description: String,
    priority: String,
    phase_specs: Vec<String>,
    background: Option<String>,
    format: &OutputFormat,
) -> Result<()> {
    if !(10..=500).contains(&description.chars().count()) {
        bail!("task description must be 10-500 characters [validation_failed]");
    }
    let priority = parse_priority(&priority)?;

    let phases: Vec<(String, String)> = if phase_specs.is_empty() {
        vec![("Implementation".to_string(), description.clone())]
    } else {
        phase_specs.iter().map(|s| parse_phase_spec(s)).collect::<Result<_>>()?
    };

    let mut context = TaskContext::default();
    context.background = background;

    let task = Task::new(description, priority, app.workspace_path.clone(), app.workspace_path.clone(), TaskLimits::default(), context);
    let task = app.state.create_task(task).await.map_err(EngineError::from).map_err(engine_err)?;

    app.layout.ensure_task_dirs(&task.id).context("failed to create task directory")?;

    for (index, (name, description)) in phases.into_iter().enumerate() {
        let phase = Phase::new(task.id.clone(), index as i64, name, description);
        app.state.create_phase(phase).await.map_err(EngineError::from).map_err(engine_err)?;
    }

    engine::phase::activate_phase(app.ctx(), &task.id, 0).await.map_err(engine_err)?;

    let task = app.state.get_task(&task.id).await.map_err(EngineError::from).map_err(engine_err)?;
    app.sync_global(&task);

    println!("Created task {}", task.id);
    emit(&task, format)
}

async fn cmd_get_task_status(app: &App, task_id: &str, format: &OutputFormat) -> Result<()> {
    let snapshot = engine::query::get_task(&app.state, &app.layout, task_id).await.map_err(engine_err)?;
    emit(&snapshot, format)
}

async fn cmd_list_tasks(app: &App, status: Option<String>, all_workspaces: bool, limit: Option<usize>, format: &OutputFormat) -> Result<()> {
    let status = status.map(|s| parse_task_status(&s)).transpose()?;
    let filter = engine::query::TaskListFilter { status, limit, ..Default::default() };
    let global = if all_workspaces { app.global_index() } else { None };
    let tasks = engine::query::list_tasks(&app.state, global.as_ref(), &filter).await.map_err(engine_err)?;
    emit(&tasks, format)
}

async fn cmd_deploy_agent(app: &App, task_id: &str, agent_type: &str, parent: Option<String>, format: &OutputFormat) -> Result<()> {
    let task = app.state.get_task(task_id).await.map_err(EngineError::from).map_err(engine_err)?;
    let req = match parent {
        Some(parent) => engine::lifecycle::SpawnRequest { agent_type: agent_type.to_string(), parent, depth: 1, is_reviewer: false, reviewed_phase_index: -1 },
        None => engine::lifecycle::SpawnRequest::top_level(agent_type),
    };
    let agent = engine::lifecycle::spawn_agent(app.ctx(), &task, req).await.map_err(engine_err)?;
    println!("Spawned agent {} (session {})", agent.id, agent.session_name);
    emit(&agent, format)
}

async fn cmd_spawn_child_agent(app: &App, task_id: &str, parent_agent_id: &str, agent_type: &str, format: &OutputFormat) -> Result<()> {
    let task = app.state.get_task(task_id).await.map_err(EngineError::from).map_err(engine_err)?;
    let parent = app.state.get_agent(parent_agent_id).await.map_err(EngineError::from).map_err(engine_err)?;
    let req = engine::lifecycle::SpawnRequest::child(agent_type, parent_agent_id, parent.depth + 1);
    let agent = engine::lifecycle::spawn_agent(app.ctx(), &task, req).await.map_err(engine_err)?;
    println!("Spawned child agent {} (parent {})", agent.id, parent_agent_id);
    emit(&agent, format)
}

async fn cmd_update_agent_progress(app: &App, task_id: &str, agent_id: &str, status: &str, message: String, progress: u8) -> Result<()> {
    engine::lifecycle::update_progress(app.ctx(), task_id, agent_id, status, message, progress).await.map_err(engine_err)?;
    println!("Recorded progress for {agent_id}: {status} ({progress}%)");
    Ok(())
}

async fn cmd_report_agent_finding(app: &App, task_id: &str, agent_id: &str, finding_type: &str, severity: &str, message: String) -> Result<()> {
    let finding_type = parse_finding_type(finding_type)?;
    let severity = parse_severity(severity)?;
    let agent = app.state.get_agent(agent_id).await.map_err(EngineError::from).map_err(engine_err)?;
    let finding = Finding::new(task_id.to_string(), agent_id.to_string(), agent.phase_index, finding_type, severity, message, None);
    let id = finding.id.clone();
    engine::lifecycle::report_finding(app.ctx(), finding).await.map_err(engine_err)?;
    println!("Recorded finding {id}");
    Ok(())
}

async fn cmd_kill_agent(app: &App, task_id: &str, agent_id: &str, reason: Option<String>, format: &OutputFormat) -> Result<()> {
    let agent = engine::lifecycle::terminate_agent(app.ctx(), task_id, agent_id, reason).await.map_err(engine_err)?;
    println!("Terminated agent {agent_id}");
    emit(&agent, format)
}

async fn cmd_get_agent_output(app: &App, task_id: &str, agent_id: &str, response_format: &str, max_bytes: Option<usize>) -> Result<()> {
    let format: ResponseFormat = response_format.parse().map_err(|e: String| eyre!("{e} [validation_failed]"))?;
    let path = app.layout.stream_log_path(task_id, agent_id);
    let request = OutputRequest { format, max_bytes };
    let output = orchestrator::output::read_agent_output(&path, &request, &app.config.output).context("failed to read agent output")?;
    print!("{output}");
    Ok(())
}

async fn cmd_request_phase_review(app: &App, task_id: &str, phase_index: i64, format: &OutputFormat) -> Result<()> {
    let task = app.state.get_task(task_id).await.map_err(EngineError::from).map_err(engine_err)?;
    let phase = app.state.get_phase(task_id, phase_index).await.map_err(EngineError::from).map_err(engine_err)?;
    let review = engine::review::trigger_auto_review(app.ctx(), &task, &phase).await.map_err(engine_err)?;
    println!("Triggered review {} for phase {phase_index}", review.id);
    emit(&review, format)
}

async fn cmd_submit_review(app: &App, review_id: &str, reviewer_agent_id: &str, verdict: &str, notes: String, format: &OutputFormat) -> Result<()> {
    let verdict_value = parse_verdict(verdict)?;
    let verdict = Verdict {
        review_id: review_id.to_string(),
        reviewer_agent_id: reviewer_agent_id.to_string(),
        verdict: verdict_value,
        findings: Vec::new(),
        notes,
        submitted_at: store::now_ms(),
    };
    let review = engine::review::submit_verdict(app.ctx(), review_id, verdict).await.map_err(engine_err)?;
    println!("Submitted verdict for review {review_id}");
    emit(&review, format)
}

async fn cmd_set_phase_outcome(app: &App, task_id: &str, phase_index: i64, approve: bool, format: &OutputFormat) -> Result<()> {
    let phase = engine::phase::manual_set_phase_outcome(app.ctx(), task_id, phase_index, approve).await.map_err(engine_err)?;
    println!("Phase {phase_index} of {task_id}: {}", if approve { "approved" } else { "rejected" });
    emit(&phase, format)
}

async fn cmd_get_review_status(app: &App, _task_id: &str, review_id: &str, format: &OutputFormat) -> Result<()> {
    let review = app.state.get_review(review_id).await.map_err(EngineError::from).map_err(engine_err)?;
    emit(&review, format)
}

async fn cmd_get_phase_handover(app: &App, task_id: &str, phase_index: i64, format: &OutputFormat) -> Result<()> {
    let handover = app
        .state
        .get_handover(task_id, phase_index)
        .await
        .map_err(EngineError::from)
        .map_err(engine_err)?
        .ok_or_else(|| eyre!("no handover for {task_id} phase {phase_index} [not_found]"))?;
    emit(&handover, format)
}

async fn cmd_submit_phase_handover(app: &App, task_id: &str, phase_index: i64, format: &OutputFormat) -> Result<()> {
    let task = app.state.get_task(task_id).await.map_err(EngineError::from).map_err(engine_err)?;
    let phase = app.state.get_phase(task_id, phase_index).await.map_err(EngineError::from).map_err(engine_err)?;
    let handover = engine::handover::generate_handover(app.ctx(), &task, &phase).await.map_err(engine_err)?;
    emit(&handover, format)
}

async fn cmd_get_handover_context(app: &App, task_id: &str) -> Result<()> {
    let task = app.state.get_task(task_id).await.map_err(EngineError::from).map_err(engine_err)?;
    let phase = app.state.get_phase(task_id, task.current_phase_index).await.map_err(EngineError::from).map_err(engine_err)?;
    let context = engine::context::accumulate(&app.state, &task, &phase, app.config.context.max_tokens, app.config.context.max_findings)
        .await
        .map_err(EngineError::from)
        .map_err(engine_err)?;
    print!("{context}");
    Ok(())
}

async fn cmd_dashboard_summary(app: &App, format: &OutputFormat) -> Result<()> {
    let global = app.global_index();
    let summary = engine::query::get_dashboard_summary(&app.state, global.as_ref()).await.map_err(engine_err)?;
    emit(&summary, format)
}

async fn cmd_daemon_start(app: App, foreground: bool) -> Result<()> {
    let process = DaemonProcess::new();
    if let Some(pid) = process.running_pid() {
        println!("Daemon already running (PID: {pid})");
        return Ok(());
    }

    if foreground {
        println!("Starting daemon in foreground...");
        process.register_self()?;
        run_daemon_loop(app).await
    } else {
        let pid = process.start()?;
        println!("Daemon started (PID: {pid})");
        Ok(())
    }
}

fn cmd_daemon_stop() -> Result<()> {
    let process = DaemonProcess::new();
    if process.running_pid().is_none() {
        println!("Daemon is not running");
        return Ok(());
    }
    process.stop()?;
    println!("Daemon stopped");
    Ok(())
}

fn cmd_daemon_status(format: &OutputFormat) -> Result<()> {
    let status = DaemonProcess::new().status();
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "running": status.running,
                    "registered_tasks": status.registered_tasks,
                    "scan_count": status.scan_count,
                }))?
            );
            Ok(())
        }
        OutputFormat::Text => {
            if status.running {
                println!("Daemon is running");
            } else {
                println!("Daemon is not running");
            }
            Ok(())
        }
    }
}

fn cmd_daemon_ping() -> Result<()> {
    let process = DaemonProcess::new();
    match process.running_pid() {
        Some(pid) if process.version_matches() => println!("Daemon is alive (PID: {pid})"),
        Some(pid) => println!("Daemon is alive (PID: {pid}, version mismatch with this binary)"),
        None => println!("Daemon is not running"),
    }
    Ok(())
}

/// Entry point for the hidden `daemon-run` subcommand: this process is the
/// re-exec'd child `DaemonProcess::start` spawned detached from the
/// parent's stdio.
async fn cmd_daemon_run(app: App) -> Result<()> {
    DaemonProcess::new().register_self().context("failed to register daemon pid")?;
    run_daemon_loop(app).await
}

/// Runs the health-scan loop plus a task-registration subscriber until
/// ctrl-c, mirroring how [`orchestrator::global_index::run_sync`] keeps its
/// own view current off the event bus rather than polling.
async fn run_daemon_loop(app: App) -> Result<()> {
    let App { config, state, events, multiplexer, prompts, layout, global_layout, .. } = app;
    let prompts = Arc::new(prompts);

    let daemon = HealthDaemon::new(state.clone(), events.clone(), multiplexer, prompts, layout, Some(global_layout), config);

    for task in state.list_tasks().await.map_err(EngineError::from).map_err(engine_err)? {
        if !task.status.is_terminal() {
            daemon.register_task(task.id);
        }
    }

    let registration = tokio::spawn(sync_daemon_registration(daemon.clone(), events));
    let loop_handle = tokio::spawn(daemon.clone().run());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("daemon: received interrupt, shutting down");
        }
        _ = loop_handle => {}
    }

    daemon.stop();
    registration.abort();
    Ok(())
}

async fn sync_daemon_registration(daemon: Arc<HealthDaemon>, events: Arc<EventBus>) {
    let mut rx = events.subscribe();
    loop {
        match rx.recv().await {
            Ok(Event::TaskCreated { task_id, .. }) => daemon.register_task(task_id),
            Ok(Event::TaskTransitioned { task_id, status }) => {
                if matches!(status.as_str(), "completed" | "failed" | "cancelled") {
                    daemon.unregister_task(&task_id);
                }
            }
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Configure tracing: a file under the platform's local-data directory, at
/// the level the `--log-level` flag requests (default INFO). Kept off
/// stdout so it never interleaves with the command's own output.
fn setup_logging(cli_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("orchestrator").join("logs");
    std::fs::create_dir_all(&log_dir).context("failed to create log directory")?;

    let level = match cli_log_level.map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") | None => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: unknown log level {other:?}, defaulting to INFO");
            tracing::Level::INFO
        }
    };

    let log_file = std::fs::File::create(log_dir.join("orchestrator.log")).context("failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("logging initialized (level: {:?})", level);
    Ok(())
}
