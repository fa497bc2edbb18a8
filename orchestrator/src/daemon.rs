//! Health daemon (§4.7): a background scan loop that detects agents whose
//! multiplexer session, subprocess, or stream log has gone quiet, and the
//! PID-file-based process supervision that lets it run detached from the
//! foreground orchestrator process.
//!
//! The process-supervision half (`DaemonProcess`) mirrors the codebase's own
//! daemon manager: a PID file plus a version file under the runtime
//! directory, signal-0 liveness probes, and a graceful-SIGTERM-then-SIGKILL
//! stop sequence. The scan loop half (`HealthDaemon`) is the in-process
//! component that actually walks registered tasks every `scan_interval`.

use std::collections::HashSet;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::domain::Agent;
use crate::engine::multiplexer::Multiplexer;
use crate::engine::{lifecycle, EngineContext, EngineError};
use crate::events::EventBus;
use crate::global_index::GlobalIndex;
use crate::prompts::PromptLoader;
use crate::state::StateManager;
use crate::workspace::{GlobalLayout, WorkspaceLayout};

/// Argument the orchestrator binary re-invokes itself with to become the
/// detached daemon process; the CLI layer dispatches this to [`HealthDaemon::run`].
pub const DAEMON_RUN_ARG: &str = "daemon-run";

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("daemon already running with pid {0}")]
    AlreadyRunning(u32),
    #[error("daemon is not running")]
    NotRunning,
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

type DaemonResult<T> = Result<T, DaemonError>;

/// Reasons the health daemon marks an agent failed (§7 `Health` taxonomy).
/// `ClaudeProcessDead`/`CursorProcessDead` both cover "the configured agent
/// subprocess died"; which one fires depends on `agent_command.program`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthReason {
    TmuxSessionDead,
    ClaudeProcessDead,
    CursorProcessDead,
    AgentStuck,
}

impl HealthReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TmuxSessionDead => "tmux_session_dead",
            Self::ClaudeProcessDead => "claude_process_dead",
            Self::CursorProcessDead => "cursor_process_dead",
            Self::AgentStuck => "agent_stuck",
        }
    }
}

/// Outcome of one scan pass, returned by `trigger_scan` and kept for
/// `get_status`.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub agents_checked: u32,
    pub agents_marked_dead: u32,
    pub is_global_pass: bool,
}

#[derive(Debug, Clone)]
pub struct DaemonStatus {
    pub running: bool,
    pub registered_tasks: usize,
    pub scan_count: u64,
    pub last_scan: Option<ScanOutcome>,
}

/// The in-process scan loop. Owns clones/handles of everything an
/// `EngineContext` needs so it can run unattended on its own `tokio::spawn`
/// task for the lifetime of the process.
pub struct HealthDaemon {
    state: StateManager,
    events: Arc<EventBus>,
    multiplexer: Arc<dyn Multiplexer>,
    prompts: Arc<PromptLoader>,
    layout: WorkspaceLayout,
    global: Option<GlobalLayout>,
    config: Config,
    tasks: Mutex<HashSet<String>>,
    scan_count: AtomicU64,
    last_scan: Mutex<Option<ScanOutcome>>,
    stop: Notify,
    running: std::sync::atomic::AtomicBool,
}

impl HealthDaemon {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: StateManager,
        events: Arc<EventBus>,
        multiplexer: Arc<dyn Multiplexer>,
        prompts: Arc<PromptLoader>,
        layout: WorkspaceLayout,
        global: Option<GlobalLayout>,
        config: Config,
    ) -> Arc<Self> {
        Arc::new(Self {
            state,
            events,
            multiplexer,
            prompts,
            layout,
            global,
            config,
            tasks: Mutex::new(HashSet::new()),
            scan_count: AtomicU64::new(0),
            last_scan: Mutex::new(None),
            stop: Notify::new(),
            running: std::sync::atomic::AtomicBool::new(false),
        })
    }

    fn ctx(&self) -> EngineContext<'_> {
        EngineContext {
            state: &self.state,
            events: &self.events,
            multiplexer: self.multiplexer.as_ref(),
            prompts: &self.prompts,
            layout: &self.layout,
            config: &self.config,
        }
    }

    pub fn register_task(&self, task_id: impl Into<String>) {
        let task_id = task_id.into();
        debug!(%task_id, "HealthDaemon::register_task");
        self.tasks.lock().unwrap().insert(task_id);
    }

    pub fn unregister_task(&self, task_id: &str) {
        debug!(%task_id, "HealthDaemon::unregister_task");
        self.tasks.lock().unwrap().remove(task_id);
    }

    pub fn get_status(&self) -> DaemonStatus {
        DaemonStatus {
            running: self.running.load(Ordering::SeqCst),
            registered_tasks: self.tasks.lock().unwrap().len(),
            scan_count: self.scan_count.load(Ordering::SeqCst),
            last_scan: self.last_scan.lock().unwrap().clone(),
        }
    }

    /// Run the cooperative scan loop until `stop` is signaled. Intended to
    /// be handed to `tokio::spawn`.
    pub async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        info!(scan_interval_secs = self.config.daemon.scan_interval_secs, "health daemon: loop starting");
        let interval = Duration::from_secs(self.config.daemon.scan_interval_secs.max(1));

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.stop.notified() => break,
            }
            let outcome = self.trigger_scan().await;
            debug!(?outcome, "health daemon: scan complete");
        }

        self.running.store(false, Ordering::SeqCst);
        info!("health daemon: loop stopped");
    }

    /// Ask the loop to stop after its current sleep/scan. Does not block.
    pub fn stop(&self) {
        self.stop.notify_one();
    }

    /// Synchronous one-shot scan (§4.7 `trigger_scan`), also the loop body.
    /// Per-scan failures are logged and never propagated: one bad task must
    /// never stop the daemon from checking the rest.
    pub async fn trigger_scan(&self) -> ScanOutcome {
        let scan_index = self.scan_count.fetch_add(1, Ordering::SeqCst) + 1;
        let is_global = self.config.daemon.global_pass_every > 0 && scan_index % self.config.daemon.global_pass_every as u64 == 0;

        let task_ids: Vec<String> = self.tasks.lock().unwrap().iter().cloned().collect();
        let mut checked = 0u32;
        let mut dead = 0u32;

        for task_id in &task_ids {
            match self.scan_task(task_id).await {
                Ok((c, d)) => {
                    checked += c;
                    dead += d;
                }
                Err(e) => warn!(%task_id, error = %e, "health daemon: scan failed for task"),
            }
        }

        if is_global {
            match self.global_pass().await {
                Ok(d) => dead += d,
                Err(e) => warn!(error = %e, "health daemon: global pass failed"),
            }
        }

        let outcome = ScanOutcome { agents_checked: checked, agents_marked_dead: dead, is_global_pass: is_global };
        *self.last_scan.lock().unwrap() = Some(outcome.clone());
        outcome
    }

    async fn scan_task(&self, task_id: &str) -> Result<(u32, u32), EngineError> {
        let ctx = self.ctx();
        let agents = ctx.state.list_agents_by_task(task_id).await?;

        let mut checked = 0u32;
        let mut dead = 0u32;
        for agent in agents.into_iter().filter(|a| a.status.is_active()) {
            checked += 1;
            if let Some(reason) = self.check_liveness(&ctx, &agent).await {
                info!(task_id, agent_id = %agent.id, reason = reason.as_str(), "health daemon: marking agent dead");
                lifecycle::mark_dead(ctx, task_id, &agent.id, reason.as_str().to_string()).await?;
                dead += 1;
            }
        }
        Ok((checked, dead))
    }

    /// The three liveness checks of §4.7, in order: session existence, pid
    /// liveness, stream-log staleness. The first failure wins.
    async fn check_liveness(&self, ctx: &EngineContext<'_>, agent: &Agent) -> Option<HealthReason> {
        if !ctx.multiplexer.session_exists(&agent.session_name).await {
            return Some(HealthReason::TmuxSessionDead);
        }

        if !lifecycle::process_alive(agent.pid) {
            return Some(if self.config.agent_command.program.contains("cursor") {
                HealthReason::CursorProcessDead
            } else {
                HealthReason::ClaudeProcessDead
            });
        }

        let stale_after = Duration::from_secs(self.config.daemon.stuck_threshold_secs);
        if is_stream_log_stale(Path::new(&agent.files.stream_log), stale_after) {
            return Some(HealthReason::AgentStuck);
        }

        None
    }

    /// Every `global_pass_every`th scan (§4.7): walk every workspace the
    /// global index knows about and mark agents whose session no longer
    /// exists as failed, even for tasks this process never registered
    /// locally. Opens each foreign workspace's own store directly rather
    /// than through a `StateManager` actor, since this pass is infrequent
    /// maintenance rather than the hot command path the actor exists to
    /// serialize.
    async fn global_pass(&self) -> Result<u32, EngineError> {
        let Some(global) = &self.global else {
            return Ok(0);
        };
        let index = GlobalIndex::open(global).map_err(|e| EngineError::Io(std::io::Error::other(e.to_string())))?;
        let entries = index.list_tasks().map_err(|e| EngineError::Io(std::io::Error::other(e.to_string())))?;

        let mut dead = 0u32;
        for entry in entries.iter().filter(|e| !e.status.is_terminal()) {
            let db_path = Path::new(&entry.workspace_path).join("registry").join("state.sqlite3");
            if !db_path.exists() {
                continue;
            }
            let store = match store::Store::open(&db_path) {
                Ok(s) => s,
                Err(e) => {
                    warn!(workspace = %entry.workspace_path, error = %e, "health daemon: global pass could not open foreign workspace store");
                    continue;
                }
            };
            let agents: Vec<Agent> = match store.list::<Agent>(&[store::Filter::eq(
                "task_id",
                store::IndexValue::String(entry.task_id.clone()),
            )]) {
                Ok(a) => a,
                Err(e) => {
                    warn!(task_id = %entry.task_id, error = %e, "health daemon: global pass could not list agents");
                    continue;
                }
            };

            for mut agent in agents.into_iter().filter(|a| a.status.is_active()) {
                if self.multiplexer.session_exists(&agent.session_name).await {
                    continue;
                }
                agent.status = crate::domain::AgentStatus::Failed;
                agent.updated_at = store::now_ms();
                agent.completed_at = Some(agent.updated_at);
                if let Err(e) = store.update(&agent) {
                    warn!(agent_id = %agent.id, error = %e, "health daemon: global pass failed to mark agent dead");
                    continue;
                }
                dead += 1;
            }
        }

        Ok(dead)
    }
}

fn is_stream_log_stale(path: &Path, threshold: Duration) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        // No log yet: the agent hasn't started writing. Not our call to
        // make stuck; the pid/session checks already ran first.
        return false;
    };
    match meta.modified() {
        Ok(modified) => modified.elapsed().map(|elapsed| elapsed > threshold).unwrap_or(false),
        Err(_) => false,
    }
}

fn default_pid_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("orchestrator")
        .join("orchestrator.pid")
}

fn default_version_path() -> PathBuf {
    default_pid_path().with_extension("version")
}

/// Current build version, used to detect a stale daemon left running by an
/// older binary.
pub const VERSION: &str = env!("GIT_DESCRIBE");

/// PID-file-based process supervision (§4.7 "Process model"). Spawns and
/// tracks the detached daemon process; does not itself run the scan loop
/// (that's [`HealthDaemon::run`], invoked by the re-exec'd child via
/// [`DAEMON_RUN_ARG`]).
#[derive(Debug)]
pub struct DaemonProcess {
    pid_file: PathBuf,
    version_file: PathBuf,
}

impl Default for DaemonProcess {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonProcess {
    pub fn new() -> Self {
        Self {
            pid_file: default_pid_path(),
            version_file: default_version_path(),
        }
    }

    pub fn with_pid_file(pid_file: PathBuf) -> Self {
        let version_file = pid_file.with_extension("version");
        Self { pid_file, version_file }
    }

    pub fn pid_file(&self) -> &PathBuf {
        &self.pid_file
    }

    pub fn is_running(&self) -> bool {
        self.read_pid().is_some_and(is_process_running)
    }

    pub fn running_pid(&self) -> Option<u32> {
        self.read_pid().filter(|&pid| is_process_running(pid))
    }

    fn read_pid(&self) -> Option<u32> {
        let mut contents = String::new();
        fs::File::open(&self.pid_file).ok()?.read_to_string(&mut contents).ok()?;
        contents.trim().parse().ok()
    }

    fn write_pid(&self, pid: u32) -> DaemonResult<()> {
        if let Some(parent) = self.pid_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&self.pid_file)?;
        write!(file, "{pid}")?;
        Ok(())
    }

    fn remove_pid_file(&self) -> DaemonResult<()> {
        if self.pid_file.exists() {
            fs::remove_file(&self.pid_file)?;
        }
        Ok(())
    }

    fn write_version(&self, version: &str) -> DaemonResult<()> {
        if let Some(parent) = self.version_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&self.version_file)?;
        write!(file, "{version}")?;
        Ok(())
    }

    pub fn read_version(&self) -> Option<String> {
        let mut contents = String::new();
        fs::File::open(&self.version_file).ok()?.read_to_string(&mut contents).ok()?;
        Some(contents.trim().to_string())
    }

    fn remove_version_file(&self) -> DaemonResult<()> {
        if self.version_file.exists() {
            fs::remove_file(&self.version_file)?;
        }
        Ok(())
    }

    pub fn version_matches(&self) -> bool {
        self.read_version().is_some_and(|v| v == VERSION)
    }

    /// Re-exec the current binary with [`DAEMON_RUN_ARG`], detached from
    /// this process's stdio, and record its pid. Refuses (signal-0 probe)
    /// if a live daemon already owns the PID file.
    pub fn start(&self) -> DaemonResult<u32> {
        if let Some(pid) = self.running_pid() {
            return Err(DaemonError::AlreadyRunning(pid));
        }

        let exe = std::env::current_exe()?;
        let child = std::process::Command::new(&exe)
            .arg(DAEMON_RUN_ARG)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()?;

        let pid = child.id();
        self.write_pid(pid)?;
        self.write_version(VERSION)?;
        info!(pid, "daemon process started");
        Ok(pid)
    }

    /// Graceful SIGTERM, poll for exit with a bounded retry count and
    /// escalating sleeps, then an unconditional SIGKILL if it outlives the
    /// poll budget.
    pub fn stop(&self) -> DaemonResult<()> {
        let pid = self.running_pid().ok_or(DaemonError::NotRunning)?;
        info!(pid, "stopping daemon process");

        #[cfg(unix)]
        {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }

        let mut attempts = 0;
        while is_process_running(pid) && attempts < 50 {
            std::thread::sleep(Duration::from_millis(100));
            attempts += 1;
        }

        if is_process_running(pid) {
            warn!(pid, "daemon did not stop gracefully, sending SIGKILL");
            #[cfg(unix)]
            {
                use nix::sys::signal::{Signal, kill};
                use nix::unistd::Pid;
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
            }
        }

        self.remove_pid_file()?;
        self.remove_version_file()?;
        info!(pid, "daemon process stopped");
        Ok(())
    }

    /// Called by the re-exec'd child itself, once it has started the scan
    /// loop, to register its own pid under the file the parent's `start`
    /// already wrote a provisional entry for.
    pub fn register_self(&self) -> DaemonResult<()> {
        let pid = std::process::id();
        self.write_pid(pid)?;
        self.write_version(VERSION)?;
        Ok(())
    }

    pub fn status(&self) -> DaemonStatus {
        DaemonStatus {
            running: self.is_running(),
            registered_tasks: 0,
            scan_count: 0,
            last_scan: None,
        }
    }
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::domain::{AgentFilePaths, AgentStatus, Priority, Task, TaskContext, TaskLimits};
    use crate::engine::multiplexer::MockMultiplexer;

    fn new_task(workspace: &str) -> Task {
        Task::new("Investigate the flaky checkout test".into(), Priority::P1, workspace.into(), "/cwd".into(), TaskLimits::default(), TaskContext::default())
    }

    #[tokio::test]
    async fn scan_marks_agent_dead_when_session_missing() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateManager::spawn(dir.path().join("state.sqlite3")).unwrap();
        let events = Arc::new(EventBus::new(64));
        let mux = Arc::new(MockMultiplexer::new());
        let prompts = Arc::new(PromptLoader::embedded_only());
        let layout = WorkspaceLayout::new(dir.path());
        let config = Config::default();

        let task = state.create_task(new_task(&dir.path().to_string_lossy())).await.unwrap();
        let phase = crate::domain::Phase::new(task.id.clone(), 0, "Investigation".into(), "desc".into());
        state.create_phase(phase).await.unwrap();
        state.transition_phase(&task.id, 0, crate::domain::PhaseStatus::Active, 0, None).await.unwrap();

        let agent = Agent::new(
            task.id.clone(),
            "investigator".into(),
            "orchestrator".into(),
            1,
            0,
            "ghost-session".into(),
            999_999,
            AgentFilePaths {
                prompt_file: "p".into(),
                stream_log: dir.path().join("missing_stream.jsonl").to_string_lossy().into_owned(),
                progress_log: "pr".into(),
                findings_log: "f".into(),
            },
        );
        state.create_agent(agent.clone()).await.unwrap();

        let daemon = HealthDaemon::new(state.clone(), events, mux, prompts, layout, None, config);
        daemon.register_task(&task.id);

        let outcome = daemon.trigger_scan().await;
        assert_eq!(outcome.agents_checked, 1);
        assert_eq!(outcome.agents_marked_dead, 1);

        let reloaded = state.get_agent(&agent.id).await.unwrap();
        assert_eq!(reloaded.status, AgentStatus::Failed);
    }

    #[tokio::test]
    async fn scan_leaves_live_agent_alone() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateManager::spawn(dir.path().join("state.sqlite3")).unwrap();
        let events = Arc::new(EventBus::new(64));
        let mux = Arc::new(MockMultiplexer::new());
        let prompts = Arc::new(PromptLoader::embedded_only());
        let layout = WorkspaceLayout::new(dir.path());
        let config = Config::default();

        let task = state.create_task(new_task(&dir.path().to_string_lossy())).await.unwrap();
        let phase = crate::domain::Phase::new(task.id.clone(), 0, "Investigation".into(), "desc".into());
        state.create_phase(phase).await.unwrap();
        state.transition_phase(&task.id, 0, crate::domain::PhaseStatus::Active, 0, None).await.unwrap();

        let pid = mux.create_session("live-session", "echo", &[], dir.path()).await.unwrap();
        let stream_log = dir.path().join("live_stream.jsonl");
        std::fs::write(&stream_log, "{}\n").unwrap();

        let agent = Agent::new(
            task.id.clone(),
            "investigator".into(),
            "orchestrator".into(),
            1,
            0,
            "live-session".into(),
            pid,
            AgentFilePaths {
                prompt_file: "p".into(),
                stream_log: stream_log.to_string_lossy().into_owned(),
                progress_log: "pr".into(),
                findings_log: "f".into(),
            },
        );
        state.create_agent(agent.clone()).await.unwrap();

        let daemon = HealthDaemon::new(state.clone(), events, mux, prompts, layout, None, config);
        daemon.register_task(&task.id);

        let outcome = daemon.trigger_scan().await;
        assert_eq!(outcome.agents_checked, 1);
        assert_eq!(outcome.agents_marked_dead, 0);

        let reloaded = state.get_agent(&agent.id).await.unwrap();
        assert_eq!(reloaded.status, AgentStatus::Running);
    }

    #[test]
    fn daemon_process_tracks_pid_and_version() {
        let dir = tempfile::tempdir().unwrap();
        let process = DaemonProcess::with_pid_file(dir.path().join("orchestrator.pid"));
        assert!(!process.is_running());

        process.write_pid(std::process::id()).unwrap();
        process.write_version(VERSION).unwrap();
        assert!(process.is_running());
        assert!(process.version_matches());

        process.remove_pid_file().unwrap();
        process.remove_version_file().unwrap();
        assert!(!process.is_running());
    }
}
