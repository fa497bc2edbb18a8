//! CLI command definitions and subcommands: one subcommand per RPC
//! operation (§6), plus daemon process control.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;

/// Multi-agent orchestrator for headless LLM-coding agents.
#[derive(Parser)]
#[command(
    name = "orc",
    about = "Multi-agent orchestrator for headless LLM-coding agents",
    version = env!("GIT_DESCRIBE"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Output format for commands that return structured data
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands, grouped by the entity they act on.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a task
    CreateTask {
        /// Task description (10-500 chars)
        description: String,

        /// Priority (p0, p1, p2, p3)
        #[arg(long, default_value = "p2")]
        priority: String,

        /// One phase per occurrence, as `name:description`. Defaults to a
        /// single "Implementation" phase when omitted.
        #[arg(long = "phase", value_name = "NAME:DESCRIPTION")]
        phases: Vec<String>,

        /// Background context
        #[arg(long)]
        background: Option<String>,
    },

    /// Show a task's full snapshot
    GetTaskStatus { task_id: String },

    /// List tasks, optionally merged with every other workspace's tasks
    ListTasks {
        #[arg(long)]
        status: Option<String>,

        #[arg(long)]
        all_workspaces: bool,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Spawn a top-level agent bound to a task's current phase
    DeployAgent {
        task_id: String,
        agent_type: String,

        #[arg(long)]
        parent: Option<String>,
    },

    /// Spawn a child agent one depth below its parent
    SpawnChildAgent {
        task_id: String,
        parent_agent_id: String,
        agent_type: String,
    },

    /// Append a progress report for an agent
    UpdateAgentProgress {
        task_id: String,
        agent_id: String,
        status: String,
        message: String,

        #[arg(long, default_value = "0")]
        progress: u8,
    },

    /// Append a finding for an agent
    ReportAgentFinding {
        task_id: String,
        agent_id: String,

        /// issue, solution, insight, recommendation, blocker
        finding_type: String,

        /// low, medium, high, critical
        severity: String,

        message: String,
    },

    /// Terminate an agent and run its cleanup pass
    KillAgent {
        task_id: String,
        agent_id: String,

        #[arg(long)]
        reason: Option<String>,
    },

    /// Read an agent's stream log, truncated for display
    GetAgentOutput {
        task_id: String,
        agent_id: String,

        #[arg(long, default_value = "recent")]
        response_format: String,

        #[arg(long)]
        max_bytes: Option<usize>,
    },

    /// Request a manual review of a phase (bypasses auto-spawned reviewers)
    RequestPhaseReview { task_id: String, phase_index: i64 },

    /// Submit a reviewer's verdict
    SubmitReview {
        review_id: String,
        reviewer_agent_id: String,

        /// approved, rejected, needs_revision
        verdict: String,

        #[arg(long, default_value = "")]
        notes: String,
    },

    /// Manually approve a phase (refused while an auto-spawned review owns it)
    ApprovePhase { task_id: String, phase_index: i64 },

    /// Manually reject a phase (refused while an auto-spawned review owns it)
    RejectPhase { task_id: String, phase_index: i64 },

    /// Show a review's status
    GetReviewStatus { task_id: String, review_id: String },

    /// Fetch a phase's handover document
    GetPhaseHandover { task_id: String, phase_index: i64 },

    /// Regenerate/ensure a phase's handover document exists
    SubmitPhaseHandover { task_id: String, phase_index: i64 },

    /// Render the context preamble a freshly spawned agent would receive
    GetHandoverContext { task_id: String },

    /// Cross-workspace counts and status breakdown
    DashboardSummary,

    /// Manage the background health daemon
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Internal: run as the detached daemon process (used by `daemon start`)
    #[command(name = "daemon-run", hide = true)]
    DaemonRun,
}

/// Daemon management subcommands
#[derive(Debug, Subcommand)]
pub enum DaemonCommand {
    /// Start the daemon
    Start {
        /// Don't fork to background (run in foreground)
        #[arg(long)]
        foreground: bool,
    },

    /// Stop the daemon
    Stop,

    /// Check daemon status
    Status {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Ping the daemon to check if it's alive and responsive
    Ping,
}

/// Result of checking a required tool
pub struct ToolCheck {
    pub name: &'static str,
    pub available: bool,
    pub version: Option<String>,
}

impl ToolCheck {
    /// Check if a tool is available and get its version
    pub fn check(name: &'static str, version_args: &[&str]) -> Self {
        debug!(name, ?version_args, "ToolCheck::check: called");
        let result = std::process::Command::new(name).args(version_args).output();

        match result {
            Ok(output) if output.status.success() => {
                debug!(name, "ToolCheck::check: tool available");
                let version_str = String::from_utf8_lossy(&output.stdout);
                let version = parse_version(&version_str);
                Self {
                    name,
                    available: true,
                    version: Some(version),
                }
            }
            _ => {
                debug!(name, "ToolCheck::check: tool not available");
                Self {
                    name,
                    available: false,
                    version: None,
                }
            }
        }
    }
}

/// Parse version from command output (extracts first version-like string)
fn parse_version(output: &str) -> String {
    debug!(%output, "parse_version: called");
    for word in output.split_whitespace() {
        let word = word.trim_start_matches('v');
        if word.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            let version: String = word.chars().take_while(|c| c.is_ascii_digit() || *c == '.').collect();
            if !version.is_empty() {
                debug!(%version, "parse_version: found version");
                return version;
            }
        }
    }
    debug!("parse_version: no version found, returning unknown");
    "unknown".to_string()
}

/// Check all required tools and return their status
pub fn check_required_tools() -> Vec<ToolCheck> {
    debug!("check_required_tools: called");
    let tools = vec![ToolCheck::check("tmux", &["-V"]), ToolCheck::check("claude", &["--version"])];
    debug!(count = tools.len(), "check_required_tools: returning tools");
    tools
}

/// Check if the daemon is running (lightweight check for help display)
pub fn is_daemon_running() -> bool {
    debug!("is_daemon_running: called");
    crate::daemon::DaemonProcess::new().is_running()
}

/// Generate the after_help text with tool checks and daemon status
pub fn generate_after_help() -> String {
    debug!("generate_after_help: called");
    let tools = check_required_tools();
    let daemon_running = is_daemon_running();

    let mut help = String::new();

    help.push_str("Required Tools:\n");
    for tool in &tools {
        let icon = if tool.available { "\u{2705}" } else { "\u{274C}" };
        let version = tool.version.as_deref().unwrap_or("not found");
        help.push_str(&format!("  {} {:<10} {}\n", icon, tool.name, version));
    }

    help.push('\n');
    help.push_str("Daemon:\n");
    let daemon_icon = if daemon_running { "\u{2705}" } else { "\u{274C}" };
    let daemon_status = if daemon_running { "running" } else { "stopped" };
    help.push_str(&format!("  {} {}\n", daemon_icon, daemon_status));

    debug!("generate_after_help: returning help text");
    help
}

/// Output format for status/list commands.
#[derive(Clone, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_no_command() {
        let cli = Cli::parse_from(["orc"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_parse_create_task() {
        let cli = Cli::parse_from(["orc", "create-task", "Investigate the flaky checkout test", "--priority", "p1"]);
        match cli.command {
            Some(Command::CreateTask { description, priority, .. }) => {
                assert_eq!(description, "Investigate the flaky checkout test");
                assert_eq!(priority, "p1");
            }
            other => panic!("expected CreateTask, got {other:?}"),
        }
    }

    #[test]
    fn test_cli_parse_create_task_with_phases() {
        let cli = Cli::parse_from(["orc", "create-task", "desc", "--phase", "Investigation:look around", "--phase", "Build:ship it"]);
        match cli.command {
            Some(Command::CreateTask { phases, .. }) => {
                assert_eq!(phases, vec!["Investigation:look around".to_string(), "Build:ship it".to_string()]);
            }
            other => panic!("expected CreateTask, got {other:?}"),
        }
    }

    #[test]
    fn test_cli_parse_deploy_agent() {
        let cli = Cli::parse_from(["orc", "deploy-agent", "TASK-1", "builder"]);
        assert!(matches!(cli.command, Some(Command::DeployAgent { .. })));
    }

    #[test]
    fn test_cli_parse_daemon_start() {
        let cli = Cli::parse_from(["orc", "daemon", "start"]);
        assert!(matches!(
            cli.command,
            Some(Command::Daemon {
                command: DaemonCommand::Start { foreground: false }
            })
        ));
    }

    #[test]
    fn test_cli_parse_daemon_start_foreground() {
        let cli = Cli::parse_from(["orc", "daemon", "start", "--foreground"]);
        assert!(matches!(
            cli.command,
            Some(Command::Daemon {
                command: DaemonCommand::Start { foreground: true }
            })
        ));
    }

    #[test]
    fn test_cli_parse_daemon_stop() {
        let cli = Cli::parse_from(["orc", "daemon", "stop"]);
        assert!(matches!(cli.command, Some(Command::Daemon { command: DaemonCommand::Stop })));
    }

    #[test]
    fn test_cli_parse_daemon_status() {
        let cli = Cli::parse_from(["orc", "daemon", "status"]);
        assert!(matches!(
            cli.command,
            Some(Command::Daemon {
                command: DaemonCommand::Status { .. }
            })
        ));
    }

    #[test]
    fn test_output_format_from_str() {
        assert!(matches!("text".parse::<OutputFormat>(), Ok(OutputFormat::Text)));
        assert!(matches!("json".parse::<OutputFormat>(), Ok(OutputFormat::Json)));
        assert!("invalid".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_cli_with_config() {
        let cli = Cli::parse_from(["orc", "-c", "/path/to/config.yml", "daemon", "status"]);
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/config.yml")));
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("tmux 3.4"), "3.4");
        assert_eq!(parse_version("v1.2.3"), "1.2.3");
    }
}
