//! Orchestrator configuration types and layered loading.

use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub daemon: DaemonConfig,
    pub context: ContextConfig,
    pub handover: HandoverConfig,
    pub output: OutputConfig,
    pub review: ReviewConfig,
    #[serde(rename = "agent-command")]
    pub agent_command: AgentCommandConfig,
}

impl Config {
    /// Load configuration with the layered fallback chain (§4.10):
    /// explicit path (hard error on failure) → `.orchestrator.yml` in the
    /// current directory → a user-level file under the platform config
    /// directory → built-in defaults. Steps 2 and 3 warn and continue on
    /// failure rather than aborting.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load_from_file(path).context(format!("failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".orchestrator.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => tracing::warn!("failed to load config from {}: {}", local_config.display(), e),
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("orchestrator").join("config.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => tracing::warn!("failed to load config from {}: {}", user_config.display(), e),
                }
            }
        }

        tracing::info!("no config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).context("failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("failed to parse config file")?;
        tracing::info!("loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Where per-workspace and cross-workspace state lives on disk (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory for a workspace's own data (registry, task dirs).
    #[serde(rename = "workspace-base")]
    pub workspace_base: PathBuf,

    /// Directory for the cross-workspace global index.
    #[serde(rename = "global-dir")]
    pub global_dir: PathBuf,

    /// Whether cleaned-up agent logs are archived rather than deleted.
    #[serde(rename = "keep-logs")]
    pub keep_logs: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            workspace_base: PathBuf::from(".orchestrator"),
            global_dir: dirs::home_dir()
                .map(|h| h.join(".claude-orchestrator"))
                .unwrap_or_else(|| PathBuf::from(".claude-orchestrator")),
            keep_logs: true,
        }
    }
}

/// Health-daemon scan cadence and liveness thresholds (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    #[serde(rename = "scan-interval-secs")]
    pub scan_interval_secs: u64,
    #[serde(rename = "stuck-threshold-secs")]
    pub stuck_threshold_secs: u64,
    #[serde(rename = "global-pass-every")]
    pub global_pass_every: u32,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 30,
            stuck_threshold_secs: 300,
            global_pass_every: 5,
        }
    }
}

/// Context-accumulator token budget (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,
    #[serde(rename = "max-findings")]
    pub max_findings: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: 2500,
            max_findings: 15,
        }
    }
}

/// Handover token budget (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoverConfig {
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,
    #[serde(rename = "max-key-findings")]
    pub max_key_findings: usize,
    #[serde(rename = "max-recommendations")]
    pub max_recommendations: usize,
}

impl Default for HandoverConfig {
    fn default() -> Self {
        Self {
            max_tokens: 3000,
            max_key_findings: 10,
            max_recommendations: 10,
        }
    }
}

/// Output-log smart-truncation caps (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    #[serde(rename = "max-line-length")]
    pub max_line_length: usize,
    #[serde(rename = "max-tool-result-content")]
    pub max_tool_result_content: usize,
    #[serde(rename = "coordination-max-findings")]
    pub coordination_max_findings: usize,
    #[serde(rename = "coordination-max-progress")]
    pub coordination_max_progress: usize,
    #[serde(rename = "coordination-max-agents")]
    pub coordination_max_agents: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            max_line_length: 2000,
            max_tool_result_content: 4000,
            coordination_max_findings: 3,
            coordination_max_progress: 5,
            coordination_max_agents: 2,
        }
    }
}

/// Review-subsystem defaults (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    #[serde(rename = "num-reviewers")]
    pub num_reviewers: u32,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self { num_reviewers: 2 }
    }
}

/// The LLM subprocess invocation (out of scope per spec: "the LLM process
/// itself... treated as an opaque subprocess"). The multiplexer session
/// runs `program args... <rendered prompt file path>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentCommandConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for AgentCommandConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: vec!["-p".to_string(), "--dangerously-skip-permissions".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = Config::default();
        assert_eq!(config.daemon.scan_interval_secs, 30);
        assert_eq!(config.daemon.stuck_threshold_secs, 300);
        assert_eq!(config.context.max_tokens, 2500);
        assert_eq!(config.handover.max_tokens, 3000);
        assert_eq!(config.review.num_reviewers, 2);
    }

    #[test]
    fn partial_yaml_uses_defaults_for_rest() {
        let yaml = r#"
daemon:
  scan-interval-secs: 10
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.daemon.scan_interval_secs, 10);
        assert_eq!(config.daemon.stuck_threshold_secs, 300);
        assert_eq!(config.context.max_tokens, 2500);
    }

    #[test]
    fn deserializes_full_config() {
        let yaml = r#"
storage:
  workspace-base: /tmp/ws
  global-dir: /tmp/global
  keep-logs: false
daemon:
  scan-interval-secs: 15
  stuck-threshold-secs: 120
  global-pass-every: 3
context:
  max-tokens: 1000
  max-findings: 5
handover:
  max-tokens: 1500
  max-key-findings: 4
  max-recommendations: 4
output:
  max-line-length: 500
  max-tool-result-content: 1000
  coordination-max-findings: 2
  coordination-max-progress: 2
  coordination-max-agents: 1
review:
  num-reviewers: 3
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.storage.workspace_base, PathBuf::from("/tmp/ws"));
        assert!(!config.storage.keep_logs);
        assert_eq!(config.review.num_reviewers, 3);
    }
}
