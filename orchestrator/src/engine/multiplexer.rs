//! The multiplexer capability that hosts each agent's LLM subprocess in a
//! detached terminal session. The spec treats this as an external
//! collaborator specified only at its interface (`create_session`,
//! `session_exists`, `kill_session`); [`TmuxMultiplexer`] is the concrete
//! tmux-backed implementation, grounded in the same `tokio::process::Command`
//! idiom the workspace manager uses for git subprocess calls.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum MultiplexerError {
    #[error("failed to create session {0}: {1}")]
    CreateFailed(String, String),
    #[error("failed to kill session {0}: {1}")]
    KillFailed(String, String),
    #[error("session {0} has no panes")]
    NoPanes(String),
}

#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// Create a detached session running `command` with `args` in `cwd`,
    /// redirecting stdout to `log_path`. Returns the subprocess pid.
    async fn create_session(
        &self,
        session_name: &str,
        command: &str,
        args: &[String],
        cwd: &Path,
    ) -> Result<i32, MultiplexerError>;

    async fn session_exists(&self, session_name: &str) -> bool;

    async fn kill_session(&self, session_name: &str) -> Result<(), MultiplexerError>;
}

/// Hosts agents as detached `tmux` sessions.
pub struct TmuxMultiplexer;

impl Default for TmuxMultiplexer {
    fn default() -> Self {
        Self
    }
}

#[async_trait]
impl Multiplexer for TmuxMultiplexer {
    async fn create_session(
        &self,
        session_name: &str,
        command: &str,
        args: &[String],
        cwd: &Path,
    ) -> Result<i32, MultiplexerError> {
        debug!(%session_name, %command, ?cwd, "TmuxMultiplexer::create_session: called");

        let mut shell_cmd = shell_escape(command);
        for arg in args {
            shell_cmd.push(' ');
            shell_cmd.push_str(&shell_escape(arg));
        }

        let output = Command::new("tmux")
            .args(["new-session", "-d", "-s", session_name, "-c"])
            .arg(cwd)
            .arg(shell_cmd)
            .output()
            .await
            .map_err(|e| MultiplexerError::CreateFailed(session_name.to_string(), e.to_string()))?;

        if !output.status.success() {
            return Err(MultiplexerError::CreateFailed(
                session_name.to_string(),
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }

        let pane_output = Command::new("tmux")
            .args(["list-panes", "-t", session_name, "-F", "#{pane_pid}"])
            .output()
            .await
            .map_err(|e| MultiplexerError::CreateFailed(session_name.to_string(), e.to_string()))?;

        let pid_str = String::from_utf8_lossy(&pane_output.stdout);
        let pid_str = pid_str.lines().next().ok_or_else(|| MultiplexerError::NoPanes(session_name.to_string()))?;
        pid_str
            .trim()
            .parse::<i32>()
            .map_err(|_| MultiplexerError::NoPanes(session_name.to_string()))
    }

    async fn session_exists(&self, session_name: &str) -> bool {
        Command::new("tmux")
            .args(["has-session", "-t", session_name])
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    async fn kill_session(&self, session_name: &str) -> Result<(), MultiplexerError> {
        debug!(%session_name, "TmuxMultiplexer::kill_session: called");
        let output = Command::new("tmux")
            .args(["kill-session", "-t", session_name])
            .output()
            .await
            .map_err(|e| MultiplexerError::KillFailed(session_name.to_string(), e.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("can't find session") {
                // Already gone; treat as success.
                warn!(%session_name, "kill_session: session already absent");
                Ok(())
            } else {
                Err(MultiplexerError::KillFailed(session_name.to_string(), stderr.to_string()))
            }
        }
    }
}

fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// In-memory multiplexer for tests: no real subprocess, no tmux dependency.
#[derive(Default)]
pub struct MockMultiplexer {
    sessions: std::sync::Mutex<std::collections::HashMap<String, i32>>,
    next_pid: std::sync::atomic::AtomicI32,
}

impl MockMultiplexer {
    pub fn new() -> Self {
        Self {
            sessions: std::sync::Mutex::new(std::collections::HashMap::new()),
            next_pid: std::sync::atomic::AtomicI32::new(10_000),
        }
    }
}

#[async_trait]
impl Multiplexer for MockMultiplexer {
    async fn create_session(
        &self,
        session_name: &str,
        _command: &str,
        _args: &[String],
        _cwd: &Path,
    ) -> Result<i32, MultiplexerError> {
        let pid = self.next_pid.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.sessions.lock().unwrap().insert(session_name.to_string(), pid);
        Ok(pid)
    }

    async fn session_exists(&self, session_name: &str) -> bool {
        self.sessions.lock().unwrap().contains_key(session_name)
    }

    async fn kill_session(&self, session_name: &str) -> Result<(), MultiplexerError> {
        self.sessions.lock().unwrap().remove(session_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_multiplexer_tracks_session_lifecycle() {
        let mux = MockMultiplexer::new();
        let pid = mux
            .create_session("sess-1", "echo", &["hi".to_string()], Path::new("/tmp"))
            .await
            .unwrap();
        assert!(pid >= 10_000);
        assert!(mux.session_exists("sess-1").await);

        mux.kill_session("sess-1").await.unwrap();
        assert!(!mux.session_exists("sess-1").await);
    }

    #[test]
    fn shell_escape_handles_embedded_quotes() {
        assert_eq!(shell_escape("it's"), "'it'\\''s'");
    }
}
