//! Disk layout for a workspace (§6): where the per-workspace database, the
//! legacy registry mirrors, and each agent's prompt/log/finding files live,
//! plus the cross-workspace global index under the user's config directory.

use std::path::{Path, PathBuf};

use tracing::debug;

/// Path layout rooted at one workspace's `<workspace_base>` directory
/// (`.orchestrator` by default, per [`crate::config::StorageConfig`]).
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    base: PathBuf,
}

impl WorkspaceLayout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn registry_dir(&self) -> PathBuf {
        self.base.join("registry")
    }

    pub fn state_db_path(&self) -> PathBuf {
        self.registry_dir().join("state.sqlite3")
    }

    pub fn global_registry_json_path(&self) -> PathBuf {
        self.registry_dir().join("GLOBAL_REGISTRY.json")
    }

    pub fn task_dir(&self, task_id: &str) -> PathBuf {
        self.base.join(task_id)
    }

    pub fn agent_registry_json_path(&self, task_id: &str) -> PathBuf {
        self.task_dir(task_id).join("AGENT_REGISTRY.json")
    }

    pub fn prompt_file_path(&self, task_id: &str, agent_id: &str) -> PathBuf {
        self.task_dir(task_id).join(format!("agent_prompt_{agent_id}.txt"))
    }

    pub fn stream_log_path(&self, task_id: &str, agent_id: &str) -> PathBuf {
        self.task_dir(task_id).join("logs").join(format!("{agent_id}_stream.jsonl"))
    }

    pub fn progress_log_path(&self, task_id: &str, agent_id: &str) -> PathBuf {
        self.task_dir(task_id).join("progress").join(format!("{agent_id}_progress.jsonl"))
    }

    pub fn findings_log_path(&self, task_id: &str, agent_id: &str) -> PathBuf {
        self.task_dir(task_id).join("findings").join(format!("{agent_id}_findings.jsonl"))
    }

    pub fn handover_md_path(&self, task_id: &str, phase_index: i64) -> PathBuf {
        self.task_dir(task_id).join("handovers").join(format!("phase_{phase_index}.md"))
    }

    pub fn archive_dir(&self, task_id: &str) -> PathBuf {
        self.task_dir(task_id).join("archive")
    }

    pub fn events_log_path(&self, task_id: &str) -> PathBuf {
        self.task_dir(task_id).join("events.jsonl")
    }

    /// Create every directory an agent spawn in `task_id` will need. Called
    /// once at task creation rather than lazily per-agent, so a spawn's
    /// error path never has to distinguish "directory missing" from a real
    /// filesystem failure.
    pub fn ensure_task_dirs(&self, task_id: &str) -> std::io::Result<()> {
        let dir = self.task_dir(task_id);
        debug!(?dir, "WorkspaceLayout::ensure_task_dirs");
        std::fs::create_dir_all(dir.join("logs"))?;
        std::fs::create_dir_all(dir.join("progress"))?;
        std::fs::create_dir_all(dir.join("findings"))?;
        std::fs::create_dir_all(dir.join("handovers"))?;
        std::fs::create_dir_all(dir.join("archive"))?;
        Ok(())
    }

    pub fn ensure_registry_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.registry_dir())
    }
}

/// Path layout for the cross-workspace global index (§4.1): one small
/// database every workspace on the machine registers itself into, so
/// `list_tasks` can merge across workspaces without walking the filesystem.
#[derive(Debug, Clone)]
pub struct GlobalLayout {
    dir: PathBuf,
}

impl GlobalLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.join("global_registry.sqlite3")
    }

    pub fn ensure_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_nests_agent_files_under_the_task_dir() {
        let layout = WorkspaceLayout::new("/ws/.orchestrator");
        assert_eq!(layout.state_db_path(), PathBuf::from("/ws/.orchestrator/registry/state.sqlite3"));
        assert_eq!(
            layout.prompt_file_path("TASK-1", "builder-000000-abcdef"),
            PathBuf::from("/ws/.orchestrator/TASK-1/agent_prompt_builder-000000-abcdef.txt")
        );
        assert_eq!(
            layout.stream_log_path("TASK-1", "builder-000000-abcdef"),
            PathBuf::from("/ws/.orchestrator/TASK-1/logs/builder-000000-abcdef_stream.jsonl")
        );
        assert_eq!(layout.handover_md_path("TASK-1", 0), PathBuf::from("/ws/.orchestrator/TASK-1/handovers/phase_0.md"));
    }

    #[test]
    fn ensure_task_dirs_creates_every_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path());
        layout.ensure_task_dirs("TASK-1").unwrap();
        for sub in ["logs", "progress", "findings", "handovers", "archive"] {
            assert!(layout.task_dir("TASK-1").join(sub).is_dir());
        }
    }
}
