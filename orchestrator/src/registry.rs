//! Per-task `AGENT_REGISTRY.json` snapshot (§6): a human-inspectable mirror
//! of one task's agent roster, distinct from the workspace-wide
//! `GLOBAL_REGISTRY.json` mirror `store::Store` already maintains for every
//! collection sharing the workspace's one `state.sqlite3`. The database row
//! set is authoritative; this file exists only so a user can `cat` a task's
//! directory and see its agents without a query tool, so a write failure is
//! logged and swallowed rather than propagated.

use std::collections::BTreeMap;
use std::io::{Seek, SeekFrom, Write};
use std::time::Duration;

use tracing::warn;

use store::{LockMode, with_file_lock};

use crate::domain::Agent;
use crate::workspace::WorkspaceLayout;

const LOCK_DEADLINE: Duration = Duration::from_secs(5);

/// Overwrite `task_id`'s `AGENT_REGISTRY.json` with the given roster, keyed
/// by agent id. Never fails the caller: any I/O or lock error is logged and
/// swallowed, matching the other best-effort mirrors in this codebase.
pub fn refresh(layout: &WorkspaceLayout, task_id: &str, agents: &[Agent]) {
    if let Err(e) = try_refresh(layout, task_id, agents) {
        warn!(task_id, error = %e, "registry: failed to refresh AGENT_REGISTRY.json");
    }
}

fn try_refresh(layout: &WorkspaceLayout, task_id: &str, agents: &[Agent]) -> std::io::Result<()> {
    layout.ensure_task_dirs(task_id)?;
    let path = layout.agent_registry_json_path(task_id);

    let snapshot: BTreeMap<&str, &Agent> = agents.iter().map(|a| (a.id.as_str(), a)).collect();

    with_file_lock(&path, LockMode::Exclusive, LOCK_DEADLINE, |file| {
        file.set_len(0).map_err(store::StoreError::from)?;
        file.seek(SeekFrom::Start(0)).map_err(store::StoreError::from)?;
        serde_json::to_writer_pretty(&mut *file, &snapshot).map_err(store::StoreError::from)?;
        file.flush().map_err(store::StoreError::from)?;
        Ok(())
    })
    .map_err(std::io::Error::other)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AgentFilePaths, Priority, Task, TaskContext, TaskLimits};

    fn agent(task_id: &str, agent_type: &str) -> Agent {
        Agent::new(
            task_id.into(),
            agent_type.into(),
            "orchestrator".into(),
            1,
            0,
            format!("sess-{agent_type}"),
            1234,
            AgentFilePaths { prompt_file: "p".into(), stream_log: "s".into(), progress_log: "pr".into(), findings_log: "f".into() },
        )
    }

    #[test]
    fn refresh_writes_a_json_object_keyed_by_agent_id() {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path());
        let _ = Task::new("desc".into(), Priority::P1, dir.path().display().to_string(), "/cwd".into(), TaskLimits::default(), TaskContext::default());

        let agents = vec![agent("TASK-1", "coder"), agent("TASK-1", "reviewer")];
        refresh(&layout, "TASK-1", &agents);

        let content = std::fs::read_to_string(layout.agent_registry_json_path("TASK-1")).unwrap();
        let parsed: BTreeMap<String, serde_json::Value> = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(parsed.contains_key(&agents[0].id));
    }

    #[test]
    fn refresh_overwrites_rather_than_appends() {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path());

        refresh(&layout, "TASK-1", &[agent("TASK-1", "coder")]);
        refresh(&layout, "TASK-1", &[agent("TASK-1", "coder"), agent("TASK-1", "reviewer")]);

        let content = std::fs::read_to_string(layout.agent_registry_json_path("TASK-1")).unwrap();
        let parsed: BTreeMap<String, serde_json::Value> = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed.len(), 2);
    }
}
