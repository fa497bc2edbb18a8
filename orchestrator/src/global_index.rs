//! Cross-workspace global index (§4.1, §6): a small SQLite database under
//! `~/.claude-orchestrator/` that every workspace on the machine registers
//! itself and its tasks into, so `list_tasks` and the health daemon's global
//! pass can see across workspaces without walking the filesystem.
//!
//! This is deliberately a second, independent `store::Store` rather than a
//! replica of the per-workspace one: it only needs to answer "which
//! workspaces/tasks exist and what's their coarse status", not the full
//! task/phase/agent graph a single workspace's `StateManager` owns.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use store::{Filter, IndexValue, Record, Store, StoreResult, now_ms};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::{Priority, Task, TaskStatus};
use crate::events::{Event, EventBus};
use crate::workspace::GlobalLayout;

/// One workspace that has registered itself with the global index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceEntry {
    pub workspace_path: String,
    pub registered_at: i64,
    pub last_seen_at: i64,
}

impl Record for WorkspaceEntry {
    fn id(&self) -> &str {
        &self.workspace_path
    }
    fn updated_at(&self) -> i64 {
        self.last_seen_at
    }
    fn collection_name() -> &'static str {
        "global_workspaces"
    }
    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        HashMap::new()
    }
}

/// A coarse, denormalized mirror of one task, enough to merge `list_tasks`
/// across workspaces without opening each workspace's own store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskIndexEntry {
    pub task_id: String,
    pub workspace_path: String,
    pub description: String,
    pub priority: Priority,
    pub status: TaskStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Record for TaskIndexEntry {
    fn id(&self) -> &str {
        &self.task_id
    }
    fn updated_at(&self) -> i64 {
        self.updated_at
    }
    fn collection_name() -> &'static str {
        "global_tasks"
    }
    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut m = HashMap::new();
        m.insert("workspace_path".to_string(), IndexValue::String(self.workspace_path.clone()));
        m.insert("status".to_string(), IndexValue::String(format!("{:?}", self.status)));
        m
    }
}

impl TaskIndexEntry {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            workspace_path: task.workspace_path.clone(),
            description: task.description.clone(),
            priority: task.priority,
            status: task.status,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

/// Handle onto the global index's own store. Cheap to clone (the store's
/// connection is behind a mutex), so it can be shared between the sync
/// subscriber and whatever reads it (the query API's `list_tasks`).
#[derive(Clone)]
pub struct GlobalIndex {
    store: Arc<Store>,
}

impl GlobalIndex {
    pub fn open(layout: &GlobalLayout) -> StoreResult<Self> {
        layout.ensure_dir()?;
        let store = Store::open(&layout.db_path())?;
        Ok(Self { store: Arc::new(store) })
    }

    pub fn register_workspace(&self, workspace_path: &str) -> StoreResult<()> {
        let now = now_ms();
        match self.store.get::<WorkspaceEntry>(workspace_path)? {
            Some(mut existing) => {
                existing.last_seen_at = now;
                self.store.update(&existing)
            }
            None => self.store.create(&WorkspaceEntry {
                workspace_path: workspace_path.to_string(),
                registered_at: now,
                last_seen_at: now,
            }),
        }
    }

    pub fn upsert_task(&self, task: &Task) -> StoreResult<()> {
        let entry = TaskIndexEntry::from_task(task);
        if self.store.get::<TaskIndexEntry>(&entry.task_id)?.is_some() {
            self.store.update(&entry)
        } else {
            self.store.create(&entry)
        }
    }

    pub fn list_workspaces(&self) -> StoreResult<Vec<WorkspaceEntry>> {
        self.store.list::<WorkspaceEntry>(&[])
    }

    pub fn list_tasks(&self) -> StoreResult<Vec<TaskIndexEntry>> {
        self.store.list::<TaskIndexEntry>(&[])
    }

    pub fn list_tasks_for_workspace(&self, workspace_path: &str) -> StoreResult<Vec<TaskIndexEntry>> {
        self.store
            .list::<TaskIndexEntry>(&[Filter::eq("workspace_path", IndexValue::String(workspace_path.to_string()))])
    }

    pub fn mark_task_status(&self, task_id: &str, status: TaskStatus) -> StoreResult<()> {
        if let Some(mut entry) = self.store.get::<TaskIndexEntry>(task_id)? {
            entry.status = status;
            entry.updated_at = now_ms();
            self.store.update(&entry)?;
        }
        Ok(())
    }

    pub fn sync(&self) -> StoreResult<()> {
        self.store.sync()
    }
}

/// Keeps the global index current by subscribing to a workspace's event bus
/// and mirroring every `TaskCreated`/`TaskTransitioned` event, the same
/// subscribe-and-mirror shape [`crate::events::EventLogger`] uses for its
/// own JSONL audit trail.
pub async fn run_sync(index: GlobalIndex, workspace_path: String, event_bus: Arc<EventBus>, state: crate::state::StateManager) {
    debug!(workspace_path, "global_index: sync subscriber starting");
    if let Err(e) = index.register_workspace(&workspace_path) {
        warn!(error = %e, "global_index: failed to register workspace");
    }

    let mut rx = event_bus.subscribe();
    loop {
        match rx.recv().await {
            Ok(Event::TaskCreated { task_id, .. }) | Ok(Event::TaskTransitioned { task_id, .. }) => {
                match state.get_task(&task_id).await {
                    Ok(task) => {
                        if let Err(e) = index.upsert_task(&task) {
                            warn!(%task_id, error = %e, "global_index: failed to upsert task");
                        }
                    }
                    Err(e) => warn!(%task_id, error = %e, "global_index: failed to reload task for sync"),
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(missed = n, "global_index: sync subscriber lagged behind");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("global_index: event bus closed, sync subscriber shutting down");
                break;
            }
        }
    }
}

pub fn spawn_sync(
    index: GlobalIndex,
    workspace_path: String,
    event_bus: Arc<EventBus>,
    state: crate::state::StateManager,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run_sync(index, workspace_path, event_bus, state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskContext, TaskLimits};

    fn new_task(workspace: &str) -> Task {
        Task::new("Investigate the flaky checkout test".into(), Priority::P1, workspace.into(), "/cwd".into(), TaskLimits::default(), TaskContext::default())
    }

    #[test]
    fn register_workspace_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = GlobalLayout::new(dir.path());
        let index = GlobalIndex::open(&layout).unwrap();

        index.register_workspace("/ws/one").unwrap();
        index.register_workspace("/ws/one").unwrap();

        let workspaces = index.list_workspaces().unwrap();
        assert_eq!(workspaces.len(), 1);
    }

    #[test]
    fn upsert_task_creates_then_updates() {
        let dir = tempfile::tempdir().unwrap();
        let layout = GlobalLayout::new(dir.path());
        let index = GlobalIndex::open(&layout).unwrap();

        let mut task = new_task("/ws/one");
        index.upsert_task(&task).unwrap();
        assert_eq!(index.list_tasks().unwrap().len(), 1);

        task.status = TaskStatus::Completed;
        index.upsert_task(&task).unwrap();
        let tasks = index.list_tasks().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Completed);
    }

    #[test]
    fn list_tasks_for_workspace_filters_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let layout = GlobalLayout::new(dir.path());
        let index = GlobalIndex::open(&layout).unwrap();

        index.upsert_task(&new_task("/ws/one")).unwrap();
        index.upsert_task(&new_task("/ws/two")).unwrap();

        assert_eq!(index.list_tasks_for_workspace("/ws/one").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sync_mirrors_task_created_events() {
        let dir = tempfile::tempdir().unwrap();
        let layout = GlobalLayout::new(dir.path());
        let index = GlobalIndex::open(&layout).unwrap();

        let state = crate::state::StateManager::spawn(dir.path().join("state.sqlite3")).unwrap();
        let events = Arc::new(EventBus::new(64));
        let handle = spawn_sync(index.clone(), "/ws/one".into(), events.clone(), state.clone());

        let task = state.create_task(new_task("/ws/one")).await.unwrap();
        events.emit(Event::TaskCreated { task_id: task.id.clone(), description: task.description.clone() });

        // Give the subscriber a moment to process, then check directly.
        for _ in 0..50 {
            if !index.list_tasks().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(index.list_tasks().unwrap().len(), 1);

        drop(events);
        let _ = tokio::time::timeout(std::time::Duration::from_secs(2), handle).await;
    }
}
