//! Event logger: subscribes to the event bus and persists every event to a
//! per-task JSONL file for audit/replay, independent of the state store.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use super::bus::EventBus;
use super::types::{Event, EventLogEntry};

/// Events are written to `<workspace_base>/<task_id>/events.jsonl`.
pub struct EventLogger {
    tasks_dir: PathBuf,
    writers: HashMap<String, BufWriter<File>>,
}

impl EventLogger {
    pub fn new(tasks_dir: impl AsRef<Path>) -> Self {
        Self {
            tasks_dir: tasks_dir.as_ref().to_path_buf(),
            writers: HashMap::new(),
        }
    }

    pub fn write_event(&mut self, event: &Event) -> eyre::Result<()> {
        let task_id = event.task_id();
        debug!(%task_id, event_type = event.event_type(), "EventLogger::write_event");

        let writer = if let Some(w) = self.writers.get_mut(task_id) {
            w
        } else {
            let task_dir = self.tasks_dir.join(task_id);
            fs::create_dir_all(&task_dir)?;
            let log_path = task_dir.join("events.jsonl");
            let file = OpenOptions::new().create(true).append(true).open(&log_path)?;
            self.writers.insert(task_id.to_string(), BufWriter::new(file));
            self.writers.get_mut(task_id).unwrap()
        };

        let entry = EventLogEntry::new(event.clone());
        writeln!(writer, "{}", serde_json::to_string(&entry)?)?;
        writer.flush()?;
        Ok(())
    }

    pub fn close_task(&mut self, task_id: &str) {
        if let Some(mut writer) = self.writers.remove(task_id) {
            let _ = writer.flush();
        }
    }

    /// Runs as a background task, consuming events until the bus closes.
    pub async fn run(mut self, event_bus: Arc<EventBus>) {
        debug!("EventLogger::run: starting");
        let mut rx = event_bus.subscribe();

        loop {
            match rx.recv().await {
                Ok(event) => {
                    let task_id = event.task_id().to_string();
                    let terminal = matches!(
                        event,
                        Event::TaskTransitioned { ref status, .. } if status == "completed" || status == "failed" || status == "cancelled"
                    );
                    if let Err(e) = self.write_event(&event) {
                        error!(%task_id, error = %e, "EventLogger: failed to write event");
                    }
                    if terminal {
                        self.close_task(&task_id);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "EventLogger: lagged behind, missed events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("EventLogger: channel closed, shutting down");
                    break;
                }
            }
        }

        for (task_id, mut writer) in self.writers.drain() {
            if let Err(e) = writer.flush() {
                error!(%task_id, error = %e, "EventLogger: failed to flush on shutdown");
            }
        }
    }
}

/// Spawns the logger as a background tokio task; returns its join handle.
pub fn spawn_event_logger(tasks_dir: impl AsRef<Path>, event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let logger = EventLogger::new(tasks_dir);
    tokio::spawn(logger.run(event_bus))
}
