//! In-memory task table for one agent, with a broadcast of task events.

use std::{collections::HashMap, time::Duration};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::a2a::{Artifact, Message, Task, TaskError, TaskState};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskEvent {
    Status { task_id: String, state: TaskState },
    Output { task_id: String, text: String },
    Done { task_id: String, state: TaskState },
}

impl TaskEvent {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Status { task_id, .. } | Self::Output { task_id, .. } | Self::Done { task_id, .. } => {
                task_id
            }
        }
    }
}

pub struct TaskStore {
    tasks: Mutex<HashMap<String, Task>>,
    events: broadcast::Sender<TaskEvent>,
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tasks: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: TaskEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn create(
        &self,
        message: Message,
        context_id: Option<String>,
        metadata: Map<String, Value>,
    ) -> Task {
        let mut task = Task::new(message, context_id);
        task.metadata = metadata;
        self.insert(task)
    }

    /// Create under a caller-chosen id, replacing any existing entry.
    pub fn create_with_id(
        &self,
        id: &str,
        message: Message,
        context_id: Option<String>,
        metadata: Map<String, Value>,
    ) -> Task {
        let mut task = Task::new(message, context_id);
        task.id = id.to_string();
        task.metadata = metadata;
        self.insert(task)
    }

    fn insert(&self, task: Task) -> Task {
        self.tasks.lock().insert(task.id.clone(), task.clone());
        tracing::debug!(target = "synapse::tasks", task_id = %task.id, "task created");
        self.publish(TaskEvent::Status {
            task_id: task.id.clone(),
            state: task.status,
        });
        task
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.tasks.lock().get(id).cloned()
    }

    /// Oldest first, optionally restricted to one context.
    pub fn list(&self, context_id: Option<&str>) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .lock()
            .values()
            .filter(|task| context_id.is_none() || task.context_id.as_deref() == context_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    /// Terminal states are final: updating a finished task returns it unchanged.
    pub fn update_status(&self, id: &str, state: TaskState) -> Option<Task> {
        self.mutate(id, |task| {
            task.status = state;
        })
    }

    pub fn add_artifact(&self, id: &str, artifact: Artifact) -> bool {
        let text = artifact
            .parts
            .iter()
            .filter_map(|part| part.as_text())
            .collect::<Vec<_>>()
            .join("\n");
        let updated = {
            let mut tasks = self.tasks.lock();
            match tasks.get_mut(id) {
                Some(task) if !task.status.is_terminal() => {
                    task.artifacts.push(artifact);
                    task.updated_at = Utc::now();
                    true
                }
                _ => false,
            }
        };
        if updated {
            self.publish(TaskEvent::Output {
                task_id: id.to_string(),
                text,
            });
        }
        updated
    }

    /// Attach `text` as an artifact and complete the task.
    pub fn complete_with_reply(&self, id: &str, text: &str) -> Option<Task> {
        self.add_artifact(id, Artifact::text(text));
        self.update_status(id, TaskState::Completed)
    }

    pub fn fail(&self, id: &str, code: &str, message: &str) -> Option<Task> {
        self.mutate(id, |task| {
            task.status = TaskState::Failed;
            task.error = Some(TaskError {
                code: code.to_string(),
                message: message.to_string(),
            });
        })
    }

    pub fn cancel(&self, id: &str) -> Option<Task> {
        self.update_status(id, TaskState::Canceled)
    }

    fn mutate(&self, id: &str, apply: impl FnOnce(&mut Task)) -> Option<Task> {
        let (task, changed) = {
            let mut tasks = self.tasks.lock();
            let task = tasks.get_mut(id)?;
            if task.status.is_terminal() {
                (task.clone(), false)
            } else {
                apply(task);
                task.updated_at = Utc::now();
                (task.clone(), true)
            }
        };
        if !changed {
            tracing::debug!(target = "synapse::tasks", task_id = %id, state = %task.status, "ignoring update to finished task");
            return Some(task);
        }
        tracing::debug!(target = "synapse::tasks", task_id = %id, state = %task.status, "task updated");
        self.publish(TaskEvent::Status {
            task_id: task.id.clone(),
            state: task.status,
        });
        if task.status.is_terminal() {
            self.publish(TaskEvent::Done {
                task_id: task.id.clone(),
                state: task.status,
            });
        }
        Some(task)
    }

    /// Poll until the task finishes or `timeout` passes. Returns the last
    /// seen task, or `None` if it does not exist. The task is never cancelled.
    pub async fn wait_for_terminal(
        &self,
        id: &str,
        timeout: Duration,
        interval: Duration,
    ) -> Option<Task> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let task = self.get(id)?;
            if task.status.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Some(task);
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Fail open tasks with no update for `max_age`, so a later
    /// `prune_finished` can drop them. Returns how many expired.
    pub fn expire_open(&self, max_age: Duration) -> usize {
        let Some(cutoff) = cutoff(max_age) else {
            return 0;
        };
        let stale: Vec<String> = self
            .tasks
            .lock()
            .values()
            .filter(|task| !task.status.is_terminal() && task.updated_at < cutoff)
            .map(|task| task.id.clone())
            .collect();
        for id in &stale {
            self.fail(id, "expired", "no update before the task expired");
        }
        if !stale.is_empty() {
            tracing::debug!(target = "synapse::tasks", expired = stale.len(), "expired open tasks");
        }
        stale.len()
    }

    /// Drop finished tasks last updated more than `max_age` ago.
    pub fn prune_finished(&self, max_age: Duration) -> usize {
        let Some(cutoff) = cutoff(max_age) else {
            return 0;
        };
        let mut tasks = self.tasks.lock();
        let before = tasks.len();
        tasks.retain(|_, task| !(task.status.is_terminal() && task.updated_at < cutoff));
        before - tasks.len()
    }
}

fn cutoff(max_age: Duration) -> Option<chrono::DateTime<Utc>> {
    chrono::Duration::from_std(max_age)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
}
