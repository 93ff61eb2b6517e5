// Task list store backed by the remote task API

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::api::{ApiError, TaskApi};
use crate::models::{Task, TaskMutationResponse, TaskRequest};
use crate::state::{InFlight, Loading, LoadingGuard, Observable};

pub const MSG_FIELDS_REQUIRED: &str = "all fields are required";
pub const MSG_LOAD_FAILED: &str = "failed to load tasks";
pub const MSG_CREATE_FAILED: &str = "failed to create task";
pub const MSG_UPDATE_FAILED: &str = "failed to update task";
pub const MSG_DELETE_FAILED: &str = "failed to delete task";

/// Text shown for a failed call: the operation's own message for a
/// rejection, the transport error otherwise
pub fn failure_message(operation: &str, err: &ApiError) -> String {
    match err {
        ApiError::Transport(msg) => format!("connection error: {}", msg),
        ApiError::Rejected { .. } | ApiError::MissingPayload => operation.to_string(),
    }
}

/// Everything an observer of the task list can see
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskState {
    pub tasks: Vec<Task>,
    pub draft_title: String,
    pub draft_description: String,
    pub is_loading: bool,
    pub error_message: Option<String>,
    in_flight: InFlight,
}

impl Loading for TaskState {
    fn begin_load(&mut self) {
        self.is_loading = self.in_flight.enter();
    }

    fn end_load(&mut self) {
        self.is_loading = self.in_flight.exit();
    }
}

/// Work that can be handed to [`TaskSyncStore::dispatch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Load,
    Create,
    Update { id: i64, title: String, description: String },
    Delete { id: i64 },
}

/// Single source of truth for the task list seen by one consumer.
///
/// The store never persists anything; a new instance starts empty and needs
/// a [`load`](Self::load). Operations may overlap and are applied in the
/// order their responses arrive.
pub struct TaskSyncStore {
    inner: Arc<Inner>,
    running: JoinSet<()>,
}

struct Inner {
    api: Arc<dyn TaskApi>,
    state: Observable<TaskState>,
}

impl TaskSyncStore {
    pub fn new(api: Arc<dyn TaskApi>) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                state: Observable::default(),
            }),
            running: JoinSet::new(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> TaskState {
        self.inner.state.snapshot()
    }

    /// Replace the draft buffers; `None` leaves a buffer as it is
    pub fn set_draft(&self, title: Option<&str>, description: Option<&str>) {
        self.inner.state.update(|s| {
            if let Some(title) = title {
                s.draft_title = title.to_string();
            }
            if let Some(description) = description {
                s.draft_description = description.to_string();
            }
        });
    }

    /// Fetch the full list and replace the local one
    pub async fn load(&self) {
        self.inner.load().await;
    }

    /// Send the draft to the server and append the created task
    pub async fn create<F>(&self, on_success: F)
    where
        F: FnOnce(&Task) + Send,
    {
        self.inner.create(on_success).await;
    }

    pub async fn update<F>(&self, id: i64, title: &str, description: &str, on_success: F)
    where
        F: FnOnce(&Task) + Send,
    {
        self.inner.update(id, title, description, on_success).await;
    }

    pub async fn delete(&self, id: i64) {
        self.inner.delete(id).await;
    }

    /// Run an operation in the background. The handle is owned by the store
    /// and aborted by [`dispose`](Self::dispose) or when the store is dropped.
    pub fn dispatch(&mut self, intent: Intent) {
        while self.running.try_join_next().is_some() {}

        debug!(?intent, "dispatching");
        let inner = Arc::clone(&self.inner);
        self.running.spawn(async move {
            match intent {
                Intent::Load => inner.load().await,
                Intent::Create => inner.create(|_| {}).await,
                Intent::Update { id, title, description } => inner.update(id, &title, &description, |_| {}).await,
                Intent::Delete { id } => inner.delete(id).await,
            }
        });
    }

    /// Number of dispatched operations that have not finished yet
    pub fn pending(&self) -> usize {
        self.running.len()
    }

    /// Wait for every dispatched operation to finish
    pub async fn settle(&mut self) {
        while let Some(result) = self.running.join_next().await {
            if let Err(e) = result {
                if e.is_panic() {
                    warn!(error = %e, "task operation panicked");
                }
            }
        }
    }

    /// Abort every dispatched operation that is still running
    pub fn dispose(&mut self) {
        if !self.running.is_empty() {
            info!(count = self.running.len(), "cancelling in-flight task operations");
        }
        self.running.abort_all();
    }
}

impl Inner {
    fn fail(&self, operation: &str, err: &ApiError) {
        let message = failure_message(operation, err);
        warn!(operation, error = %err, "task operation failed");
        self.state.update(|s| s.error_message = Some(message));
    }

    fn reject_blank(&self, request: &TaskRequest) -> bool {
        if request.is_blank() {
            debug!("blank title or description, not sending");
            self.state
                .update(|s| s.error_message = Some(MSG_FIELDS_REQUIRED.to_string()));
            return true;
        }
        false
    }

    async fn load(&self) {
        let _loading = LoadingGuard::begin(&self.state);

        match self.api.list_tasks().await {
            Ok(tasks) => {
                let tasks = dedup_by_id(tasks);
                info!(count = tasks.len(), "loaded tasks");
                self.state.update(|s| {
                    s.tasks = tasks;
                    s.error_message = None;
                });
            }
            Err(e) => self.fail(MSG_LOAD_FAILED, &e),
        }
    }

    async fn create<F>(&self, on_success: F)
    where
        F: FnOnce(&Task) + Send,
    {
        let request = self
            .state
            .with(|s| TaskRequest::trimmed(&s.draft_title, &s.draft_description));
        if self.reject_blank(&request) {
            return;
        }

        let _loading = LoadingGuard::begin(&self.state);

        match self.api.create_task(&request).await {
            Ok(TaskMutationResponse { task: Some(task), .. }) => {
                info!(id = task.id, "created task");
                self.state.update(|s| {
                    upsert(&mut s.tasks, task.clone());
                    s.draft_title.clear();
                    s.draft_description.clear();
                    s.error_message = None;
                });
                on_success(&task);
            }
            Ok(_) => self.fail(MSG_CREATE_FAILED, &ApiError::MissingPayload),
            Err(e) => self.fail(MSG_CREATE_FAILED, &e),
        }
    }

    async fn update<F>(&self, id: i64, title: &str, description: &str, on_success: F)
    where
        F: FnOnce(&Task) + Send,
    {
        let request = TaskRequest::trimmed(title, description);
        if self.reject_blank(&request) {
            return;
        }

        let _loading = LoadingGuard::begin(&self.state);

        match self.api.update_task(id, &request).await {
            Ok(TaskMutationResponse { task: Some(task), .. }) => {
                info!(id, "updated task");
                self.state.update(|s| {
                    match s.tasks.iter_mut().find(|t| t.id == id) {
                        Some(slot) => *slot = task.clone(),
                        None => debug!(id, "updated task is no longer in the local list"),
                    }
                    s.error_message = None;
                });
                on_success(&task);
            }
            Ok(_) => self.fail(MSG_UPDATE_FAILED, &ApiError::MissingPayload),
            Err(e) => self.fail(MSG_UPDATE_FAILED, &e),
        }
    }

    async fn delete(&self, id: i64) {
        match self.api.delete_task(id).await {
            Ok(()) => {
                info!(id, "deleted task");
                self.state.update(|s| {
                    s.tasks.retain(|t| t.id != id);
                    s.error_message = None;
                });
            }
            Err(e) => self.fail(MSG_DELETE_FAILED, &e),
        }
    }
}

/// Keep the first occurrence of every id, preserving order
fn dedup_by_id(tasks: Vec<Task>) -> Vec<Task> {
    let mut seen = std::collections::HashSet::new();
    let total = tasks.len();
    let unique: Vec<Task> = tasks.into_iter().filter(|t| seen.insert(t.id)).collect();
    if unique.len() != total {
        warn!(dropped = total - unique.len(), "server returned duplicate task ids");
    }
    unique
}

/// Replace the entry with the same id, or append
fn upsert(tasks: &mut Vec<Task>, task: Task) {
    match tasks.iter_mut().find(|t| t.id == task.id) {
        Some(slot) => *slot = task,
        None => tasks.push(task),
    }
}
