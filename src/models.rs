// Data models for TaskSync

use serde::{Deserialize, Serialize};

/// A to-do item as the backend returns it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub description: String,
}

impl Task {
    pub fn new(id: i64, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            description: description.into(),
        }
    }
}

/// Body for create and update calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub title: String,
    pub description: String,
}

impl TaskRequest {
    /// Build a request from raw input, trimming both fields
    pub fn trimmed(title: &str, description: &str) -> Self {
        Self {
            title: title.trim().to_string(),
            description: description.trim().to_string(),
        }
    }

    /// True when either field is empty after trimming
    pub fn is_blank(&self) -> bool {
        self.title.trim().is_empty() || self.description.trim().is_empty()
    }
}

/// Body of `GET tasks`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskListResponse {
    pub tasks: Vec<Task>,
}

/// Body of `POST tasks` and `PUT tasks/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMutationResponse {
    pub success: bool,
    #[serde(default)]
    pub task: Option<Task>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

/// Row of the local student roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: i64,
    pub name: String,
}

/// Helper function to get current timestamp in milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
