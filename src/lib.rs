// TaskSync - task list client for a REST backend, plus local roster and preferences

pub mod api;
pub mod config;
pub mod login;
pub mod models;
pub mod prefs;
pub mod roster;
pub mod state;
pub mod store;

// Re-export main types for convenience
pub use api::{ApiError, ApiResult, HttpTaskApi, TaskApi};
pub use config::ClientConfig;
pub use login::{LoginState, LoginStore};
pub use models::{Student, Task, now_ms};
pub use prefs::{Location, LocationProvider, PreferencesFile, UserPreferences};
pub use roster::StudentRoster;
pub use state::Observable;
pub use store::{Intent, TaskState, TaskSyncStore};
