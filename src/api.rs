//! Remote task API.
//!
//! [`TaskApi`] is the seam between the stores and the network. Every call
//! returns an [`ApiResult`]; the stores match on it instead of catching
//! errors. [`HttpTaskApi`] is the reqwest implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::models::{LoginRequest, LoginResponse, Task, TaskListResponse, TaskMutationResponse, TaskRequest};

/// Ways a remote call can fail.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The server answered with a non-2xx status.
    #[error("server rejected request with status {status}")]
    Rejected { status: u16 },
    /// The request never completed or the body could not be decoded.
    #[error("{0}")]
    Transport(String),
    /// A 2xx mutation response that carried no task.
    #[error("response did not include a task")]
    MissingPayload,
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Transport(err.to_string())
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Remote collaborator used by the task and login stores.
#[async_trait]
pub trait TaskApi: Send + Sync {
    /// `POST auth/login`
    async fn login(&self, request: &LoginRequest) -> ApiResult<LoginResponse>;

    /// `GET tasks`
    async fn list_tasks(&self) -> ApiResult<Vec<Task>>;

    /// `POST tasks`
    async fn create_task(&self, request: &TaskRequest) -> ApiResult<TaskMutationResponse>;

    /// `PUT tasks/{id}`
    async fn update_task(&self, id: i64, request: &TaskRequest) -> ApiResult<TaskMutationResponse>;

    /// `DELETE tasks/{id}`
    async fn delete_task(&self, id: i64) -> ApiResult<()>;
}

/// HTTP client for the tasks backend.
pub struct HttpTaskApi {
    client: Client,
    base_url: String,
}

impl HttpTaskApi {
    /// Create a client rooted at `base_url` with the given request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> eyre::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Wrap an already configured reqwest client.
    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn check_status(resp: Response) -> ApiResult<Response> {
        let status = resp.status();
        if !status.is_success() {
            debug!(%status, url = %resp.url(), "request rejected");
            return Err(ApiError::Rejected {
                status: status.as_u16(),
            });
        }
        Ok(resp)
    }

    async fn decode<T: DeserializeOwned>(resp: Response) -> ApiResult<T> {
        let resp = Self::check_status(resp)?;
        Ok(resp.json::<T>().await?)
    }
}

#[async_trait]
impl TaskApi for HttpTaskApi {
    async fn login(&self, request: &LoginRequest) -> ApiResult<LoginResponse> {
        debug!(username = %request.username, "POST auth/login");
        let resp = self.client.post(self.url("auth/login")).json(request).send().await?;
        Self::decode(resp).await
    }

    async fn list_tasks(&self) -> ApiResult<Vec<Task>> {
        debug!("GET tasks");
        let resp = self.client.get(self.url("tasks")).send().await?;
        let body: TaskListResponse = Self::decode(resp).await?;
        Ok(body.tasks)
    }

    async fn create_task(&self, request: &TaskRequest) -> ApiResult<TaskMutationResponse> {
        debug!(title = %request.title, "POST tasks");
        let resp = self.client.post(self.url("tasks")).json(request).send().await?;
        Self::decode(resp).await
    }

    async fn update_task(&self, id: i64, request: &TaskRequest) -> ApiResult<TaskMutationResponse> {
        debug!(id, "PUT tasks/:id");
        let resp = self
            .client
            .put(self.url(&format!("tasks/{}", id)))
            .json(request)
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn delete_task(&self, id: i64) -> ApiResult<()> {
        debug!(id, "DELETE tasks/:id");
        let resp = self.client.delete(self.url(&format!("tasks/{}", id))).send().await?;
        Self::check_status(resp)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash() {
        let api = HttpTaskApi::with_client(Client::new(), "http://localhost:3000/api/");
        assert_eq!(api.base_url(), "http://localhost:3000/api");
        assert_eq!(api.url("tasks/7"), "http://localhost:3000/api/tasks/7");
    }

    #[test]
    fn test_api_error_display() {
        assert_eq!(
            ApiError::Rejected { status: 500 }.to_string(),
            "server rejected request with status 500"
        );
        assert_eq!(ApiError::Transport("timed out".to_string()).to_string(), "timed out");
    }
}
