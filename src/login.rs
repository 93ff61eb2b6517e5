// Login form state and the auth/login call

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::api::TaskApi;
use crate::models::{LoginRequest, LoginResponse};
use crate::state::{InFlight, Loading, LoadingGuard, Observable};
use crate::store::failure_message;

pub const MSG_INVALID_CREDENTIALS: &str = "invalid credentials";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoginState {
    pub username: String,
    pub password: String,
    pub is_loading: bool,
    pub error_message: Option<String>,
    in_flight: InFlight,
}

impl Loading for LoginState {
    fn begin_load(&mut self) {
        self.is_loading = self.in_flight.enter();
    }

    fn end_load(&mut self) {
        self.is_loading = self.in_flight.exit();
    }
}

pub struct LoginStore {
    api: Arc<dyn TaskApi>,
    state: Observable<LoginState>,
}

impl LoginStore {
    pub fn new(api: Arc<dyn TaskApi>) -> Self {
        Self {
            api,
            state: Observable::default(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<LoginState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> LoginState {
        self.state.snapshot()
    }

    pub fn set_credentials(&self, username: Option<&str>, password: Option<&str>) {
        self.state.update(|s| {
            if let Some(username) = username {
                s.username = username.to_string();
            }
            if let Some(password) = password {
                s.password = password.to_string();
            }
        });
    }

    /// Send the current credentials. Any 2xx counts as a successful login;
    /// the server's message is handed to `on_success`.
    pub async fn login<F>(&self, on_success: F)
    where
        F: FnOnce(&LoginResponse) + Send,
    {
        let request = self.state.with(|s| LoginRequest {
            username: s.username.clone(),
            password: s.password.clone(),
        });

        let _loading = LoadingGuard::begin(&self.state);
        self.state.update(|s| s.error_message = None);

        match self.api.login(&request).await {
            Ok(resp) => {
                info!(username = %request.username, "logged in");
                on_success(&resp);
            }
            Err(e) => {
                warn!(username = %request.username, error = %e, "login failed");
                let message = failure_message(MSG_INVALID_CREDENTIALS, &e);
                self.state.update(|s| s.error_message = Some(message));
            }
        }
    }
}
