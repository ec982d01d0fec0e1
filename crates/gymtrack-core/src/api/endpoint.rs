//! Session establishment and renewal endpoints.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

use crate::models::{RefreshResponse, SessionResponse};

use super::request::resolve;
use super::ApiError;

/// Remote operations that create and renew a session.
#[async_trait]
pub trait SessionEndpoint: Send + Sync {
    /// Exchange e-mail and password for a user profile and token pair.
    ///
    /// Wrong credentials fail with `ApiError::InvalidCredentials`.
    async fn create_session(&self, email: &str, password: &str) -> Result<SessionResponse, ApiError>;

    /// Exchange a refresh token for a new token pair.
    ///
    /// A rejected refresh token fails with `ApiError::InvalidRefreshToken`,
    /// network problems with `ApiError::Transport`.
    async fn refresh_session(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError>;
}

/// `SessionEndpoint` over the service's REST API.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpSessionEndpoint {
    client: Client,
    base_url: Url,
}

impl HttpSessionEndpoint {
    pub fn new(client: Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: serde_json::Value) -> Result<T, ApiError> {
        let url = resolve(&self.base_url, path)?;

        let response = self
            .client
            .post(url)
            .header(header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(path, status = %status, body = %ApiError::truncate_body(&body), "Session endpoint failure");
            return Err(ApiError::from_status(status, &body));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl SessionEndpoint for HttpSessionEndpoint {
    async fn create_session(&self, email: &str, password: &str) -> Result<SessionResponse, ApiError> {
        let body = json!({ "email": email, "password": password });
        self.post("/sessions", body).await.map_err(|err| match err {
            ApiError::Application { status, message, .. } if status == StatusCode::UNAUTHORIZED => {
                ApiError::InvalidCredentials(message)
            }
            other => other,
        })
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        let body = json!({ "refresh_token": refresh_token });
        self.post("/sessions/refresh-token", body).await.map_err(|err| match err {
            ApiError::Application { status, message, .. } if status.is_client_error() => {
                warn!(status = %status, "Refresh token rejected");
                ApiError::InvalidRefreshToken(message)
            }
            other => other,
        })
    }
}
