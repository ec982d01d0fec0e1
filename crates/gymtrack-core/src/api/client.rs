//! API client for communicating with the exercise tracking REST API.
//!
//! Every call goes through `ApiClient::send`, which attaches the current
//! access token and default content headers, and hands failures to the
//! `RefreshCoordinator` before anything reaches the caller.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::auth::{CredentialStore, SessionManager};
use crate::config::Config;
use crate::models::{Exercise, HistoryByDay, UserProfile};

use super::request::resolve;
use super::{path_segment, ApiError, ApiRequest, FilePart, HttpSessionEndpoint, RefreshCoordinator, SessionEndpoint};

// ============================================================================
// Constants
// ============================================================================

/// Default HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Multipart field name the server expects for avatar uploads
const AVATAR_FIELD: &str = "avatar";

#[derive(Debug, Deserialize)]
struct AvatarResponse {
    avatar: Option<String>,
}

/// API client for the exercise tracking service.
/// Clone is cheap - the HTTP client, session and coordinator are shared.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    session: Arc<SessionManager>,
    coordinator: Arc<RefreshCoordinator>,
}

impl ApiClient {
    /// Create a client talking to `base_url`, with sessions persisted in `store`.
    pub fn new(
        base_url: &str,
        timeout: Duration,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = parse_base_url(base_url)?;
        let endpoint: Arc<dyn SessionEndpoint> =
            Arc::new(HttpSessionEndpoint::new(client.clone(), base_url.clone()));
        let session = Arc::new(SessionManager::new(store, endpoint.clone()));
        Ok(Self::from_parts(client, base_url, session, endpoint))
    }

    pub fn from_config(config: &Config, store: Arc<dyn CredentialStore>) -> Result<Self, ApiError> {
        Self::new(&config.api_base_url, config.request_timeout(), store)
    }

    /// Assemble a client from an existing session and endpoint. The
    /// endpoint must be the one the session signs in with.
    pub fn from_parts(
        client: Client,
        base_url: Url,
        session: Arc<SessionManager>,
        endpoint: Arc<dyn SessionEndpoint>,
    ) -> Self {
        let coordinator = Arc::new(RefreshCoordinator::new(session.clone(), endpoint));
        Self {
            client,
            base_url,
            session,
            coordinator,
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Send a request with the session's credentials.
    ///
    /// Success responses are returned unchanged. An expired-token failure is
    /// resolved by the refresh coordinator and the request re-sent once with
    /// the new token; that second outcome is what the caller gets.
    pub async fn send(&self, request: ApiRequest) -> Result<Response, ApiError> {
        let token = self.session.access_token();

        match self.execute(&request, token.as_deref()).await {
            Ok(response) => Ok(response),
            Err(error) => {
                let replay = self
                    .coordinator
                    .handle_failure(request, token.as_deref(), error)
                    .await?;
                debug!(method = %replay.request.method(), path = replay.request.path(), "Replaying request");
                self.execute(&replay.request, Some(&replay.token)).await
            }
        }
    }

    /// Send and decode a JSON response
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let path = request.path().to_string();
        let response = self.send(request).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse response from {}: {}", path, e)))
    }

    /// Send, discarding the response body
    pub async fn send_empty(&self, request: ApiRequest) -> Result<(), ApiError> {
        self.send(request).await.map(|_| ())
    }

    /// One attempt on the wire. Non-success statuses become `ApiError`s.
    async fn execute(&self, request: &ApiRequest, token: Option<&str>) -> Result<Response, ApiError> {
        let response = request
            .build(&self.client, &self.base_url, token)?
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(method = %request.method(), path = request.path(), status = %status, "Request succeeded");
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!(
            method = %request.method(),
            path = request.path(),
            status = %status,
            body = %ApiError::truncate_body(&body),
            "Request failed"
        );
        Err(ApiError::from_status(status, &body))
    }

    // ===== Users =====

    /// Register a new account. Works without a session.
    pub async fn create_user(&self, name: &str, email: &str, password: &str) -> Result<(), ApiError> {
        let request = ApiRequest::post("/users")
            .json(&json!({ "name": name, "email": email, "password": password }))?;
        self.send_empty(request).await
    }

    /// Update the user's name and, optionally, password. The session profile
    /// is updated with the new name on success.
    pub async fn update_user(
        &self,
        name: &str,
        password: Option<&str>,
        old_password: Option<&str>,
    ) -> Result<UserProfile, ApiError> {
        let mut user = self.session.user().ok_or(ApiError::NotSignedIn)?;

        let mut body = json!({ "name": name });
        if let (Some(password), Some(old_password)) = (password, old_password) {
            body["password"] = json!(password);
            body["old_password"] = json!(old_password);
        }
        self.send_empty(ApiRequest::put("/users").json(&body)?).await?;

        user.name = name.to_string();
        self.session.update_profile(user.clone()).await?;
        Ok(user)
    }

    /// Upload a new avatar image and record it on the session profile.
    pub async fn update_avatar(
        &self,
        file_name: &str,
        mime: &str,
        bytes: Vec<u8>,
    ) -> Result<UserProfile, ApiError> {
        let mut user = self.session.user().ok_or(ApiError::NotSignedIn)?;

        let request = ApiRequest::patch("/users/avatar").multipart(vec![FilePart {
            field: AVATAR_FIELD.to_string(),
            file_name: file_name.to_lowercase(),
            mime: mime.to_string(),
            bytes,
        }]);
        let response: AvatarResponse = self.send_json(request).await?;

        user.avatar = response.avatar;
        self.session.update_profile(user.clone()).await?;
        Ok(user)
    }

    // ===== Exercises =====

    /// Muscle groups with exercises
    pub async fn groups(&self) -> Result<Vec<String>, ApiError> {
        self.send_json(ApiRequest::get("/groups")).await
    }

    pub async fn exercises_by_group(&self, group: &str) -> Result<Vec<Exercise>, ApiError> {
        let path = format!("/exercises/bygroup/{}", path_segment(group));
        self.send_json(ApiRequest::get(path)).await
    }

    pub async fn exercise(&self, id: &str) -> Result<Exercise, ApiError> {
        let path = format!("/exercises/{}", path_segment(id));
        self.send_json(ApiRequest::get(path)).await
    }

    // ===== History =====

    /// Log a completed exercise
    pub async fn register_history(&self, exercise_id: &str) -> Result<(), ApiError> {
        let request = ApiRequest::post("/history").json(&json!({ "exercise_id": exercise_id }))?;
        self.send_empty(request).await
    }

    /// Logged exercises grouped by day, most recent first
    pub async fn history(&self) -> Result<Vec<HistoryByDay>, ApiError> {
        self.send_json(ApiRequest::get("/history")).await
    }

    // ===== Assets =====

    pub fn exercise_demo_url(&self, exercise: &Exercise) -> Result<Url, ApiError> {
        resolve(&self.base_url, &format!("/exercise/demo/{}", path_segment(&exercise.demo)))
    }

    pub fn exercise_thumb_url(&self, exercise: &Exercise) -> Result<Url, ApiError> {
        resolve(&self.base_url, &format!("/exercise/thumb/{}", path_segment(&exercise.thumb)))
    }

    pub fn avatar_url(&self, user: &UserProfile) -> Option<Url> {
        let file = user.avatar_file()?;
        resolve(&self.base_url, &format!("/avatar/{}", path_segment(file))).ok()
    }
}

fn parse_base_url(base_url: &str) -> Result<Url, ApiError> {
    let url = Url::parse(base_url)
        .map_err(|e| ApiError::InvalidRequest(format!("Invalid API base URL {}: {}", base_url, e)))?;
    if url.cannot_be_a_base() {
        return Err(ApiError::InvalidRequest(format!("Invalid API base URL {}", base_url)));
    }
    Ok(url)
}
