//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio::sync::Semaphore;

use crate::api::{ApiError, SessionEndpoint};
use crate::auth::{CredentialStore, MemoryCredentialStore, SessionManager, StoreError};
use crate::models::{CredentialPair, RefreshResponse, SessionResponse, UserProfile};

pub(crate) fn user() -> UserProfile {
    UserProfile {
        id: "42".into(),
        name: "Ana".into(),
        email: "ana@example.com".into(),
        avatar: None,
    }
}

pub(crate) fn expired_error() -> ApiError {
    ApiError::from_status(StatusCode::UNAUTHORIZED, r#"{"status": "error", "message": "token.expired"}"#)
}

/// Scripted `SessionEndpoint`. Refresh calls can be held at a gate until the
/// test releases them.
pub(crate) struct FakeEndpoint {
    refresh_calls: AtomicUsize,
    refresh_results: Mutex<VecDeque<Result<RefreshResponse, ApiError>>>,
    sign_in_result: Mutex<Option<Result<SessionResponse, ApiError>>>,
    gate: Option<Semaphore>,
}

impl FakeEndpoint {
    pub(crate) fn new() -> Self {
        Self {
            refresh_calls: AtomicUsize::new(0),
            refresh_results: Mutex::new(VecDeque::new()),
            sign_in_result: Mutex::new(None),
            gate: None,
        }
    }

    /// Refresh calls block until `release` is called
    pub(crate) fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    pub(crate) fn push_refresh(&self, result: Result<RefreshResponse, ApiError>) {
        self.refresh_results.lock().push_back(result);
    }

    pub(crate) fn push_refresh_ok(&self, access: &str, refresh: &str) {
        self.push_refresh(Ok(RefreshResponse {
            token: access.to_string(),
            refresh_token: Some(refresh.to_string()),
        }));
    }

    pub(crate) fn set_sign_in(&self, result: Result<SessionResponse, ApiError>) {
        *self.sign_in_result.lock() = Some(result);
    }

    pub(crate) fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionEndpoint for FakeEndpoint {
    async fn create_session(&self, _email: &str, _password: &str) -> Result<SessionResponse, ApiError> {
        self.sign_in_result
            .lock()
            .take()
            .unwrap_or_else(|| Err(ApiError::InvalidCredentials("Wrong e-mail or password.".into())))
    }

    async fn refresh_session(&self, _refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        self.refresh_results
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::InvalidRefreshToken("token.invalid".into())))
    }
}

/// Memory store whose token writes wait at a gate until the test releases
/// them.
pub(crate) struct GatedStore {
    inner: MemoryCredentialStore,
    gate: Semaphore,
    held: AtomicUsize,
}

impl GatedStore {
    pub(crate) fn new(inner: MemoryCredentialStore) -> Self {
        Self {
            inner,
            gate: Semaphore::new(0),
            held: AtomicUsize::new(0),
        }
    }

    pub(crate) fn release(&self) {
        self.gate.add_permits(1);
    }

    /// Token writes currently waiting at the gate
    pub(crate) fn held(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }

    pub(crate) fn records(&self) -> &MemoryCredentialStore {
        &self.inner
    }
}

#[async_trait]
impl CredentialStore for GatedStore {
    async fn get_tokens(&self) -> Result<Option<CredentialPair>, StoreError> {
        self.inner.get_tokens().await
    }

    async fn save_tokens(&self, tokens: &CredentialPair) -> Result<(), StoreError> {
        self.held.fetch_add(1, Ordering::SeqCst);
        self.gate.acquire().await.expect("gate closed").forget();
        self.held.fetch_sub(1, Ordering::SeqCst);
        self.inner.save_tokens(tokens).await
    }

    async fn remove_tokens(&self) -> Result<(), StoreError> {
        self.inner.remove_tokens().await
    }

    async fn get_user(&self) -> Result<Option<UserProfile>, StoreError> {
        self.inner.get_user().await
    }

    async fn save_user(&self, user: &UserProfile) -> Result<(), StoreError> {
        self.inner.save_user(user).await
    }

    async fn remove_user(&self) -> Result<(), StoreError> {
        self.inner.remove_user().await
    }
}

/// Session manager over a memory store, optionally already signed in.
pub(crate) async fn session_with(
    tokens: Option<CredentialPair>,
    endpoint: Arc<FakeEndpoint>,
) -> (Arc<SessionManager>, Arc<MemoryCredentialStore>) {
    let store = Arc::new(match tokens {
        Some(tokens) => MemoryCredentialStore::with_session(tokens, user()),
        None => MemoryCredentialStore::new(),
    });
    let session = Arc::new(SessionManager::new(store.clone(), endpoint));
    session.restore().await;
    (session, store)
}

/// Poll `condition` until it holds, failing the test after a second.
pub(crate) async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}
