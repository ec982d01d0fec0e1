//! Session state for the signed-in user.
//!
//! The `SessionManager` is the single owner of the in-memory token pair and
//! user profile. Every change to them is published on a `watch` channel
//! while the state lock is still held, so an observer never sees a status
//! that disagrees with what the API client is using.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::api::{ApiError, SessionEndpoint};
use crate::models::{CredentialPair, UserProfile};

use super::{CredentialStore, StoreError};

/// What observers (the UI) see of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Inactive,
    Active(UserProfile),
}

impl SessionStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Active(_))
    }

    pub fn user(&self) -> Option<&UserProfile> {
        match self {
            SessionStatus::Active(user) => Some(user),
            SessionStatus::Inactive => None,
        }
    }
}

#[derive(Default)]
struct SessionState {
    credentials: Option<CredentialPair>,
    user: Option<UserProfile>,
    /// Bumped whenever a session starts or ends. A refresh started under one
    /// epoch must not write its tokens into another.
    epoch: u64,
}

pub struct SessionManager {
    store: Arc<dyn CredentialStore>,
    endpoint: Arc<dyn SessionEndpoint>,
    state: RwLock<SessionState>,
    status: watch::Sender<SessionStatus>,
    /// Held across every credential store write and removal, so a save can
    /// never land in between sign-out's removals and resurrect its records.
    persist: Mutex<()>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn CredentialStore>, endpoint: Arc<dyn SessionEndpoint>) -> Self {
        let (status, _) = watch::channel(SessionStatus::Inactive);
        Self {
            store,
            endpoint,
            state: RwLock::new(SessionState::default()),
            status,
            persist: Mutex::new(()),
        }
    }

    /// Load a previous session from the credential store.
    ///
    /// Returns whether a session was activated. Storage errors are logged and
    /// treated as "no session".
    pub async fn restore(&self) -> bool {
        let user = match self.store.get_user().await {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %e, "Failed to read stored user");
                None
            }
        };
        let tokens = match self.store.get_tokens().await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Failed to read stored tokens");
                None
            }
        };

        match (tokens, user) {
            (Some(tokens), Some(user)) if tokens.has_access_token() && user.is_valid() => {
                info!(user_id = %user.id, "Session restored");
                self.activate(tokens, user);
                true
            }
            (tokens, user) => {
                debug!(
                    has_tokens = tokens.is_some(),
                    has_user = user.is_some(),
                    "No stored session"
                );
                false
            }
        }
    }

    /// Sign in with e-mail and password, persisting and activating the session.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<UserProfile, ApiError> {
        let response = self.endpoint.create_session(email, password).await?;

        if !response.user.is_valid() || response.token.is_empty() {
            return Err(ApiError::InvalidResponse(
                "Session response is missing the user or the token".to_string(),
            ));
        }
        if response.refresh_token.as_deref().map_or(true, str::is_empty) {
            warn!("Session response has no refresh token; the session cannot be renewed");
        }

        let credentials = response.credentials();
        let _persist = self.persist.lock().await;
        self.store.save_user(&response.user).await?;
        if let Err(e) = self.store.save_tokens(&credentials).await {
            if let Err(cleanup) = self.store.remove_user().await {
                warn!(error = %cleanup, "Failed to remove user after token save failure");
            }
            return Err(e.into());
        }

        info!(user_id = %response.user.id, "Signed in");
        self.activate(credentials, response.user.clone());
        Ok(response.user)
    }

    /// End the session: clear memory, then remove both stored records.
    ///
    /// Safe to call at any time, including when already signed out. Memory is
    /// always cleared; the first storage error (if any) is returned after
    /// both removals have been attempted.
    pub async fn sign_out(&self) -> Result<(), StoreError> {
        if self.deactivate() {
            info!("Signed out");
        }

        let _persist = self.persist.lock().await;
        let user_removed = self.store.remove_user().await;
        let tokens_removed = self.store.remove_tokens().await;
        if let Err(ref e) = user_removed {
            warn!(error = %e, "Failed to remove stored user");
        }
        if let Err(ref e) = tokens_removed {
            warn!(error = %e, "Failed to remove stored tokens");
        }
        user_removed.and(tokens_removed)
    }

    /// Replace the user profile, leaving the tokens alone.
    pub async fn update_profile(&self, profile: UserProfile) -> Result<(), ApiError> {
        if !profile.is_valid() {
            return Err(ApiError::InvalidRequest("Profile has no id".to_string()));
        }
        let _persist = self.persist.lock().await;
        let epoch = {
            let mut state = self.state.write();
            if state.credentials.is_none() {
                return Err(ApiError::NotSignedIn);
            }
            state.user = Some(profile.clone());
            self.status.send_replace(SessionStatus::Active(profile.clone()));
            state.epoch
        };
        self.store.save_user(&profile).await?;

        if self.state.read().epoch != epoch {
            if let Err(e) = self.store.remove_user().await {
                warn!(error = %e, "Failed to remove profile saved after sign-out");
            }
            return Err(ApiError::SessionEnded);
        }
        debug!(user_id = %profile.id, "Profile updated");
        Ok(())
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.state.read().user.clone()
    }

    pub fn is_active(&self) -> bool {
        self.state.read().credentials.is_some()
    }

    /// Access token to attach to outgoing requests
    pub fn access_token(&self) -> Option<String> {
        self.state.read().credentials.as_ref().map(|c| c.access_token.clone())
    }

    pub fn credentials(&self) -> Option<CredentialPair> {
        self.state.read().credentials.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Observe session activation and deactivation
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Current credentials together with the epoch they belong to
    pub(crate) fn snapshot(&self) -> (Option<CredentialPair>, u64) {
        let state = self.state.read();
        (state.credentials.clone(), state.epoch)
    }

    /// Install a refreshed token pair, provided the session that requested the
    /// refresh is still the current one.
    ///
    /// Memory is updated before the pair is persisted, so requests issued
    /// while the write is in progress already use the new token. A failed
    /// write is logged; the process keeps the new pair. If the session ends
    /// while the write is pending, the written pair is removed again and
    /// `SessionEnded` returned.
    pub(crate) async fn apply_refreshed(
        &self,
        epoch: u64,
        credentials: CredentialPair,
    ) -> Result<(), ApiError> {
        let _persist = self.persist.lock().await;
        {
            let mut state = self.state.write();
            if state.epoch != epoch || state.credentials.is_none() {
                return Err(ApiError::SessionEnded);
            }
            state.credentials = Some(credentials.clone());
        }

        if let Err(e) = self.store.save_tokens(&credentials).await {
            warn!(error = %e, "Failed to persist refreshed tokens");
        }

        if self.state.read().epoch != epoch {
            debug!("Session ended while refreshed tokens were being saved");
            if let Err(e) = self.store.remove_tokens().await {
                warn!(error = %e, "Failed to remove tokens saved after sign-out");
            }
            return Err(ApiError::SessionEnded);
        }
        Ok(())
    }

    /// Resolves once the session identified by `epoch` has ended or been
    /// replaced.
    pub(crate) async fn ended(&self, epoch: u64) {
        let mut rx = self.status.subscribe();
        loop {
            if self.state.read().epoch != epoch {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender lives as long as self
                futures::future::pending::<()>().await;
            }
        }
    }

    fn activate(&self, credentials: CredentialPair, user: UserProfile) {
        let mut state = self.state.write();
        state.credentials = Some(credentials);
        state.user = Some(user.clone());
        state.epoch += 1;
        self.status.send_replace(SessionStatus::Active(user));
    }

    /// Clear in-memory state; returns whether there was anything to clear.
    fn deactivate(&self) -> bool {
        let mut state = self.state.write();
        let was_active = state.credentials.is_some() || state.user.is_some();
        if was_active {
            state.credentials = None;
            state.user = None;
            state.epoch += 1;
            self.status.send_replace(SessionStatus::Inactive);
        }
        was_active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryCredentialStore;
    use crate::models::SessionResponse;
    use crate::testing::{session_with, user, FakeEndpoint};

    fn session_response() -> SessionResponse {
        SessionResponse {
            user: user(),
            token: "t1".into(),
            refresh_token: Some("r1".into()),
        }
    }

    #[tokio::test]
    async fn test_restore_activates_stored_session() {
        let endpoint = Arc::new(FakeEndpoint::new());
        let (session, _) = session_with(Some(CredentialPair::new("t1", "r1")), endpoint).await;

        assert!(session.is_active());
        assert_eq!(session.access_token().as_deref(), Some("t1"));
        assert_eq!(session.status(), SessionStatus::Active(user()));
    }

    #[tokio::test]
    async fn test_restore_needs_both_records() {
        let store = Arc::new(MemoryCredentialStore::new());
        store.save_tokens(&CredentialPair::new("t1", "r1")).await.expect("save");
        let session = SessionManager::new(store, Arc::new(FakeEndpoint::new()));

        assert!(!session.restore().await);
        assert!(!session.is_active());
        assert_eq!(session.status(), SessionStatus::Inactive);
    }

    #[tokio::test]
    async fn test_restore_degrades_on_storage_error() {
        let store = Arc::new(MemoryCredentialStore::with_session(CredentialPair::new("t1", "r1"), user()));
        store.set_fail_reads(true);
        let session = SessionManager::new(store, Arc::new(FakeEndpoint::new()));

        assert!(!session.restore().await);
        assert!(session.user().is_none());
    }

    #[tokio::test]
    async fn test_sign_in_persists_and_publishes() {
        let endpoint = Arc::new(FakeEndpoint::new());
        endpoint.set_sign_in(Ok(session_response()));
        let (session, store) = session_with(None, endpoint).await;
        let rx = session.subscribe();

        let signed_in = session.sign_in("ana@example.com", "123456").await.expect("sign in");

        assert_eq!(signed_in, user());
        assert_eq!(*rx.borrow(), SessionStatus::Active(user()));
        assert_eq!(session.access_token().as_deref(), Some("t1"));
        assert_eq!(store.tokens(), Some(CredentialPair::new("t1", "r1")));
        assert_eq!(store.user(), Some(user()));
    }

    #[tokio::test]
    async fn test_sign_in_failure_leaves_session_inactive() {
        let endpoint = Arc::new(FakeEndpoint::new());
        let (session, store) = session_with(None, endpoint).await;

        let err = session.sign_in("ana@example.com", "wrong").await.expect_err("rejected");
        assert!(matches!(err, ApiError::InvalidCredentials(_)));
        assert!(!session.is_active());
        assert!(store.user().is_none());
    }

    #[tokio::test]
    async fn test_sign_in_storage_failure_is_surfaced() {
        let endpoint = Arc::new(FakeEndpoint::new());
        endpoint.set_sign_in(Ok(session_response()));
        let (session, store) = session_with(None, endpoint).await;
        store.set_fail_writes(true);

        let err = session.sign_in("ana@example.com", "123456").await.expect_err("storage");
        assert!(matches!(err, ApiError::Storage(_)));
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn test_sign_out_is_idempotent() {
        let endpoint = Arc::new(FakeEndpoint::new());
        let (session, store) = session_with(Some(CredentialPair::new("t1", "r1")), endpoint).await;
        let rx = session.subscribe();

        session.sign_out().await.expect("first sign out");
        assert_eq!(*rx.borrow(), SessionStatus::Inactive);
        session.sign_out().await.expect("second sign out");

        assert!(!session.is_active());
        assert!(session.user().is_none());
        assert!(session.credentials().is_none());
        assert!(store.tokens().is_none());
        assert!(store.user().is_none());
    }

    #[tokio::test]
    async fn test_sign_out_clears_memory_even_if_storage_fails() {
        let endpoint = Arc::new(FakeEndpoint::new());
        let (session, store) = session_with(Some(CredentialPair::new("t1", "r1")), endpoint).await;
        store.set_fail_writes(true);

        assert!(session.sign_out().await.is_err());
        assert!(!session.is_active());
        assert!(session.user().is_none());
    }

    #[tokio::test]
    async fn test_update_profile_keeps_tokens() {
        let endpoint = Arc::new(FakeEndpoint::new());
        let (session, store) = session_with(Some(CredentialPair::new("t1", "r1")), endpoint).await;

        let mut updated = user();
        updated.name = "Ana Souza".into();
        session.update_profile(updated.clone()).await.expect("update");

        assert_eq!(session.user(), Some(updated.clone()));
        assert_eq!(store.user(), Some(updated.clone()));
        assert_eq!(session.access_token().as_deref(), Some("t1"));
        assert_eq!(session.status(), SessionStatus::Active(updated));
    }

    #[tokio::test]
    async fn test_update_profile_requires_session() {
        let endpoint = Arc::new(FakeEndpoint::new());
        let (session, _) = session_with(None, endpoint).await;
        let err = session.update_profile(user()).await.expect_err("no session");
        assert!(matches!(err, ApiError::NotSignedIn));
    }

    #[tokio::test]
    async fn test_refreshed_tokens_ignored_after_sign_out() {
        let endpoint = Arc::new(FakeEndpoint::new());
        let (session, store) = session_with(Some(CredentialPair::new("t1", "r1")), endpoint).await;
        let (_, epoch) = session.snapshot();

        session.sign_out().await.expect("sign out");
        let err = session
            .apply_refreshed(epoch, CredentialPair::new("t2", "r2"))
            .await
            .expect_err("stale epoch");

        assert!(matches!(err, ApiError::SessionEnded));
        assert!(!session.is_active());
        assert!(store.tokens().is_none());
    }
}
