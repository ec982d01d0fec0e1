//! Single-flight token refresh.
//!
//! When a request fails because its access token expired, the
//! `RefreshCoordinator` either starts the one refresh exchange for that
//! expiry, or parks the request on a ticket until the running exchange
//! settles. Each request comes back with the token to replay it with, or
//! with the error that ended the session.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::auth::SessionManager;

use super::{ApiError, ApiRequest, AuthFailure, SessionEndpoint};

/// A request cleared for replay with a fresh access token.
#[derive(Debug)]
pub struct Replay {
    pub request: ApiRequest,
    pub token: String,
}

/// A request suspended while a refresh is in flight. Consumed exactly once.
struct Ticket {
    request: ApiRequest,
    tx: oneshot::Sender<Result<Replay, ApiError>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Refreshing,
}

/// Guarded `{phase, queue}` pair. The queue is only non-empty while
/// `Refreshing`, and is drained in full on every return to `Idle`.
struct RefreshState {
    phase: Phase,
    queue: VecDeque<Ticket>,
}

/// Outcome of the Idle/Refreshing check for one failed request.
enum Admission {
    /// This request leads the refresh
    Lead {
        request: ApiRequest,
        refresh_token: String,
        epoch: u64,
    },
    /// A refresh is in flight; wait for its outcome
    Queued(oneshot::Receiver<Result<Replay, ApiError>>),
    /// A refresh already replaced the token this request was sent with
    Renewed(Replay),
    /// Nothing to refresh with
    NoRefreshToken,
}

pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
    session: Arc<SessionManager>,
    endpoint: Arc<dyn SessionEndpoint>,
}

impl RefreshCoordinator {
    pub fn new(session: Arc<SessionManager>, endpoint: Arc<dyn SessionEndpoint>) -> Self {
        Self {
            state: Mutex::new(RefreshState {
                phase: Phase::Idle,
                queue: VecDeque::new(),
            }),
            session,
            endpoint,
        }
    }

    /// Whether a refresh exchange is currently outstanding
    pub fn is_refreshing(&self) -> bool {
        self.state.lock().phase == Phase::Refreshing
    }

    /// Number of requests waiting on the outstanding refresh
    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Decide what happens to a request that failed with `error`.
    ///
    /// `sent_with` is the access token the failed attempt carried. Errors
    /// that are not an expired or invalid token come straight back. For
    /// those that are, the result is either a `Replay` carrying the new
    /// token, or the error that ended the session.
    pub async fn handle_failure(
        &self,
        request: ApiRequest,
        sent_with: Option<&str>,
        error: ApiError,
    ) -> Result<Replay, ApiError> {
        let failure = AuthFailure::classify(&error);
        if !failure.is_session_expired() {
            return Err(error);
        }

        let path = request.path().to_string();
        match self.admit(request, sent_with) {
            Admission::Lead {
                request,
                refresh_token,
                epoch,
            } => self.run_refresh(request, refresh_token, epoch).await,
            Admission::Queued(rx) => {
                debug!(path, "Waiting for in-flight token refresh");
                rx.await.unwrap_or(Err(ApiError::RefreshCancelled))
            }
            Admission::Renewed(replay) => {
                debug!(path, "Token already renewed, replaying");
                Ok(replay)
            }
            Admission::NoRefreshToken => {
                warn!(path, ?failure, "Session expired without a refresh token");
                if let Err(e) = self.session.sign_out().await {
                    warn!(error = %e, "Sign-out after expiry did not clear storage");
                }
                Err(error)
            }
        }
    }

    /// The single atomic check-and-transition. Runs entirely under the state
    /// lock, so two requests can never both observe `Idle` and both lead.
    fn admit(&self, request: ApiRequest, sent_with: Option<&str>) -> Admission {
        let mut state = self.state.lock();
        if state.phase == Phase::Refreshing {
            let (tx, rx) = oneshot::channel();
            state.queue.push_back(Ticket { request, tx });
            return Admission::Queued(rx);
        }

        let (credentials, epoch) = self.session.snapshot();
        let Some(credentials) = credentials else {
            return Admission::NoRefreshToken;
        };

        if let Some(sent) = sent_with {
            if credentials.has_access_token() && credentials.access_token != sent {
                return Admission::Renewed(Replay {
                    request,
                    token: credentials.access_token,
                });
            }
        }

        match credentials.refresh_token() {
            Some(refresh_token) => {
                state.phase = Phase::Refreshing;
                Admission::Lead {
                    request,
                    refresh_token: refresh_token.to_string(),
                    epoch,
                }
            }
            None => Admission::NoRefreshToken,
        }
    }

    async fn run_refresh(
        &self,
        request: ApiRequest,
        refresh_token: String,
        epoch: u64,
    ) -> Result<Replay, ApiError> {
        let mut cycle = RefreshCycle {
            coordinator: self,
            settled: false,
        };
        info!(path = request.path(), "Access token expired, refreshing session");

        let outcome = tokio::select! {
            result = self.endpoint.refresh_session(&refresh_token) => result,
            _ = self.session.ended(epoch) => Err(ApiError::SessionEnded),
        };

        let outcome = match outcome {
            Ok(response) => match response.into_credentials(Some(&refresh_token)) {
                Some(credentials) => {
                    let token = credentials.access_token.clone();
                    self.session.apply_refreshed(epoch, credentials).await.map(|()| token)
                }
                None => Err(ApiError::InvalidResponse(
                    "Refresh response has no access token".to_string(),
                )),
            },
            Err(e) => Err(e),
        };

        match outcome {
            Ok(token) => {
                let waiters = cycle.settle(Ok(token.clone()));
                info!(waiters, "Session refreshed");
                Ok(Replay { request, token })
            }
            Err(ApiError::SessionEnded) => {
                // Already signed out; a newer session must not be touched
                debug!("Session ended during token refresh");
                cycle.settle(Err(ApiError::SessionEnded));
                Err(ApiError::SessionEnded)
            }
            Err(e) => {
                warn!(error = %e, "Session refresh failed, signing out");
                if let Err(store_err) = self.session.sign_out().await {
                    warn!(error = %store_err, "Sign-out after failed refresh did not clear storage");
                }
                cycle.settle(Err(e.clone()));
                Err(e)
            }
        }
    }

    /// Back to `Idle` and hand the outcome to every queued ticket.
    fn drain(&self, outcome: Result<String, ApiError>) -> usize {
        let tickets = {
            let mut state = self.state.lock();
            state.phase = Phase::Idle;
            std::mem::take(&mut state.queue)
        };

        let count = tickets.len();
        for ticket in tickets {
            let result = match &outcome {
                Ok(token) => Ok(Replay {
                    request: ticket.request,
                    token: token.clone(),
                }),
                Err(e) => Err(e.clone()),
            };
            if ticket.tx.send(result).is_err() {
                debug!("Queued request was dropped before the refresh settled");
            }
        }
        count
    }
}

/// Settles the refresh cycle exactly once. If the leading request is
/// dropped mid-refresh, the waiters are rejected instead of left hanging.
struct RefreshCycle<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl RefreshCycle<'_> {
    fn settle(&mut self, outcome: Result<String, ApiError>) -> usize {
        self.settled = true;
        self.coordinator.drain(outcome)
    }
}

impl Drop for RefreshCycle<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let waiters = self.coordinator.drain(Err(ApiError::RefreshCancelled));
            warn!(waiters, "Token refresh abandoned");
        }
    }
}
