use std::sync::Arc;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::auth::StoreError;

/// Message shown when a failure carries no usable body
pub const GENERIC_ERROR_MESSAGE: &str = "Server error. Please try again later.";

/// Reason code the server sends when the access token has expired
pub const TOKEN_EXPIRED: &str = "token.expired";

/// Reason code the server sends when the access token is not valid
pub const TOKEN_INVALID: &str = "token.invalid";

/// Maximum length for error response bodies in log output
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Errors produced by the API client and the session layer.
///
/// Cloneable so a single refresh failure can be handed to every request
/// that was waiting on it.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Transport(#[source] Arc<reqwest::Error>),

    #[error("{message}")]
    Application {
        status: StatusCode,
        code: Option<String>,
        message: String,
    },

    #[error("{0}")]
    InvalidCredentials(String),

    #[error("Session could not be renewed: {0}")]
    InvalidRefreshToken(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not signed in")]
    NotSignedIn,

    #[error("Session ended while the request was waiting for a token refresh")]
    SessionEnded,

    #[error("Token refresh was abandoned before it completed")]
    RefreshCancelled,

    #[error("Credential storage error: {0}")]
    Storage(#[from] StoreError),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::InvalidResponse(err.to_string())
        } else {
            ApiError::Transport(Arc::new(err))
        }
    }
}

/// Structured failure body, e.g. `{"status": "error", "message": "token.expired"}`
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    pub(crate) fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Build an application error from a non-success response.
    ///
    /// The reason code is the body's `code` field when present, otherwise its
    /// `message` (the server reports token problems as the message itself).
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        match serde_json::from_str::<ErrorBody>(body) {
            Ok(ErrorBody { code, message: Some(message) }) if !message.is_empty() => {
                let code = code.or_else(|| Some(message.clone()));
                ApiError::Application { status, code, message }
            }
            Ok(ErrorBody { code, .. }) => ApiError::Application {
                status,
                code,
                message: GENERIC_ERROR_MESSAGE.to_string(),
            },
            Err(_) => ApiError::Application {
                status,
                code: None,
                message: GENERIC_ERROR_MESSAGE.to_string(),
            },
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Application { status, .. } => Some(*status),
            ApiError::Transport(err) => err.status(),
            _ => None,
        }
    }

    pub fn reason_code(&self) -> Option<&str> {
        match self {
            ApiError::Application { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Transport(_))
    }

    /// True for errors whose message came from the server and is meant to be
    /// shown to the user as-is.
    pub fn is_app_error(&self) -> bool {
        matches!(
            self,
            ApiError::Application { .. }
                | ApiError::InvalidCredentials(_)
                | ApiError::InvalidRefreshToken(_)
        )
    }

    /// Message for display, falling back to `fallback` for errors that carry
    /// no server-provided text.
    pub fn user_message(&self, fallback: &str) -> String {
        if self.is_app_error() {
            self.to_string()
        } else {
            fallback.to_string()
        }
    }
}

/// Closed classification of a failed response, evaluated once where the
/// failure is received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// Any failure other than 401
    NotAuthorization,
    /// 401 for some other reason, e.g. wrong credentials
    Unauthorized,
    TokenExpired,
    TokenInvalid,
}

impl AuthFailure {
    pub fn classify(error: &ApiError) -> Self {
        match error {
            ApiError::Application { status, code, .. } if *status == StatusCode::UNAUTHORIZED => {
                match code.as_deref() {
                    Some(TOKEN_EXPIRED) => AuthFailure::TokenExpired,
                    Some(TOKEN_INVALID) => AuthFailure::TokenInvalid,
                    _ => AuthFailure::Unauthorized,
                }
            }
            _ => AuthFailure::NotAuthorization,
        }
    }

    /// Whether a token refresh can recover from this failure
    pub fn is_session_expired(self) -> bool {
        matches!(self, AuthFailure::TokenExpired | AuthFailure::TokenInvalid)
    }
}
