//! User profile and credential types.

use serde::{Deserialize, Serialize};

/// The signed-in user's profile record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(deserialize_with = "super::string_or_number")]
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl UserProfile {
    /// A profile only identifies a session when its id is non-empty.
    pub fn is_valid(&self) -> bool {
        !self.id.trim().is_empty()
    }

    /// Avatar file name, if the user has uploaded one
    pub fn avatar_file(&self) -> Option<&str> {
        self.avatar.as_deref().filter(|a| !a.is_empty())
    }
}

/// Access and refresh token pair.
///
/// Stored records use the server's field names (`token`, `refresh_token`).
/// A record without a refresh token is still a usable session, it just
/// cannot be renewed once the access token expires.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    #[serde(rename = "token", alias = "access_token")]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: Some(refresh_token.into()),
        }
    }

    /// Refresh token, treating an empty string as absent
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn has_access_token(&self) -> bool {
        !self.access_token.is_empty()
    }
}

// Tokens never show up in logs.
impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token().is_some())
            .finish()
    }
}

/// Response of `POST /sessions`.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionResponse {
    pub user: UserProfile,
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl SessionResponse {
    pub fn credentials(&self) -> CredentialPair {
        CredentialPair {
            access_token: self.token.clone(),
            refresh_token: self.refresh_token.clone(),
        }
    }
}

/// Response of `POST /sessions/refresh-token`.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl RefreshResponse {
    /// Build the new pair. When the server does not rotate the refresh token,
    /// the previous one stays in use. `None` if the response carries no
    /// access token.
    pub fn into_credentials(self, previous_refresh: Option<&str>) -> Option<CredentialPair> {
        if self.token.is_empty() {
            return None;
        }
        let refresh_token = self
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous_refresh.map(str::to_string));
        Some(CredentialPair {
            access_token: self.token,
            refresh_token,
        })
    }
}
