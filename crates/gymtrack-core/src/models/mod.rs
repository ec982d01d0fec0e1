//! Data models for the exercise tracking service.
//!
//! This module contains the data structures exchanged with the API and
//! persisted by the credential stores:
//!
//! - `UserProfile`, `CredentialPair`: the signed-in user and their tokens
//! - `SessionResponse`, `RefreshResponse`: session endpoint payloads
//! - `Exercise`: exercise catalog entries
//! - `HistoryEntry`, `HistoryByDay`: the user's workout log

pub mod exercise;
pub mod history;
pub mod user;

pub use exercise::Exercise;
pub use history::{HistoryByDay, HistoryEntry};
pub use user::{CredentialPair, RefreshResponse, SessionResponse, UserProfile};

use serde::{Deserialize, Deserializer};

/// Accept ids that the API sends either as JSON numbers or strings.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Str(String),
        Int(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Str(s) => s,
        Id::Int(n) => n.to_string(),
    })
}
