//! Client core for the gymtrack exercise tracking service.
//!
//! The heart of the crate is the authenticated request pipeline in [`api`]:
//! it attaches the session's access token to every call and, when the
//! server reports the token expired, renews it exactly once no matter how
//! many requests noticed, replaying each of them with the new token.
//! [`auth`] owns the session and its durable storage.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiClient, ApiError, ApiRequest, AuthFailure, SessionEndpoint};
pub use auth::{CredentialStore, SessionManager, SessionStatus};
pub use config::{Config, StoreKind};
pub use models::{CredentialPair, UserProfile};
