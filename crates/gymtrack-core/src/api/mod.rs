//! REST API client module for the exercise tracking service.
//!
//! This module provides the `ApiClient` request pipeline and the pieces it
//! is built from:
//!
//! - `ApiRequest`: a replayable request description
//! - `RefreshCoordinator`: single-flight renewal of expired access tokens
//! - `SessionEndpoint`: the sign-in and token refresh exchanges
//!
//! The API uses bearer token authentication. Access tokens are short-lived;
//! an expired one is renewed with the refresh token obtained at sign-in.

pub mod client;
pub mod endpoint;
pub mod error;
pub mod refresh;
pub mod request;

pub use client::ApiClient;
pub use endpoint::{HttpSessionEndpoint, SessionEndpoint};
pub use error::{ApiError, AuthFailure, GENERIC_ERROR_MESSAGE};
pub use refresh::{RefreshCoordinator, Replay};
pub use request::{path_segment, ApiRequest, FilePart, RequestBody};
