//! Authentication module for managing the user session and its credentials.
//!
//! This module provides:
//! - `SessionManager`: in-memory session state, sign-in/out, restore on startup
//! - `CredentialStore`: durable storage for the token pair and user profile,
//!   with file, OS keychain and in-memory backends
//!
//! Token renewal lives in `api::refresh`; it reaches the session only through
//! the `SessionManager`.

pub mod credentials;
pub mod session;

pub use credentials::{
    CredentialStore, FileCredentialStore, KeyringCredentialStore, MemoryCredentialStore,
    StoreError,
};
pub use session::{SessionManager, SessionStatus};
