//! Authentication module for managing the client session and credentials.
//!
//! This module provides:
//! - `SessionStore`: login status plus access/refresh tokens, with optional persistence
//! - `SessionObserver`: notification hooks for credential changes and logout
//! - `CredentialAttacher`: how the access token is attached to outgoing requests
//!
//! Session state is mutated only through `login`, `logout` and `set_access_token`.

pub mod credentials;
pub mod session;

pub use credentials::{BearerAttacher, CredentialAttacher, CredentialHeader, HeaderAttacher, TokenPair};
pub use session::{
    FnObserver, SessionObserver, SessionState, SessionStore, SessionStoreOptions, TokenSource,
    ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY,
};
