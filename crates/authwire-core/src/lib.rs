//! authwire: client-side auth session store and authenticated HTTP client.
//!
//! A `SessionStore` holds the login status plus the access/refresh token
//! pair, optionally persisted through a `StorageBackend`. An
//! `AuthenticatedClient` reads it to attach credentials and, when the server
//! rejects the access token, runs a single refresh for every request that
//! failed and replays them with the new token.
//!
//! ```no_run
//! # async fn run() -> Result<(), authwire::ClientError> {
//! use authwire::{ClientOptions, SessionStoreOptions};
//!
//! let refresh = |refresh_token: String| async move {
//!     // exchange the refresh token with the auth server
//!     Ok::<_, anyhow::Error>(format!("access-for-{}", refresh_token))
//! };
//! let (session, client) =
//!     authwire::initialize(ClientOptions::new(refresh), SessionStoreOptions::new()).await?;
//!
//! session.login("access", "refresh").await;
//! let response = client.get("https://api.example.com/me").await?;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod storage;
pub mod utils;

pub use api::{
    AuthenticatedClient, ClientError, ClientOptions, PipelineStages, RefreshHandler,
    RequestDescriptor, ResponseDescriptor, Transport, TransportConfig, TransportError,
};
pub use auth::{SessionObserver, SessionState, SessionStore, SessionStoreOptions, TokenPair, TokenSource};
pub use config::ClientConfig;
pub use storage::{Persistence, StorageBackend, StorageError};

/// Build a session store and a client bound to it.
pub async fn initialize(
    client_options: ClientOptions,
    store_options: SessionStoreOptions,
) -> Result<(SessionStore, AuthenticatedClient), ClientError> {
    let session = SessionStore::new(store_options).await;
    let client = AuthenticatedClient::new(client_options, session.clone())?;
    Ok((session, client))
}

/// Install a stderr `tracing` subscriber filtered by `RUST_LOG` (default `warn`).
///
/// Does nothing if a global subscriber is already set.
#[cfg(feature = "subscriber")]
pub fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
