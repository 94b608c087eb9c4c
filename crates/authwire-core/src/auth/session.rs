use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use super::credentials::TokenPair;
use crate::storage::{Persistence, StorageBackend};

/// Key holding the access token in a session-scoped token source
pub const ACCESS_TOKEN_KEY: &str = "accesstoken";

/// Key holding the refresh token in a session-scoped token source
pub const REFRESH_TOKEN_KEY: &str = "refreshtoken";

/// Version written into persisted snapshots
const SNAPSHOT_VERSION: u32 = 0;

/// Current login status and credential pair.
///
/// `is_logged_in` implies both tokens were set together by a login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub is_logged_in: bool,
    #[serde(alias = "token")]
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl SessionState {
    pub fn logged_in(tokens: TokenPair) -> Self {
        Self {
            is_logged_in: true,
            access_token: Some(tokens.access),
            refresh_token: Some(tokens.refresh),
        }
    }

    /// The pair, when both tokens are present
    pub fn tokens(&self) -> Option<TokenPair> {
        match (&self.access_token, &self.refresh_token) {
            (Some(access), Some(refresh)) => Some(TokenPair::new(access.clone(), refresh.clone())),
            _ => None,
        }
    }

    fn is_consistent(&self) -> bool {
        !self.is_logged_in || self.tokens().is_some()
    }
}

/// Serialized projection of `SessionState` written through the storage backend.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedSnapshot {
    state: SessionState,
    #[serde(default)]
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    saved_at: Option<DateTime<Utc>>,
}

impl PersistedSnapshot {
    fn new(state: SessionState) -> Self {
        Self {
            state,
            version: SNAPSHOT_VERSION,
            saved_at: Some(Utc::now()),
        }
    }
}

/// Receives session notifications. Both hooks default to no-ops.
///
/// Hooks run synchronously right after the state change is committed, so
/// they should return quickly. Invocation order across observers is
/// unspecified.
pub trait SessionObserver: Send + Sync {
    /// Called after `login`, and after `set_access_token` when a refresh token is held
    fn on_tokens_change(&self, _tokens: &TokenPair) {}

    /// Called after every `logout`
    fn on_logout(&self) {}
}

type TokensChangeFn = Box<dyn Fn(&TokenPair) + Send + Sync>;
type LogoutFn = Box<dyn Fn() + Send + Sync>;

/// Observer assembled from closures
#[derive(Default)]
pub struct FnObserver {
    tokens_change: Option<TokensChangeFn>,
    logout: Option<LogoutFn>,
}

impl FnObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_tokens_change(mut self, f: impl Fn(&TokenPair) + Send + Sync + 'static) -> Self {
        self.tokens_change = Some(Box::new(f));
        self
    }

    pub fn on_logout(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.logout = Some(Box::new(f));
        self
    }
}

impl SessionObserver for FnObserver {
    fn on_tokens_change(&self, tokens: &TokenPair) {
        if let Some(ref f) = self.tokens_change {
            f(tokens);
        }
    }

    fn on_logout(&self) {
        if let Some(ref f) = self.logout {
            f();
        }
    }
}

/// Where a short-lived, session-scoped token pair may be restored from at construction.
#[derive(Clone, Default)]
pub enum TokenSource {
    #[default]
    None,
    /// Read `accesstoken` / `refreshtoken` from this backend. Never written to.
    SessionScoped(Arc<dyn StorageBackend>),
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenSource::None => f.write_str("None"),
            TokenSource::SessionScoped(_) => f.write_str("SessionScoped(..)"),
        }
    }
}

#[derive(Clone, Default)]
pub struct SessionStoreOptions {
    pub persistence: Option<Persistence>,
    pub observers: Vec<Arc<dyn SessionObserver>>,
    pub default_credentials: Option<TokenPair>,
    pub token_source: TokenSource,
}

impl SessionStoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_persistence(mut self, persistence: Persistence) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn with_observer(mut self, observer: impl SessionObserver + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    pub fn with_default_credentials(mut self, tokens: TokenPair) -> Self {
        self.default_credentials = Some(tokens);
        self
    }

    pub fn with_token_source(mut self, source: TokenSource) -> Self {
        self.token_source = source;
        self
    }
}

/// Owner of the session state.
/// Clone is cheap - clones share the same state, observers and persistence.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    /// The watch channel holds the state itself; `send_modify` is the only writer.
    state: watch::Sender<SessionState>,
    observers: RwLock<Vec<Arc<dyn SessionObserver>>>,
    persistence: Option<Persistence>,
    /// Serializes snapshot writes so the last write carries the latest state
    persist_lock: Mutex<()>,
}

impl SessionStore {
    /// Create a store, restoring state from persistence, the token source or
    /// the default credentials, in that order of preference.
    pub async fn new(options: SessionStoreOptions) -> Self {
        let mut initial = Self::initial_state(&options).await;

        if let Some(ref persistence) = options.persistence {
            if let Some(restored) = Self::load_snapshot(persistence).await {
                initial = restored;
            }
        }

        debug!(logged_in = initial.is_logged_in, "Session store initialized");

        let (state, _) = watch::channel(initial);
        Self {
            inner: Arc::new(StoreInner {
                state,
                observers: RwLock::new(options.observers),
                persistence: options.persistence,
                persist_lock: Mutex::new(()),
            }),
        }
    }

    async fn initial_state(options: &SessionStoreOptions) -> SessionState {
        if let TokenSource::SessionScoped(ref source) = options.token_source {
            if let Some(tokens) = Self::read_scoped_tokens(source.as_ref()).await {
                debug!("Restored session from session-scoped token source");
                return SessionState::logged_in(tokens);
            }
        }

        match options.default_credentials {
            Some(ref tokens) => SessionState::logged_in(tokens.clone()),
            None => SessionState::default(),
        }
    }

    async fn read_scoped_tokens(source: &dyn StorageBackend) -> Option<TokenPair> {
        let access = match source.get_item(ACCESS_TOKEN_KEY).await {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Failed to read access token from token source");
                None
            }
        };
        let refresh = match source.get_item(REFRESH_TOKEN_KEY).await {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Failed to read refresh token from token source");
                None
            }
        };

        match (access, refresh) {
            (Some(access), Some(refresh)) if !access.is_empty() && !refresh.is_empty() => {
                Some(TokenPair::new(access, refresh))
            }
            _ => None,
        }
    }

    async fn load_snapshot(persistence: &Persistence) -> Option<SessionState> {
        let contents = match persistence.backend.get_item(&persistence.name).await {
            Ok(Some(contents)) => contents,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, name = %persistence.name, "Failed to read persisted session");
                return None;
            }
        };

        let snapshot: PersistedSnapshot = match serde_json::from_str(&contents) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, name = %persistence.name, "Failed to parse persisted session");
                return None;
            }
        };

        if !snapshot.state.is_consistent() {
            warn!(name = %persistence.name, "Ignoring persisted session missing tokens");
            return None;
        }

        debug!(
            name = %persistence.name,
            version = snapshot.version,
            saved_at = ?snapshot.saved_at,
            "Restored persisted session"
        );
        Some(snapshot.state)
    }

    // ===== State Access =====

    /// Snapshot of the latest committed state
    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.inner.state.borrow().is_logged_in
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.state.borrow().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.inner.state.borrow().refresh_token.clone()
    }

    /// Receiver that observes every state change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn add_observer(&self, observer: Arc<dyn SessionObserver>) {
        self.inner
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    // ===== Mutations =====

    /// Mark the session logged in with a fresh token pair
    pub async fn login(&self, access_token: impl Into<String>, refresh_token: impl Into<String>) {
        let tokens = TokenPair::new(access_token, refresh_token);
        self.inner.state.send_modify(|state| {
            state.is_logged_in = true;
            state.access_token = Some(tokens.access.clone());
            state.refresh_token = Some(tokens.refresh.clone());
        });
        info!("Session logged in");

        self.notify(|observer| observer.on_tokens_change(&tokens));
        self.persist().await;
    }

    /// Clear login status and both tokens. Observers are notified on every call.
    pub async fn logout(&self) {
        self.inner.state.send_modify(|state| {
            *state = SessionState::default();
        });
        info!("Session logged out");

        self.notify(|observer| observer.on_logout());
        self.persist().await;
    }

    /// Replace only the access token.
    ///
    /// Observers hear about it only when a refresh token is held, so they
    /// never receive an incomplete pair.
    pub async fn set_access_token(&self, access_token: impl Into<String>) {
        let access_token = access_token.into();
        let mut refresh_token = None;
        self.inner.state.send_modify(|state| {
            state.access_token = Some(access_token.clone());
            refresh_token = state.refresh_token.clone();
        });
        debug!("Access token replaced");

        if let Some(refresh) = refresh_token {
            let tokens = TokenPair::new(access_token, refresh);
            self.notify(|observer| observer.on_tokens_change(&tokens));
        }
        self.persist().await;
    }

    fn notify(&self, f: impl Fn(&dyn SessionObserver)) {
        let observers = self
            .inner
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in &observers {
            f(observer.as_ref());
        }
    }

    /// Best-effort write of the current state; failures are logged, never returned.
    async fn persist(&self) {
        let Some(ref persistence) = self.inner.persistence else {
            return;
        };

        let _guard = self.inner.persist_lock.lock().await;
        let snapshot = PersistedSnapshot::new(self.state());
        let contents = match serde_json::to_string(&snapshot) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(error = %e, "Failed to serialize session state");
                return;
            }
        };

        if let Err(e) = persistence.backend.set_item(&persistence.name, &contents).await {
            warn!(error = %e, name = %persistence.name, "Failed to persist session state");
        }
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("SessionStore")
            .field("is_logged_in", &state.is_logged_in)
            .field("persistence", &self.inner.persistence)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use super::*;
    use crate::storage::{MemoryStorage, StorageError, StorageResult};

    #[derive(Default)]
    struct Recorder {
        tokens: StdMutex<Vec<TokenPair>>,
        logouts: AtomicUsize,
    }

    impl SessionObserver for Recorder {
        fn on_tokens_change(&self, tokens: &TokenPair) {
            self.tokens.lock().unwrap().push(tokens.clone());
        }

        fn on_logout(&self) {
            self.logouts.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn store_with_recorder() -> (SessionStore, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let store = SessionStore::new(SessionStoreOptions::new()).await;
        store.add_observer(recorder.clone());
        (store, recorder)
    }

    struct FailingStorage;

    #[async_trait]
    impl StorageBackend for FailingStorage {
        async fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
            Err(StorageError::ReadOnly(key.to_string()))
        }

        async fn set_item(&self, key: &str, _value: &str) -> StorageResult<()> {
            Err(StorageError::ReadOnly(key.to_string()))
        }

        async fn remove_item(&self, key: &str) -> StorageResult<()> {
            Err(StorageError::ReadOnly(key.to_string()))
        }
    }

    #[tokio::test]
    async fn test_starts_logged_out() {
        let store = SessionStore::new(SessionStoreOptions::new()).await;
        assert_eq!(store.state(), SessionState::default());
        assert!(!store.is_logged_in());
    }

    #[tokio::test]
    async fn test_login_then_state() {
        let (store, recorder) = store_with_recorder().await;
        store.login("a", "r").await;

        assert_eq!(
            store.state(),
            SessionState {
                is_logged_in: true,
                access_token: Some("a".to_string()),
                refresh_token: Some("r".to_string()),
            }
        );
        assert_eq!(*recorder.tokens.lock().unwrap(), vec![TokenPair::new("a", "r")]);
    }

    #[tokio::test]
    async fn test_set_access_token_without_refresh_token_does_not_notify() {
        let (store, recorder) = store_with_recorder().await;
        store.set_access_token("x").await;

        assert_eq!(store.access_token().as_deref(), Some("x"));
        assert!(!store.is_logged_in());
        assert!(recorder.tokens.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_access_token_with_refresh_token_notifies_once() {
        let (store, recorder) = store_with_recorder().await;
        store.login("a", "r").await;
        recorder.tokens.lock().unwrap().clear();

        store.set_access_token("x").await;

        assert_eq!(*recorder.tokens.lock().unwrap(), vec![TokenPair::new("x", "r")]);
        let state = store.state();
        assert!(state.is_logged_in);
        assert_eq!(state.refresh_token.as_deref(), Some("r"));
    }

    #[tokio::test]
    async fn test_logout_is_idempotent_and_notifies_each_call() {
        let (store, recorder) = store_with_recorder().await;
        store.login("a", "r").await;

        store.logout().await;
        let after_once = store.state();
        store.logout().await;

        assert_eq!(store.state(), after_once);
        assert_eq!(after_once, SessionState::default());
        assert_eq!(recorder.logouts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fn_observer_hooks() {
        let changes = Arc::new(AtomicUsize::new(0));
        let logouts = Arc::new(AtomicUsize::new(0));
        let observer = {
            let changes = changes.clone();
            let logouts = logouts.clone();
            FnObserver::new()
                .on_tokens_change(move |_| {
                    changes.fetch_add(1, Ordering::SeqCst);
                })
                .on_logout(move || {
                    logouts.fetch_add(1, Ordering::SeqCst);
                })
        };
        let store = SessionStore::new(SessionStoreOptions::new().with_observer(observer)).await;

        store.login("a", "r").await;
        store.set_access_token("b").await;
        store.logout().await;

        assert_eq!(changes.load(Ordering::SeqCst), 2);
        assert_eq!(logouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscribe_sees_changes() {
        let store = SessionStore::new(SessionStoreOptions::new()).await;
        let mut rx = store.subscribe();

        store.login("a", "r").await;
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_logged_in);

        store.logout().await;
        rx.changed().await.unwrap();
        assert!(!rx.borrow_and_update().is_logged_in);
    }

    #[tokio::test]
    async fn test_default_credentials() {
        let options =
            SessionStoreOptions::new().with_default_credentials(TokenPair::new("def", "defr"));
        let store = SessionStore::new(options).await;

        assert!(store.is_logged_in());
        assert_eq!(store.access_token().as_deref(), Some("def"));
        assert_eq!(store.refresh_token().as_deref(), Some("defr"));
    }

    #[tokio::test]
    async fn test_session_scoped_source_beats_default_credentials() {
        let source = MemoryStorage::with_items([
            (ACCESS_TOKEN_KEY, "scoped"),
            (REFRESH_TOKEN_KEY, "scopedr"),
        ]);
        let options = SessionStoreOptions::new()
            .with_default_credentials(TokenPair::new("def", "defr"))
            .with_token_source(TokenSource::SessionScoped(Arc::new(source.clone())));
        let store = SessionStore::new(options).await;

        assert_eq!(store.access_token().as_deref(), Some("scoped"));
        assert_eq!(store.refresh_token().as_deref(), Some("scopedr"));

        // The token source is never written to
        store.login("a", "r").await;
        assert_eq!(source.get(ACCESS_TOKEN_KEY).as_deref(), Some("scoped"));
    }

    #[tokio::test]
    async fn test_incomplete_session_scoped_source_is_ignored() {
        let source = MemoryStorage::with_items([(ACCESS_TOKEN_KEY, "scoped")]);
        let options = SessionStoreOptions::new()
            .with_default_credentials(TokenPair::new("def", "defr"))
            .with_token_source(TokenSource::SessionScoped(Arc::new(source)));
        let store = SessionStore::new(options).await;

        assert_eq!(store.access_token().as_deref(), Some("def"));
    }

    #[tokio::test]
    async fn test_persistence_restores_login() {
        let backing = MemoryStorage::new();
        let options = SessionStoreOptions::new()
            .with_persistence(Persistence::new("session", backing.clone()));
        let store = SessionStore::new(options.clone()).await;
        store.login("tok1", "ref1").await;

        let restored = SessionStore::new(options).await;
        assert_eq!(restored.access_token().as_deref(), Some("tok1"));
        assert_eq!(restored.refresh_token().as_deref(), Some("ref1"));
        assert!(restored.is_logged_in());
    }

    #[tokio::test]
    async fn test_persistence_writes_logout() {
        let backing = MemoryStorage::new();
        let persistence = Persistence::new("session", backing.clone());
        let store =
            SessionStore::new(SessionStoreOptions::new().with_persistence(persistence.clone()))
                .await;
        store.login("tok1", "ref1").await;
        store.logout().await;

        let restored =
            SessionStore::new(SessionStoreOptions::new().with_persistence(persistence)).await;
        assert_eq!(restored.state(), SessionState::default());
    }

    #[tokio::test]
    async fn test_persisted_snapshot_beats_default_credentials() {
        let backing = MemoryStorage::with_items([(
            "session",
            r#"{"state":{"isLoggedIn":true,"token":"old","refreshToken":"oldr"},"version":0}"#,
        )]);
        let options = SessionStoreOptions::new()
            .with_persistence(Persistence::new("session", backing))
            .with_default_credentials(TokenPair::new("def", "defr"));
        let store = SessionStore::new(options).await;

        assert_eq!(store.access_token().as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_falls_back_to_policy() {
        let backing = MemoryStorage::with_items([("session", "not json")]);
        let options = SessionStoreOptions::new()
            .with_persistence(Persistence::new("session", backing))
            .with_default_credentials(TokenPair::new("def", "defr"));
        let store = SessionStore::new(options).await;

        assert_eq!(store.access_token().as_deref(), Some("def"));
    }

    #[tokio::test]
    async fn test_persistence_failures_are_not_fatal() {
        let options =
            SessionStoreOptions::new().with_persistence(Persistence::new("session", FailingStorage));
        let store = SessionStore::new(options).await;

        store.login("a", "r").await;
        assert!(store.is_logged_in());
        store.logout().await;
        assert!(!store.is_logged_in());
    }
}
