//! Authenticated HTTP client with single-flight token refresh.
//!
//! `AuthenticatedClient` passes every request through these stages, in order:
//! 1. default headers, below any header set on the request itself
//! 2. stall while a token refresh is in flight
//! 3. attach the access token when the session is logged in
//! 4. log dispatch and success (method + URL)
//!
//! Failed responses go through the error stage: a retryable status (401 and
//! 498 by default) joins or starts a refresh and replays the request with the
//! new token; anything else is logged and returned to the caller.

use std::collections::HashSet;
use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, info, warn};

use super::error::{ClientError, TransportError};
use super::refresh::{Begin, RefreshCoordinator, RefreshHandler, RefreshOutcome, RefreshTicket};
use super::report;
use super::transport::{
    ReqwestTransport, RequestDescriptor, ResponseDescriptor, Transport, TransportConfig,
};
use crate::auth::{BearerAttacher, CredentialAttacher, SessionStore};

// ============================================================================
// Constants
// ============================================================================

/// Statuses that trigger refresh-and-retry unless configured otherwise.
/// 498 is the "invalid token" status some gateways use instead of 401.
pub const DEFAULT_RETRYABLE_STATUS_CODES: [u16; 2] = [401, 498];

/// Switches for the individual pipeline stages. All enabled by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStages {
    pub default_headers: bool,
    pub stall_on_refresh: bool,
    pub attach_credential: bool,
    pub logging: bool,
    pub refresh_on_error: bool,
}

impl Default for PipelineStages {
    fn default() -> Self {
        Self {
            default_headers: true,
            stall_on_refresh: true,
            attach_credential: true,
            logging: true,
            refresh_on_error: true,
        }
    }
}

/// Construction-time settings; fixed once the client is built.
#[derive(Clone)]
pub struct ClientOptions {
    pub transport_config: TransportConfig,
    /// Replaces the reqwest transport built from `transport_config`
    pub transport: Option<Arc<dyn Transport>>,
    pub refresh: Arc<dyn RefreshHandler>,
    pub retryable_status_codes: HashSet<u16>,
    pub default_headers: HeaderMap,
    pub attach_credential: Arc<dyn CredentialAttacher>,
    pub stages: PipelineStages,
}

impl ClientOptions {
    pub fn new(refresh: impl RefreshHandler + 'static) -> Self {
        Self {
            transport_config: TransportConfig::default(),
            transport: None,
            refresh: Arc::new(refresh),
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.into_iter().collect(),
            default_headers: HeaderMap::new(),
            attach_credential: Arc::new(BearerAttacher),
            stages: PipelineStages::default(),
        }
    }

    pub fn with_transport_config(mut self, config: TransportConfig) -> Self {
        self.transport_config = config;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    pub fn with_default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn with_default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers.extend(headers);
        self
    }

    pub fn with_credential_attacher(mut self, attacher: impl CredentialAttacher + 'static) -> Self {
        self.attach_credential = Arc::new(attacher);
        self
    }

    pub fn with_stages(mut self, stages: PipelineStages) -> Self {
        self.stages = stages;
        self
    }
}

/// HTTP client that authenticates requests from a `SessionStore`.
/// Clone is cheap - clones share the transport, session and refresh coordination.
#[derive(Clone)]
pub struct AuthenticatedClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    session: SessionStore,
    refresh: Arc<dyn RefreshHandler>,
    retryable_status_codes: HashSet<u16>,
    default_headers: HeaderMap,
    transport_headers: HeaderMap,
    attacher: Arc<dyn CredentialAttacher>,
    stages: PipelineStages,
    coordinator: RefreshCoordinator,
}

/// A request after the pre-dispatch stages
struct Prepared {
    request: RequestDescriptor,
    /// Access token attached to the request, if any
    access_token: Option<String>,
}

impl AuthenticatedClient {
    /// Create a client over `session`. Builds a reqwest transport unless
    /// `options.transport` supplies one.
    pub fn new(options: ClientOptions, session: SessionStore) -> Result<Self, ClientError> {
        let transport: Arc<dyn Transport> = match options.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&options.transport_config)?),
        };

        debug!(
            retryable = ?options.retryable_status_codes,
            base_url = ?options.transport_config.base_url,
            "Authenticated client created"
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                transport,
                session,
                refresh: options.refresh,
                retryable_status_codes: options.retryable_status_codes,
                default_headers: options.default_headers,
                transport_headers: options.transport_config.headers,
                attacher: options.attach_credential,
                stages: options.stages,
                coordinator: RefreshCoordinator::new(),
            }),
        })
    }

    pub fn session(&self) -> &SessionStore {
        &self.inner.session
    }

    /// True while a token refresh is in flight
    pub fn is_refreshing(&self) -> bool {
        self.inner.coordinator.is_in_flight()
    }

    // ===== Request Methods =====

    pub async fn get(&self, url: &str) -> Result<ResponseDescriptor, ClientError> {
        self.send(RequestDescriptor::get(url)).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ClientError> {
        let response = self.get(url).await?;
        response.json().map_err(|e| {
            ClientError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", url, e))
        })
    }

    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<ResponseDescriptor, ClientError> {
        self.send(RequestDescriptor::json(Method::POST, url, body)?).await
    }

    pub async fn put_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<ResponseDescriptor, ClientError> {
        self.send(RequestDescriptor::json(Method::PUT, url, body)?).await
    }

    pub async fn delete(&self, url: &str) -> Result<ResponseDescriptor, ClientError> {
        self.send(RequestDescriptor::delete(url)).await
    }

    /// Send a request through the pipeline.
    ///
    /// A request is replayed at most once after a refresh; a second
    /// retryable failure is returned to the caller.
    pub async fn send(&self, request: RequestDescriptor) -> Result<ResponseDescriptor, ClientError> {
        let mut replayed = false;

        loop {
            let prepared = self.prepare(request.clone()).await?;
            if self.inner.stages.logging {
                report::log_dispatch(&prepared.request);
            }

            let error = match self.inner.transport.send(prepared.request).await {
                Ok(response) => {
                    if self.inner.stages.logging {
                        report::log_success(&request, &response);
                    }
                    return Ok(response);
                }
                Err(error) => error,
            };

            self.recover(error, prepared.access_token, replayed).await?;
            replayed = true;
        }
    }

    // ===== Pre-dispatch Stages =====

    async fn prepare(&self, mut request: RequestDescriptor) -> Result<Prepared, ClientError> {
        let stages = self.inner.stages;

        if stages.default_headers {
            merge_missing(&mut request.headers, &self.inner.default_headers);
        }
        merge_missing(&mut request.headers, &self.inner.transport_headers);

        if stages.stall_on_refresh {
            while let Some(pending) = self.inner.coordinator.current() {
                debug!(url = %request.url, "Token refresh in flight, stalling request");
                match pending.wait().await {
                    RefreshOutcome::Refreshed => break,
                    RefreshOutcome::Terminated => return Err(ClientError::SessionTerminated),
                    // Another request may have started a new refresh meanwhile
                    RefreshOutcome::Abandoned => continue,
                }
            }
        }

        let mut access_token = None;
        if stages.attach_credential {
            let session = self.inner.session.state();
            if let (true, Some(token)) = (session.is_logged_in, session.access_token) {
                let (name, value) = self.credential_header(&token)?;
                request.headers.insert(name, value);
                access_token = Some(token);
            }
        }

        Ok(Prepared {
            request,
            access_token,
        })
    }

    fn credential_header(&self, access_token: &str) -> Result<(HeaderName, HeaderValue), ClientError> {
        let header = self.inner.attacher.credential_header(access_token);
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|_| ClientError::InvalidHeader(format!("invalid name {:?}", header.name)))?;
        let mut value = HeaderValue::from_str(&header.value)
            .map_err(|_| ClientError::InvalidHeader(format!("invalid value for {}", header.name)))?;
        value.set_sensitive(true);
        Ok((name, value))
    }

    // ===== Error Stage =====

    /// Decide what happens to a failed request. `Ok(())` means replay it.
    async fn recover(
        &self,
        error: TransportError,
        sent_with: Option<String>,
        replayed: bool,
    ) -> Result<(), ClientError> {
        if !self.is_retryable(&error) {
            self.log_failure(&error);
            return Err(ClientError::Transport(error));
        }

        if replayed {
            warn!(url = %error.request.url, "Request rejected again after token refresh");
            self.log_failure(&error);
            return Err(ClientError::Transport(error));
        }

        if self.inner.session.refresh_token().is_none() {
            warn!(url = %error.request.url, "Couldn't refresh, no refresh token");
            self.log_failure(&error);
            return Err(ClientError::RefreshUnavailable(error));
        }

        loop {
            match self.inner.coordinator.begin() {
                Begin::Waiter(pending) => {
                    debug!(url = %error.request.url, "Waiting for token refresh in flight");
                    match pending.wait().await {
                        RefreshOutcome::Refreshed => return Ok(()),
                        RefreshOutcome::Terminated => return Err(ClientError::Transport(error)),
                        RefreshOutcome::Abandoned => {
                            debug!(url = %error.request.url, "Token refresh abandoned, rejoining");
                        }
                    }
                }
                Begin::Initiator(ticket) => {
                    // A refresh already finished after this request was sent
                    let current = self.inner.session.access_token();
                    let replaced = self.inner.stages.attach_credential
                        && current.is_some()
                        && current != sent_with;
                    if replaced {
                        debug!(url = %error.request.url, "Access token replaced since dispatch, retrying");
                        ticket.resolve();
                        return Ok(());
                    }
                    return self.refresh_session(ticket).await;
                }
            }
        }
    }

    /// Run the refresh as initiator and publish its outcome.
    async fn refresh_session(&self, ticket: RefreshTicket<'_>) -> Result<(), ClientError> {
        let Some(refresh_token) = self.inner.session.refresh_token() else {
            warn!("No refresh token, failing refresh");
            return Err(self.end_session(ticket, "no refresh token available".to_string()).await);
        };

        info!("Access token rejected, refreshing");
        match self.inner.refresh.refresh(&refresh_token).await {
            Ok(access_token) => {
                self.inner.session.set_access_token(access_token).await;
                ticket.resolve();
                info!("Token refresh succeeded");
                Ok(())
            }
            Err(e) => {
                if let Some(transport_error) = e.downcast_ref::<TransportError>() {
                    report::log_failure(transport_error);
                }
                error!(error = %format!("{:#}", e), "Token refresh failed");
                Err(self.end_session(ticket, format!("{:#}", e)).await)
            }
        }
    }

    /// Log out, then release every waiter with a terminal outcome.
    async fn end_session(&self, ticket: RefreshTicket<'_>, reason: String) -> ClientError {
        self.inner.session.logout().await;
        ticket.reject();
        ClientError::RefreshFailed { reason }
    }

    fn is_retryable(&self, error: &TransportError) -> bool {
        self.inner.stages.refresh_on_error
            && error
                .status()
                .is_some_and(|status| self.inner.retryable_status_codes.contains(&status.as_u16()))
    }

    fn log_failure(&self, error: &TransportError) {
        if self.inner.stages.logging {
            report::log_failure(error);
        }
    }
}

impl std::fmt::Debug for AuthenticatedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedClient")
            .field("session", &self.inner.session)
            .field("retryable_status_codes", &self.inner.retryable_status_codes)
            .field("stages", &self.inner.stages)
            .field("refreshing", &self.is_refreshing())
            .finish_non_exhaustive()
    }
}

/// Copy headers from `defaults` whose names `headers` does not already have
fn merge_missing(headers: &mut HeaderMap, defaults: &HeaderMap) {
    for name in defaults.keys() {
        if headers.contains_key(name) {
            continue;
        }
        for value in defaults.get_all(name) {
            headers.append(name.clone(), value.clone());
        }
    }
}
