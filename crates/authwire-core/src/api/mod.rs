//! HTTP side of authwire.
//!
//! `AuthenticatedClient` wraps a `Transport` (reqwest by default), attaches
//! the session's access token to outgoing requests and refreshes it at most
//! once per failure wave when the server rejects it.

pub mod client;
pub mod error;
pub mod refresh;
pub mod report;
pub mod transport;

pub use client::{AuthenticatedClient, ClientOptions, PipelineStages, DEFAULT_RETRYABLE_STATUS_CODES};
pub use error::{ClientError, TransportError};
pub use refresh::{RefreshHandler, RefreshOutcome};
pub use report::ErrorReport;
pub use transport::{
    ReqwestTransport, RequestDescriptor, ResponseDescriptor, Transport, TransportConfig,
    REQUEST_TIMEOUT_SECS,
};
