use reqwest::StatusCode;
use thiserror::Error;

use super::transport::{RequestDescriptor, ResponseDescriptor};

/// Failure reported by a transport: the request that was attempted and,
/// when the server answered, its response.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct TransportError {
    pub request: RequestDescriptor,
    pub response: Option<ResponseDescriptor>,
    message: String,
    #[source]
    source: Option<reqwest::Error>,
}

impl TransportError {
    /// The server answered with an error status
    pub fn from_response(request: RequestDescriptor, response: ResponseDescriptor) -> Self {
        let message = format!(
            "{} {} failed with status {}",
            request.method, request.url, response.status
        );
        Self {
            request,
            response: Some(response),
            message,
            source: None,
        }
    }

    /// The request never produced a response
    pub fn network(request: RequestDescriptor, source: reqwest::Error) -> Self {
        let message = format!("{} {} failed: {}", request.method, request.url, source);
        Self {
            request,
            response: None,
            message,
            source: Some(source),
        }
    }

    /// The request never produced a response, for transports not built on reqwest
    pub fn other(request: RequestDescriptor, message: impl std::fmt::Display) -> Self {
        let message = format!("{} {} failed: {}", request.method, request.url, message);
        Self {
            request,
            response: None,
            message,
            source: None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.response.as_ref().map(|r| r.status)
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    /// Non-retryable failure, surfaced unchanged
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Unauthorized - no refresh token available")]
    RefreshUnavailable(#[source] TransportError),

    #[error("Unauthorized request and refresh failed: {reason}")]
    RefreshFailed { reason: String },

    #[error("Session terminated while waiting for token refresh")]
    SessionTerminated,

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Failed to serialize request body: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to build HTTP client: {0}")]
    Builder(#[from] reqwest::Error),
}

impl ClientError {
    /// Response status of the underlying transport failure, if any
    pub fn status(&self) -> Option<StatusCode> {
        self.transport_error().and_then(TransportError::status)
    }

    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            ClientError::Transport(e) | ClientError::RefreshUnavailable(e) => Some(e),
            _ => None,
        }
    }

    /// True when the session was terminated by a failed refresh
    pub fn is_session_ended(&self) -> bool {
        matches!(
            self,
            ClientError::RefreshFailed { .. } | ClientError::SessionTerminated
        )
    }
}
