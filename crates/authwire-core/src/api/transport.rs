//! Transport abstraction the request pipeline dispatches through.
//!
//! `ReqwestTransport` is the default implementation; anything implementing
//! `Transport` can stand in for it.

use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

use super::error::TransportError;
use crate::utils::body_text;

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Request with a JSON body and matching content type
    pub fn json<B: Serialize + ?Sized>(
        method: Method,
        url: impl Into<String>,
        body: &B,
    ) -> serde_json::Result<Self> {
        let bytes = serde_json::to_vec(body)?;
        Ok(Self::new(method, url)
            .header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(bytes))
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ResponseDescriptor {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ResponseDescriptor {
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    pub fn text(&self) -> Cow<'_, str> {
        body_text(&self.body)
    }
}

/// Sends one request. Non-success statuses are reported as a `TransportError`
/// carrying the response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: RequestDescriptor) -> Result<ResponseDescriptor, TransportError>;
}

/// Settings for the default transport and its lowest-precedence headers.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Prefix for relative request URLs
    pub base_url: Option<String>,
    pub timeout: Duration,
    /// Applied below both client default headers and per-request headers
    pub headers: HeaderMap,
}

impl Default for TransportConfig {
    fn default() -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            base_url: None,
            timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            headers,
        }
    }
}

impl TransportConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Transport built on reqwest.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    base_url: Option<String>,
}

impl ReqwestTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self::with_client(client, config.base_url.clone()))
    }

    /// Share an existing client's connection pool
    pub fn with_client(client: Client, base_url: Option<String>) -> Self {
        Self { client, base_url }
    }

    fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }
        match self.base_url {
            Some(ref base) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                url.trim_start_matches('/')
            ),
            None => url.to_string(),
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: RequestDescriptor) -> Result<ResponseDescriptor, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), self.resolve_url(&request.url))
            .headers(request.headers.clone());
        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return Err(TransportError::network(request, e)),
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = match response.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => return Err(TransportError::network(request, e)),
        };

        let response = ResponseDescriptor {
            status,
            headers,
            body,
        };
        if status.is_success() {
            Ok(response)
        } else {
            Err(TransportError::from_response(request, response))
        }
    }
}
