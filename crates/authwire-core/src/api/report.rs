//! Diagnostic reports for the logging stage.
//!
//! Reports are built from borrowed request/response data and emitted through
//! `tracing`. Building a report never fails: anything that cannot be parsed
//! or rendered is replaced by a note in the report itself.

use std::collections::BTreeMap;

use reqwest::header::{self, HeaderMap};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::error::TransportError;
use super::transport::{RequestDescriptor, ResponseDescriptor};
use crate::utils::{body_text, truncate_body};

const REDACTED: &str = "[redacted]";

#[derive(Debug, Serialize)]
pub struct ErrorReport {
    pub method: String,
    pub url: String,
    pub error: String,
    pub request: RequestReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseReport>,
}

#[derive(Debug, Serialize)]
pub struct RequestReport {
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_keys: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct ResponseReport {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Parse error, when the body is not valid JSON
    #[serde(skip_serializing_if = "Option::is_none")]
    pub malformed_body: Option<String>,
}

impl ErrorReport {
    pub fn from_error(error: &TransportError) -> Self {
        Self {
            method: error.request.method.to_string(),
            url: error.request.url.clone(),
            error: error.to_string(),
            request: RequestReport::from_request(&error.request),
            response: error.response.as_ref().map(ResponseReport::from_response),
        }
    }

    /// Pretty JSON, falling back to the debug rendering
    pub fn render(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

impl RequestReport {
    fn from_request(request: &RequestDescriptor) -> Self {
        let (data, data_keys) = match request.body {
            Some(ref body) if !body.is_empty() => match serde_json::from_slice::<Value>(body) {
                Ok(Value::Object(map)) => {
                    let keys = map.keys().cloned().collect();
                    (Some(shorten_object(map)), Some(keys))
                }
                Ok(other) => (Some(shorten_value(other)), None),
                Err(_) => (Some(Value::String(truncate_body(&body_text(body)))), None),
            },
            _ => (None, None),
        };

        Self {
            headers: header_report(&request.headers),
            data,
            data_keys,
        }
    }
}

impl ResponseReport {
    fn from_response(response: &ResponseDescriptor) -> Self {
        let (data, malformed_body) = if response.body.is_empty() {
            (None, None)
        } else {
            match serde_json::from_slice::<Value>(&response.body) {
                Ok(Value::Object(map)) => (Some(shorten_object(map)), None),
                Ok(other) => (Some(shorten_value(other)), None),
                Err(e) => {
                    debug!(error = %e, "Couldn't parse response body as JSON for error report");
                    (
                        Some(Value::String(truncate_body(&body_text(&response.body)))),
                        Some(e.to_string()),
                    )
                }
            }
        };

        Self {
            status: response.status.as_u16(),
            headers: header_report(&response.headers),
            data,
            malformed_body,
        }
    }
}

/// Each top-level value becomes its truncated JSON text
fn shorten_object(map: serde_json::Map<String, Value>) -> Value {
    let shortened = map
        .into_iter()
        .map(|(key, value)| (key, shorten_value(value)))
        .collect();
    Value::Object(shortened)
}

fn shorten_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(truncate_body(&s)),
        Value::Null | Value::Bool(_) | Value::Number(_) => value,
        other => Value::String(truncate_body(&other.to_string())),
    }
}

/// Header map as strings, with credentials redacted
fn header_report(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let rendered = if value.is_sensitive()
                || *name == header::AUTHORIZATION
                || *name == header::PROXY_AUTHORIZATION
                || *name == header::COOKIE
            {
                REDACTED.to_string()
            } else {
                value
                    .to_str()
                    .map(str::to_string)
                    .unwrap_or_else(|_| format!("<{} bytes>", value.len()))
            };
            (name.as_str().to_string(), rendered)
        })
        .collect()
}

// ===== Logging Stage =====

pub(crate) fn log_dispatch(request: &RequestDescriptor) {
    debug!(method = %request.method, url = %request.url, "Request dispatched");
}

pub(crate) fn log_success(request: &RequestDescriptor, response: &ResponseDescriptor) {
    debug!(
        method = %request.method,
        url = %request.url,
        status = response.status.as_u16(),
        "Successful response"
    );
}

pub(crate) fn log_failure(error: &TransportError) {
    let report = ErrorReport::from_error(error);
    warn!(
        method = %report.method,
        url = %report.url,
        status = ?error.status().map(|s| s.as_u16()),
        report = %report.render(),
        "Request failed"
    );
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;
    use reqwest::{Method, StatusCode};

    use super::*;

    fn failed(request: RequestDescriptor, status: u16, body: &[u8]) -> TransportError {
        let response = ResponseDescriptor {
            status: StatusCode::from_u16(status).unwrap(),
            headers: HeaderMap::new(),
            body: body.to_vec(),
        };
        TransportError::from_response(request, response)
    }

    #[test]
    fn test_report_redacts_credentials() {
        let mut token = HeaderValue::from_static("secret");
        token.set_sensitive(true);
        let request = RequestDescriptor::get("/a")
            .header(header::AUTHORIZATION, HeaderValue::from_static("Bearer secret"))
            .header(header::HeaderName::from_static("x-api-token"), token)
            .header(header::ACCEPT, HeaderValue::from_static("application/json"));

        let report = ErrorReport::from_error(&failed(request, 500, b""));

        assert_eq!(report.request.headers["authorization"], REDACTED);
        assert_eq!(report.request.headers["x-api-token"], REDACTED);
        assert_eq!(report.request.headers["accept"], "application/json");
        assert!(!report.render().contains("secret"));
    }

    #[test]
    fn test_report_request_data_keys_and_truncation() {
        let long = "y".repeat(1000);
        let request = RequestDescriptor::json(
            Method::POST,
            "/a",
            &serde_json::json!({"name": "n", "blob": long, "nested": {"k": 1}}),
        )
        .unwrap();

        let report = ErrorReport::from_error(&failed(request, 400, b"{}"));

        let mut keys = report.request.data_keys.clone().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["blob", "name", "nested"]);

        let data = report.request.data.unwrap();
        assert_eq!(data["name"], "n");
        assert!(data["blob"].as_str().unwrap().contains("(truncated, 1000 total bytes)"));
        assert_eq!(data["nested"], r#"{"k":1}"#);
    }

    #[test]
    fn test_report_malformed_response_body() {
        let report = ErrorReport::from_error(&failed(
            RequestDescriptor::get("/a"),
            502,
            b"<html>Bad Gateway</html>",
        ));

        let response = report.response.unwrap();
        assert_eq!(response.status, 502);
        assert!(response.malformed_body.is_some());
        assert_eq!(response.data, Some(Value::String("<html>Bad Gateway</html>".into())));
    }

    #[test]
    fn test_report_json_response_body() {
        let report = ErrorReport::from_error(&failed(
            RequestDescriptor::get("/a"),
            401,
            br#"{"error": "token expired"}"#,
        ));

        let response = report.response.unwrap();
        assert!(response.malformed_body.is_none());
        assert_eq!(response.data.unwrap()["error"], "token expired");
    }

    #[test]
    fn test_report_without_response() {
        let error = TransportError::other(RequestDescriptor::get("/a"), "connection refused");
        let report = ErrorReport::from_error(&error);

        assert!(report.response.is_none());
        assert!(report.render().contains("connection refused"));
    }
}
