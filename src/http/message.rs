//! Aggregated HTTP request and response types
//!
//! Minimal object model handed to applications by the default pipeline.

use bytes::{Bytes, BytesMut};
use http::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST};
use http::StatusCode;
use serde::Serialize;

use crate::common::{GatewayError, Result};

use super::codec::RequestHead;

/// A complete request: head plus aggregated body
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Request line and headers
    pub head: RequestHead,
    /// Request body
    pub body: Bytes,
}

impl HttpRequest {
    /// Bundle a head with its body
    pub fn new(head: RequestHead, body: Bytes) -> Self {
        Self { head, body }
    }

    /// Request path without the query string
    pub fn path(&self) -> &str {
        let target = self.target_path();
        target.split('?').next().unwrap_or(target)
    }

    /// Query string, if any
    pub fn query(&self) -> Option<&str> {
        self.target_path().split_once('?').map(|(_, query)| query)
    }

    /// Full request URL
    ///
    /// Origin-form targets are completed with the `Host` header.
    pub fn url(&self) -> String {
        let uri = &self.head.uri;
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return uri.clone();
        }
        let host = self
            .head
            .headers
            .get(HOST)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("localhost");
        format!("http://{}{}", host, uri)
    }

    fn target_path(&self) -> &str {
        let uri = self.head.uri.as_str();
        match uri.find("://") {
            Some(scheme_end) => {
                let rest = &uri[scheme_end + 3..];
                rest.find('/').map(|i| &rest[i..]).unwrap_or("/")
            }
            None => uri,
        }
    }
}

/// A response produced by an application
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code
    pub status: StatusCode,
    /// Response headers; `Content-Length` and `Connection` are set on encoding
    pub headers: HeaderMap,
    /// Response body
    pub body: Bytes,
}

impl HttpResponse {
    /// Empty response with the given status
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Plain-text response whose body is the canonical reason phrase
    pub fn status_text(status: StatusCode) -> Self {
        let reason = status.canonical_reason().unwrap_or("Unknown");
        Self::new(status)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))
            .with_body(format!("{}\n", reason))
    }

    /// JSON response
    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)
            .map_err(|e| GatewayError::Other(format!("Failed to serialize response: {}", e)))?;
        Ok(Self::new(status)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .with_body(body))
    }

    /// `400 Bad Request`
    pub fn bad_request() -> Self {
        Self::status_text(StatusCode::BAD_REQUEST)
    }

    /// `413 Payload Too Large`
    pub fn payload_too_large() -> Self {
        Self::status_text(StatusCode::PAYLOAD_TOO_LARGE)
    }

    /// `500 Internal Server Error`
    pub fn internal_error() -> Self {
        Self::status_text(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// `503 Service Unavailable`
    pub fn service_unavailable() -> Self {
        Self::status_text(StatusCode::SERVICE_UNAVAILABLE)
    }

    /// Set a header, replacing previous values
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Replace the body
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Serialize to HTTP/1.1 wire format
    ///
    /// `include_body` is false for responses to `HEAD`; the length header
    /// still describes the body.
    pub fn encode(&self, keep_alive: bool, include_body: bool) -> Bytes {
        let mut out = BytesMut::with_capacity(128 + self.body.len());
        out.extend_from_slice(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason().unwrap_or("Unknown")
            )
            .as_bytes(),
        );

        for (name, value) in &self.headers {
            if *name == CONTENT_LENGTH || *name == CONNECTION {
                continue;
            }
            out.extend_from_slice(name.as_str().as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }

        out.extend_from_slice(format!("content-length: {}\r\n", self.body.len()).as_bytes());
        out.extend_from_slice(if keep_alive {
            b"connection: keep-alive\r\n".as_slice()
        } else {
            b"connection: close\r\n".as_slice()
        });
        out.extend_from_slice(b"\r\n");

        if include_body {
            out.extend_from_slice(&self.body);
        }
        out.freeze()
    }
}
