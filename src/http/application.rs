//! Applications served by the default HTTP pipeline

use std::collections::BTreeMap;

use http::StatusCode;
use serde::Serialize;

use crate::common::Result;

use super::message::{HttpRequest, HttpResponse};

/// Request handler behind the default pipeline
///
/// Runs on the blocking worker pool, so it may do blocking work.
pub trait HttpApplication: Send + Sync + 'static {
    /// Produce the response for one request
    fn handle(&self, request: HttpRequest) -> Result<HttpResponse>;
}

impl<F> HttpApplication for F
where
    F: Fn(HttpRequest) -> Result<HttpResponse> + Send + Sync + 'static,
{
    fn handle(&self, request: HttpRequest) -> Result<HttpResponse> {
        self(request)
    }
}

/// JSON description of a request, returned by [`StatusApplication`]
#[derive(Debug, Serialize)]
struct RequestReport<'a> {
    service: &'a str,
    version: &'a str,
    method: &'a str,
    url: String,
    path: &'a str,
    query: Option<&'a str>,
    headers: BTreeMap<String, String>,
    body_length: usize,
}

/// Application answering every request with a JSON echo of it
#[derive(Debug, Clone)]
pub struct StatusApplication {
    service: String,
}

impl StatusApplication {
    /// Create the application, `service` names it in responses
    pub fn new(service: impl Into<String>) -> Self {
        Self { service: service.into() }
    }
}

impl Default for StatusApplication {
    fn default() -> Self {
        Self::new(crate::APP_NAME)
    }
}

impl HttpApplication for StatusApplication {
    fn handle(&self, request: HttpRequest) -> Result<HttpResponse> {
        let headers = request
            .head
            .headers
            .iter()
            .map(|(name, value)| {
                (name.as_str().to_string(), String::from_utf8_lossy(value.as_bytes()).into_owned())
            })
            .collect();

        let report = RequestReport {
            service: &self.service,
            version: crate::VERSION,
            method: request.head.method.as_str(),
            url: request.url(),
            path: request.path(),
            query: request.query(),
            headers,
            body_length: request.body.len(),
        };

        HttpResponse::json(StatusCode::OK, &report)
    }
}
