//! HTTP transport for the pull-request platform.
//!
//! Business logic only sees [`HttpTransport`]; production uses blocking
//! reqwest, tests and `--mock` runs use [`CannedTransport`].

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub bearer_token: String,
    pub body: Option<Value>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn parse_json(&self) -> Result<Value> {
        serde_json::from_str(&self.body).map_err(|e| {
            Error::internal_json(e.to_string(), Some("parse platform response".to_string()))
        })
    }
}

pub trait HttpTransport {
    /// Send one request. Non-2xx statuses are returned, not raised; only
    /// failures to obtain a response are errors.
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder().build().map_err(|e| {
            Error::platform_request_failed("", format!("cannot build HTTP client: {}", e))
        })?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };

        builder = builder
            .bearer_auth(&request.bearer_token)
            .header(ACCEPT, "application/json")
            .timeout(request.timeout);

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .map_err(|e| Error::platform_request_failed(&request.url, e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| Error::platform_request_failed(&request.url, e.to_string()))?;

        Ok(HttpResponse { status, body })
    }
}

struct CannedRoute {
    method: HttpMethod,
    url_contains: String,
    responses: VecDeque<HttpResponse>,
}

/// Transport answering from pre-registered responses.
///
/// Responses registered for the same route are served in order; the last one
/// keeps being served once the queue is down to it. Every request is recorded.
#[derive(Default)]
pub struct CannedTransport {
    routes: Mutex<Vec<CannedRoute>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl CannedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, method: HttpMethod, url_contains: &str, response: HttpResponse) {
        let Ok(mut routes) = self.routes.lock() else {
            return;
        };
        match routes
            .iter_mut()
            .find(|route| route.method == method && route.url_contains == url_contains)
        {
            Some(route) => route.responses.push_back(response),
            None => routes.push(CannedRoute {
                method,
                url_contains: url_contains.to_string(),
                responses: VecDeque::from([response]),
            }),
        }
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

impl HttpTransport for CannedTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let mut routes = self
            .routes
            .lock()
            .map_err(|_| Error::internal_unexpected("canned transport lock poisoned"))?;

        // The fragment matching furthest into the URL wins, then the longest:
        // `&start=25` beats the first-page query it extends.
        let route = routes
            .iter_mut()
            .filter(|route| route.method == request.method)
            .filter_map(|route| {
                let end = request.url.rfind(&route.url_contains)? + route.url_contains.len();
                Some((end, route.url_contains.len(), route))
            })
            .max_by_key(|(end, len, _)| (*end, *len))
            .map(|(_, _, route)| route);

        let Some(route) = route else {
            return Err(Error::platform_request_failed(
                &request.url,
                "no canned response registered",
            ));
        };

        let response = if route.responses.len() > 1 {
            route.responses.pop_front()
        } else {
            route.responses.front().cloned()
        };

        response.ok_or_else(|| {
            Error::platform_request_failed(&request.url, "no canned response registered")
        })
    }
}
