//! Request-scoped context handed to authenticators.
//!
//! The transport owns parsing and writing; authenticators only see the
//! request head (read-only) and a mutable response surface they can put a
//! status, headers and a body on.

use axum::body::{Body, Bytes};
use axum::response::{IntoResponse, Response};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Request, StatusCode, request::Parts};

/// Mutable response surface of one request.
#[derive(Debug, Clone)]
pub struct ResponseParts {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    finished: bool,
}

impl ResponseParts {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            finished: false,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Terminate the response with no body.
    pub fn finish_empty(&mut self) {
        self.body = Bytes::new();
        self.finished = true;
    }

    /// Terminate the response with a JSON body.
    pub fn finish_json(&mut self, value: &serde_json::Value) {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Bytes::from(value.to_string());
        self.finished = true;
    }

    /// Whether some step already produced the final response.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn into_response(self) -> Response {
        (self.status, self.headers, Body::from(self.body)).into_response()
    }
}

impl Default for ResponseParts {
    fn default() -> Self {
        Self::new()
    }
}

/// Request head plus the response being built for it.
#[derive(Debug)]
pub struct RequestContext {
    request: Parts,
    response: ResponseParts,
}

impl RequestContext {
    pub fn new(request: Parts) -> Self {
        Self {
            request,
            response: ResponseParts::new(),
        }
    }

    /// Build a context from a full request, copying its head.
    pub fn from_request<B>(request: &Request<B>) -> Self {
        let mut head = Request::new(());
        *head.method_mut() = request.method().clone();
        *head.uri_mut() = request.uri().clone();
        *head.version_mut() = request.version();
        *head.headers_mut() = request.headers().clone();
        let (parts, ()) = head.into_parts();
        Self::new(parts)
    }

    pub fn request(&self) -> &Parts {
        &self.request
    }

    pub fn response(&self) -> &ResponseParts {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut ResponseParts {
        &mut self.response
    }

    pub fn into_response(self) -> Response {
        self.response.into_response()
    }
}
