//! Per-request context threaded through the interception pipeline
//!
//! A [`RequestContext`] is the explicit stand-in for ambient request state:
//! the request line, the readable body, the outbound response channel, the
//! opaque route-resolution result, and the per-request trace context. It is
//! exclusively owned by one request's task and must not be referenced after
//! the request completes.

use crate::capture::{BodySink, RequestBody};
use crate::telemetry::RequestTrace;
use http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use std::io;
use tokio::io::AsyncWrite;

/// Result of the host's route lookup, consumed opaquely.
///
/// Routing itself is the host framework's business; the pipeline only cares
/// whether the request resolved to a concrete controller/action pair.
#[derive(Debug, Clone, Default)]
pub struct ResolvedRoute {
    pub controller: Option<String>,
    pub action: Option<String>,
}

impl ResolvedRoute {
    /// A route that resolved to a concrete controller and action.
    pub fn new(controller: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            controller: Some(controller.into()),
            action: Some(action.into()),
        }
    }

    /// `"{Controller}.{Action}"` when both parts are present, else `None`.
    pub fn action_name(&self) -> Option<String> {
        match (&self.controller, &self.action) {
            (Some(controller), Some(action)) => Some(format!("{controller}.{action}")),
            _ => None,
        }
    }
}

/// The outbound side of a request: status, headers, and the body sink.
pub struct ResponseChannel {
    status: StatusCode,
    headers: HeaderMap,
    sink: BodySink,
}

impl ResponseChannel {
    /// A response channel writing body bytes to the given real output writer.
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            sink: BodySink::direct(writer),
        }
    }

    /// Current response status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Set the response status.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable response headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Set the `Content-Type` header.
    pub fn set_content_type(&mut self, value: HeaderValue) {
        self.headers.insert(header::CONTENT_TYPE, value);
    }

    /// Write body bytes through the sink (buffered while capture is armed).
    pub async fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.sink.write(buf).await
    }

    /// Divert body writes to an in-memory capture buffer.
    pub fn arm(&mut self) {
        self.sink.arm();
    }

    /// Whether body writes are currently diverted.
    pub fn is_armed(&self) -> bool {
        self.sink.is_armed()
    }

    /// The captured body as text, if armed.
    pub fn captured_text(&self) -> Option<String> {
        self.sink.captured_text()
    }

    /// Copy any captured bytes to the real writer and restore pass-through.
    pub async fn flush_captured(&mut self) -> io::Result<()> {
        self.sink.flush_captured().await
    }
}

impl std::fmt::Debug for ResponseChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseChannel")
            .field("status", &self.status)
            .field("sink", &self.sink)
            .finish()
    }
}

/// Everything the pipeline knows about one in-flight request.
pub struct RequestContext {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: RequestBody,
    route: ResolvedRoute,
    response: ResponseChannel,
    trace: RequestTrace,
}

impl RequestContext {
    /// Build a context for one inbound request.
    pub fn new(
        method: Method,
        uri: Uri,
        body: RequestBody,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body,
            route: ResolvedRoute::default(),
            response: ResponseChannel::new(writer),
            trace: RequestTrace::new(),
        }
    }

    /// Attach the host's route-lookup result.
    pub fn with_route(mut self, route: ResolvedRoute) -> Self {
        self.route = route;
        self
    }

    /// The HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request URI.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The raw request target: path plus query when present, else the path.
    pub fn raw_path(&self) -> &str {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| self.uri.path())
    }

    /// Request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable request headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// The readable request body.
    pub fn body_mut(&mut self) -> &mut RequestBody {
        &mut self.body
    }

    /// The route-lookup result.
    pub fn route(&self) -> &ResolvedRoute {
        &self.route
    }

    /// `"{Controller}.{Action}"` when the route resolved, else `None`.
    pub fn resolved_action(&self) -> Option<String> {
        self.route.action_name()
    }

    /// The outbound response channel.
    pub fn response(&self) -> &ResponseChannel {
        &self.response
    }

    /// Mutable outbound response channel.
    pub fn response_mut(&mut self) -> &mut ResponseChannel {
        &mut self.response
    }

    /// The per-request trace context.
    pub fn trace(&self) -> &RequestTrace {
        &self.trace
    }

    /// Mutable per-request trace context, for tag attachment.
    pub fn trace_mut(&mut self) -> &mut RequestTrace {
        &mut self.trace
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("route", &self.route)
            .finish()
    }
}
