//! Transport seam and the invoker that drives it.
//!
//! # Design
//! The dispatch layer never talks to the network directly. It hands a
//! finished `HttpRequest` to an injected `Transport` and gets back either a
//! response (any status) or a `TransportError` when no response was
//! obtained at all. Pooling, proxies and TLS stay with the transport.
//!
//! `Invoker` wraps a transport with the per-call `CallContext` and the
//! optional `TraceHook`. Hooks observe borrowed data only and run inline,
//! so they cannot change the outcome of a call.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use thiserror::Error;
use tracing::debug;

use crate::context::CallContext;
use crate::http::{Headers, HttpRequest, HttpResponse, ResponseBody};

/// Why no response was obtained.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// DNS failure, refused connection, TLS handshake failure.
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("request cancelled")]
    Cancelled,

    /// Any other failure while sending or receiving.
    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let message = error_chain(&err);
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(message)
        } else {
            TransportError::Request(message)
        }
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let _ = write!(message, ": {cause}");
        source = cause.source();
    }
    message
}

/// Performs one HTTP round trip.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// `Transport` over a caller-supplied `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self.client.request(request.method.into(), request.url);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;

        let status = response.status().as_u16();
        let headers: Headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = ResponseBody::from_stream(response.bytes_stream().map_err(TransportError::from));

        Ok(HttpResponse::new(status, headers, body))
    }
}

/// Observer for raw request/response traffic.
///
/// Called inline on the dispatching task; implementations must return
/// promptly and must not block.
pub trait TraceHook: Send + Sync {
    fn on_request(&self, route: &str, request: &HttpRequest);

    /// Called with the response head; the body is still unread.
    fn on_response(&self, route: &str, status: u16, headers: &Headers);
}

/// Writes wire traffic as `tracing` debug events on the
/// `concourse_core::wire` target. Credentials are redacted.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTraceHook;

const MAX_TRACED_BODY: usize = 2048;

impl TraceHook for LogTraceHook {
    fn on_request(&self, route: &str, request: &HttpRequest) {
        let body = match &request.body {
            Some(body) if body.len() > MAX_TRACED_BODY => format!(
                "{}... ({} bytes)",
                String::from_utf8_lossy(&body[..MAX_TRACED_BODY]),
                body.len()
            ),
            Some(body) => String::from_utf8_lossy(body).into_owned(),
            None => String::new(),
        };
        debug!(
            target: "concourse_core::wire",
            route,
            method = %request.method,
            url = %request.url,
            headers = %render_headers(&request.headers),
            body = %body,
            "request"
        );
    }

    fn on_response(&self, route: &str, status: u16, headers: &Headers) {
        debug!(
            target: "concourse_core::wire",
            route,
            status,
            headers = %render_headers(headers),
            "response"
        );
    }
}

fn render_headers(headers: &Headers) -> String {
    let mut out = String::new();
    for (name, value) in headers.iter() {
        if !out.is_empty() {
            out.push_str("; ");
        }
        if name.eq_ignore_ascii_case("authorization") {
            let _ = write!(out, "{name}: [redacted]");
        } else {
            let _ = write!(out, "{name}: {value}");
        }
    }
    out
}

/// Runs transport calls under a `CallContext`, with optional tracing.
#[derive(Clone)]
pub struct Invoker {
    transport: Arc<dyn Transport>,
    trace: Option<Arc<dyn TraceHook>>,
}

impl Invoker {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            trace: None,
        }
    }

    pub fn with_trace_hook(mut self, hook: Arc<dyn TraceHook>) -> Self {
        self.trace = Some(hook);
        self
    }

    pub async fn invoke(
        &self,
        route: &str,
        request: HttpRequest,
        ctx: &CallContext,
    ) -> Result<HttpResponse, TransportError> {
        if let Some(hook) = &self.trace {
            hook.on_request(route, &request);
        }

        let response = ctx.guard(self.transport.send(request)).await?;

        if let Some(hook) = &self.trace {
            hook.on_response(route, response.status, &response.headers);
        }
        Ok(response)
    }
}

impl std::fmt::Debug for Invoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invoker")
            .field("tracing", &self.trace.is_some())
            .finish_non_exhaustive()
    }
}
