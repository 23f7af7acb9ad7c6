//! The dispatch layer: request descriptor in, typed result or `ApiError` out.
//!
//! # Design
//! One call walks `Built → Sent → {Decoded, Classified, Failed}` exactly
//! once; nothing is retried here. Programming errors surface before the
//! transport is touched. The route table is shared read-only, and each call
//! owns its request, response and body, so any number of calls can be in
//! flight on one `Connection`.

use std::sync::Arc;

use tracing::{debug, error, instrument, warn, Span};
use url::Url;

use crate::classify::{classify, Outcome};
use crate::config::{ClientConfig, ConfigError};
use crate::context::CallContext;
use crate::decode::{self, ReadError, ResponseFormat};
use crate::error::ApiError;
use crate::http::{Headers, HttpRequest, HttpResponse, ResponseBody};
use crate::pagination::Pagination;
use crate::request::{self, ApiRequest};
use crate::routes::RouteTable;
use crate::transport::{
    Invoker, LogTraceHook, ReqwestTransport, TraceHook, Transport, TransportError,
};

/// A decoded successful response with its status and headers.
#[derive(Debug)]
pub struct Dispatched<T> {
    pub value: T,
    pub status: u16,
    pub headers: Headers,
    route: String,
}

impl<T> Dispatched<T> {
    pub fn into_value(self) -> T {
        self.value
    }

    /// Pagination advertised by the response headers.
    pub fn pagination(&self) -> Result<Pagination, ApiError> {
        Pagination::from_headers(&self.headers).map_err(|source| ApiError::Pagination {
            route: self.route.clone(),
            source,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Connection {
    base_url: Url,
    routes: Arc<RouteTable>,
    invoker: Invoker,
}

impl Connection {
    pub fn new(base_url: Url, routes: Arc<RouteTable>, transport: Arc<dyn Transport>) -> Self {
        Self {
            base_url,
            routes,
            invoker: Invoker::new(transport),
        }
    }

    /// Connection over reqwest with the built-in ATC routes.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        let transport = ReqwestTransport::new(config.http_client()?);
        let connection = Self::new(
            config.base_url.clone(),
            Arc::new(RouteTable::atc()),
            Arc::new(transport),
        );
        Ok(if config.trace {
            connection.with_trace_hook(Arc::new(LogTraceHook))
        } else {
            connection
        })
    }

    pub fn with_trace_hook(mut self, hook: Arc<dyn TraceHook>) -> Self {
        self.invoker = self.invoker.with_trace_hook(hook);
        self
    }

    pub fn url(&self) -> &Url {
        &self.base_url
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Resolves `request` into a concrete HTTP request without sending it.
    pub fn build(&self, request: ApiRequest) -> Result<HttpRequest, ApiError> {
        let built = self
            .routes
            .resolve(&request.route)
            .and_then(|route| request::build(route, &self.base_url, request));
        if let Err(err) = &built {
            if err.is_programming_error() {
                error!(error = %err, "request could not be built");
            }
        }
        built
    }

    /// Dispatches `request` and decodes a successful body as `F`.
    #[instrument(
        name = "dispatch",
        skip_all,
        fields(
            route = %request.route,
            http.method = tracing::field::Empty,
            http.url = tracing::field::Empty,
            http.status_code = tracing::field::Empty,
            otel.kind = "client",
        )
    )]
    pub async fn send<F: ResponseFormat>(
        &self,
        request: ApiRequest,
        ctx: &CallContext,
    ) -> Result<Dispatched<F::Output>, ApiError> {
        let route = request.route.clone();
        let response = self.round_trip(request, ctx).await?;
        let status = response.status;
        let headers = response.headers;

        let value = ctx
            .guard(decode::decode::<F>(response.body))
            .await
            .map_err(|err| match err {
                ReadError::Transport(source) => ApiError::Transport {
                    route: route.clone(),
                    source,
                },
                ReadError::Decode(source) => ApiError::Decode {
                    route: route.clone(),
                    source,
                },
            });

        match value {
            Ok(value) => {
                debug!(status, "response decoded");
                Ok(Dispatched {
                    value,
                    status,
                    headers,
                    route,
                })
            }
            Err(err) => {
                warn!(error = %err, "response could not be read");
                Err(err)
            }
        }
    }

    /// Dispatches `request` and hands back the undecoded body of a
    /// successful response, for event feeds and downloads decoded elsewhere.
    #[instrument(
        name = "open_stream",
        skip_all,
        fields(
            route = %request.route,
            http.method = tracing::field::Empty,
            http.url = tracing::field::Empty,
            http.status_code = tracing::field::Empty,
            otel.kind = "client",
        )
    )]
    pub async fn open_stream(
        &self,
        request: ApiRequest,
        ctx: &CallContext,
    ) -> Result<(Headers, ResponseBody), ApiError> {
        let response = self.round_trip(request, ctx).await?;
        Ok((response.headers, response.body))
    }

    /// Build, send and classify; returns the successful response unread.
    async fn round_trip(
        &self,
        request: ApiRequest,
        ctx: &CallContext,
    ) -> Result<HttpResponse, ApiError> {
        let route = request.route.clone();
        let http_request = self.build(request)?;
        let path = http_request.url.path().to_string();

        let span = Span::current();
        span.record("http.method", http_request.method.as_str());
        span.record("http.url", http_request.url.as_str());

        let result = self.invoker.invoke(&route, http_request, ctx).await;
        if let Ok(response) = &result {
            span.record("http.status_code", response.status);
        }

        // Reading an error body for its message is bounded by the context too.
        let outcome = ctx
            .guard(async { Ok::<_, TransportError>(classify(result).await) })
            .await
            .unwrap_or_else(Outcome::Transport);

        let failure = match outcome {
            Outcome::Success(response) => return Ok(response),
            Outcome::NotFound => ApiError::NotFound { route, path },
            Outcome::Forbidden { message } => ApiError::Forbidden { route, message },
            Outcome::UnexpectedStatus { status, message } => ApiError::UnexpectedStatus {
                route,
                status,
                message,
            },
            Outcome::Transport(source) => ApiError::Transport { route, source },
        };
        if failure.is_not_found() {
            debug!(error = %failure, "resource absent");
        } else {
            warn!(error = %failure, "request failed");
        }
        Err(failure)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::context::CancellationToken;
    use crate::decode::{Json, NoContent};
    use crate::pagination::Page;
    use crate::routes::names;

    fn connection(base: &str) -> Connection {
        Connection::new(
            Url::parse(base).unwrap(),
            Arc::new(RouteTable::atc()),
            Arc::new(ReqwestTransport::default()),
        )
    }

    #[derive(Default)]
    struct Counting(AtomicUsize);

    #[async_trait]
    impl Transport for Counting {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(HttpResponse::new(200, Headers::new(), ResponseBody::empty()))
        }
    }

    /// Answers with `status` and then never delivers a body byte.
    struct StalledBody(u16);

    #[async_trait]
    impl Transport for StalledBody {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
            let body = futures::stream::pending::<Result<bytes::Bytes, TransportError>>();
            Ok(HttpResponse::new(self.0, Headers::new(), ResponseBody::from_stream(body)))
        }
    }

    fn stalled(status: u16) -> Connection {
        Connection::new(
            Url::parse("http://atc.local").unwrap(),
            Arc::new(RouteTable::atc()),
            Arc::new(StalledBody(status)),
        )
    }

    #[tokio::test]
    async fn deadline_bounds_a_stalled_error_body() {
        let ctx = CallContext::new().with_timeout(Duration::from_millis(50));
        let conn = stalled(500);
        let call = conn.send::<NoContent>(ApiRequest::new(names::GET_INFO), &ctx);
        let err = tokio::time::timeout(Duration::from_secs(2), call)
            .await
            .expect("call outlived its deadline")
            .unwrap_err();
        assert!(
            matches!(err, ApiError::Transport { source: TransportError::Timeout, .. }),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn cancel_interrupts_a_stalled_error_body() {
        let token = CancellationToken::new();
        let ctx = CallContext::new().with_cancellation(token.clone());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let conn = stalled(403);
        let call = conn.send::<NoContent>(
            ApiRequest::new(names::GET_TEAM).param("team_name", "ops"),
            &ctx,
        );
        let err = tokio::time::timeout(Duration::from_secs(2), call)
            .await
            .expect("call ignored cancellation")
            .unwrap_err();
        assert!(err.is_cancelled(), "{err:?}");
    }

    #[tokio::test]
    async fn create_build_decodes_created_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/builds"))
            .respond_with(ResponseTemplate::new(201).set_body_string(r#"{"id":123,"name":"1"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let request = ApiRequest::new(names::CREATE_BUILD)
            .json(&serde_json::json!({"id": "root"}))
            .unwrap();
        let dispatched = connection(&server.uri())
            .send::<Json<Value>>(request, &CallContext::new())
            .await
            .unwrap();
        assert_eq!(dispatched.status, 201);
        assert_eq!(dispatched.value["id"], 123);
    }

    #[tokio::test]
    async fn missing_build_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/builds/42"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = connection(&server.uri())
            .send::<Json<Value>>(
                ApiRequest::new(names::GET_BUILD).param("build_id", "42"),
                &CallContext::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found(), "{err:?}");
        assert_eq!(err.route(), Some(names::GET_BUILD));
    }

    #[tokio::test]
    async fn next_page_comes_from_link_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/builds"))
            .and(query_param("limit", "2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Link", r#"</api/v1/builds?until=40&limit=2>; rel="next""#)
                    .set_body_string(r#"[{"id":42},{"id":41}]"#),
            )
            .mount(&server)
            .await;

        let request = ApiRequest::new(names::LIST_BUILDS).query_pairs(Page::first(2).query_params());
        let dispatched = connection(&server.uri())
            .send::<Json<Vec<Value>>>(request, &CallContext::new())
            .await
            .unwrap();
        let pagination = dispatched.pagination().unwrap();
        assert_eq!(pagination.next, Some(Page::until(40, 2)));
        assert_eq!(pagination.previous, None);
        assert_eq!(dispatched.into_value().len(), 2);
    }

    #[tokio::test]
    async fn malformed_link_header_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Link", "/api/v1/builds?until=40; rel=next")
                    .set_body_string("[]"),
            )
            .mount(&server)
            .await;

        let dispatched = connection(&server.uri())
            .send::<Json<Vec<Value>>>(ApiRequest::new(names::LIST_BUILDS), &CallContext::new())
            .await
            .unwrap();
        let err = dispatched.pagination().unwrap_err();
        assert!(matches!(err, ApiError::Pagination { ref route, .. } if route == names::LIST_BUILDS));
    }

    #[tokio::test]
    async fn forbidden_and_unexpected_statuses_carry_messages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/teams/ops"))
            .respond_with(
                ResponseTemplate::new(403).set_body_string(r#"{"errors":["not authorized"]}"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/user"))
            .respond_with(ResponseTemplate::new(401).set_body_string("not authorized"))
            .mount(&server)
            .await;

        let conn = connection(&server.uri());
        let err = conn
            .send::<Json<Value>>(
                ApiRequest::new(names::GET_TEAM).param("team_name", "ops"),
                &CallContext::new(),
            )
            .await
            .unwrap_err();
        assert!(
            matches!(err, ApiError::Forbidden { message: Some(ref m), .. } if m == "not authorized"),
            "{err:?}"
        );

        let err = conn
            .send::<Json<Value>>(ApiRequest::new(names::GET_USER), &CallContext::new())
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(err.status(), Some(401));
    }

    #[tokio::test]
    async fn undecodable_success_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"id\":"))
            .mount(&server)
            .await;

        let err = connection(&server.uri())
            .send::<Json<Value>>(ApiRequest::new(names::GET_INFO), &CallContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Decode { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn no_content_ignores_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/v1/builds/7/abort"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let dispatched = connection(&server.uri())
            .send::<NoContent>(
                ApiRequest::new(names::ABORT_BUILD).param("build_id", "7"),
                &CallContext::new(),
            )
            .await
            .unwrap();
        assert_eq!(dispatched.status, 204);
    }

    #[tokio::test]
    async fn refused_connection_is_a_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = connection(&format!("http://{addr}"))
            .send::<Json<Value>>(ApiRequest::new(names::GET_INFO), &CallContext::new())
            .await
            .unwrap_err();
        assert!(
            matches!(err, ApiError::Transport { source: TransportError::Connect(_), .. }),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn programming_errors_never_reach_the_transport() {
        let transport = Arc::new(Counting::default());
        let conn = Connection::new(
            Url::parse("http://atc.local").unwrap(),
            Arc::new(RouteTable::atc()),
            transport.clone(),
        );

        let err = conn
            .send::<NoContent>(ApiRequest::new("NoSuchRoute"), &CallContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::RouteNotFound { .. }));

        let err = conn
            .send::<NoContent>(ApiRequest::new(names::GET_BUILD), &CallContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::MissingPathParameter { ref parameter, .. } if parameter == "build_id"));

        let err = conn
            .send::<NoContent>(
                ApiRequest::new(names::GET_INFO).header("Authorization", "Bearer a\r\nb"),
                &CallContext::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidHeader { .. }), "{err:?}");

        assert_eq!(transport.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stream_is_returned_unread() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/builds/7/events"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("event: end\n\n", "text/event-stream"),
            )
            .mount(&server)
            .await;

        let (headers, body) = connection(&server.uri())
            .open_stream(
                ApiRequest::new(names::BUILD_EVENTS).param("build_id", "7"),
                &CallContext::new(),
            )
            .await
            .unwrap();
        assert_eq!(headers.get("content-type"), Some("text/event-stream"));
        assert_eq!(&body.read_to_end().await.unwrap()[..], b"event: end\n\n");
    }
}
