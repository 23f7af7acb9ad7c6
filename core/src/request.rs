//! Request descriptors and the builder that resolves them into `HttpRequest`s.
//!
//! # Design
//! An `ApiRequest` names a route and carries everything needed to fill it
//! in. `build` is a pure function of the route, the base URL and the
//! descriptor: it performs no I/O. Unbound or empty placeholders and
//! headers that are not valid HTTP are reported as programming errors
//! before anything reaches a transport.

use std::collections::HashMap;

use reqwest::header::{HeaderName, HeaderValue};
use url::Url;

use crate::error::ApiError;
use crate::http::{Headers, HttpRequest, RequestBody};
use crate::routes::Route;

/// A logical request: route name plus parameters, query, headers and body.
#[derive(Debug, Clone, Default)]
pub struct ApiRequest {
    pub route: String,
    pub params: HashMap<String, String>,
    pub query: Vec<(String, String)>,
    pub headers: Headers,
    pub body: Option<RequestBody>,
}

impl ApiRequest {
    pub fn new(route: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            ..Self::default()
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn query_pairs<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Attaches `value` as a JSON body.
    pub fn json<T: serde::Serialize + ?Sized>(self, value: &T) -> Result<Self, ApiError> {
        let body = RequestBody::json(value).map_err(ApiError::Encode)?;
        Ok(self.body(body))
    }
}

/// Resolves `request` against `route` and `base_url`.
pub fn build(route: &Route, base_url: &Url, request: ApiRequest) -> Result<HttpRequest, ApiError> {
    let segments = resolve_segments(route, &request.params)?;

    let mut url = base_url.clone();
    url.set_query(None);
    url.set_fragment(None);
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|()| ApiError::InvalidUrl(format!("{base_url} cannot carry a path")))?;
        path.pop_if_empty();
        path.extend(segments.iter().map(String::as_str));
    }
    if !request.query.is_empty() {
        url.query_pairs_mut().extend_pairs(request.query.iter());
    }

    let mut headers = request.headers;
    validate_headers(route, &headers)?;
    let body = request.body.map(|body| {
        if !headers.contains("content-type") {
            headers.insert("Content-Type", body.content_type);
        }
        body.bytes
    });

    Ok(HttpRequest {
        method: route.method,
        url,
        headers,
        body,
    })
}

fn validate_headers(route: &Route, headers: &Headers) -> Result<(), ApiError> {
    for (name, value) in headers.iter() {
        if HeaderName::from_bytes(name.as_bytes()).is_err() || HeaderValue::from_str(value).is_err()
        {
            return Err(ApiError::InvalidHeader {
                route: route.name.clone(),
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

/// Splits the template into path segments with every placeholder bound.
/// Values are raw here; the URL's segment writer escapes them.
fn resolve_segments(
    route: &Route,
    params: &HashMap<String, String>,
) -> Result<Vec<String>, ApiError> {
    route
        .path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| bind_segment(route, segment, params))
        .collect()
}

fn bind_segment(
    route: &Route,
    segment: &str,
    params: &HashMap<String, String>,
) -> Result<String, ApiError> {
    let mut out = String::with_capacity(segment.len());
    let mut rest = segment;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}').unwrap_or(after.len());
        let name = &after[..close];
        let value = params
            .get(name)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ApiError::MissingPathParameter {
                route: route.name.clone(),
                parameter: name.to_string(),
            })?;
        out.push_str(value);
        rest = after.get(close + 1..).unwrap_or("");
    }
    out.push_str(rest);
    Ok(out)
}
