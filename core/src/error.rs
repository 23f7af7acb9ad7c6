//! Error types for the dispatch layer.
//!
//! # Design
//! `ApiError` is a closed set that callers match exhaustively. Three groups:
//!
//! - Programming errors (`RouteNotFound`, `MissingPathParameter`,
//!   `InvalidHeader`, `NameRequired`, `Encode`, `InvalidUrl`) are raised
//!   before any network call and indicate a defect in the calling code.
//! - Classified responses (`NotFound`, `Forbidden`, `UnexpectedStatus`) keep
//!   the route name and enough context to branch without string matching.
//! - Failures around a response (`Transport`, `Decode`, `Pagination`) wrap
//!   the component error that produced them.
//!
//! `NotFound` keeps its own variant because absence is a normal outcome for
//! lookups like "fetch a build by id", which turn it into `Ok(None)`.

use thiserror::Error;

use crate::decode::DecodeError;
use crate::pagination::PaginationError;
use crate::transport::TransportError;

/// Errors returned by `Connection` and `AtcClient` operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No route is registered under this name.
    #[error("unknown route '{route}'")]
    RouteNotFound { route: String },

    /// The route's path template has a placeholder the caller did not bind,
    /// or bound to an empty value.
    #[error("route '{route}' is missing path parameter '{parameter}'")]
    MissingPathParameter { route: String, parameter: String },

    /// A caller-supplied header name or value is not valid HTTP.
    #[error("route '{route}' has invalid header '{name}'")]
    InvalidHeader { route: String, name: String },

    /// A required name argument was empty.
    #[error("{0} name required")]
    NameRequired(&'static str),

    /// The request body could not be encoded.
    #[error("failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    /// The resolved URL could not be constructed from the base URL.
    #[error("invalid request URL: {0}")]
    InvalidUrl(String),

    /// No response was obtained.
    #[error("{route}: transport failure: {source}")]
    Transport {
        route: String,
        #[source]
        source: TransportError,
    },

    /// The server reported the resource as absent (404).
    #[error("{route}: resource not found: {path}")]
    NotFound { route: String, path: String },

    /// The server denied access (403).
    #[error("{route}: forbidden{}", display_message(.message))]
    Forbidden {
        route: String,
        message: Option<String>,
    },

    /// Any other non-2xx status.
    #[error("{route}: unexpected response status {status}{}", display_message(.message))]
    UnexpectedStatus {
        route: String,
        status: u16,
        message: Option<String>,
    },

    /// A successful response body did not match the expected shape.
    #[error("{route}: failed to decode response: {source}")]
    Decode {
        route: String,
        #[source]
        source: DecodeError,
    },

    /// A successful response carried malformed pagination headers.
    #[error("{route}: malformed pagination: {source}")]
    Pagination {
        route: String,
        #[source]
        source: PaginationError,
    },
}

fn display_message(message: &Option<String>) -> String {
    match message {
        Some(message) => format!(": {message}"),
        None => String::new(),
    }
}

impl ApiError {
    /// True for errors that indicate a defect in the calling code rather
    /// than a runtime condition.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            ApiError::RouteNotFound { .. }
                | ApiError::MissingPathParameter { .. }
                | ApiError::InvalidHeader { .. }
                | ApiError::NameRequired(_)
                | ApiError::Encode(_)
                | ApiError::InvalidUrl(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }

    /// 401 responses; the server rejected or did not receive credentials.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::UnexpectedStatus { status: 401, .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            ApiError::Transport {
                source: TransportError::Cancelled,
                ..
            }
        )
    }

    /// HTTP status behind a classified error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::NotFound { .. } => Some(404),
            ApiError::Forbidden { .. } => Some(403),
            ApiError::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Route the failed call was dispatched on, if it got that far.
    pub fn route(&self) -> Option<&str> {
        match self {
            ApiError::RouteNotFound { route }
            | ApiError::MissingPathParameter { route, .. }
            | ApiError::InvalidHeader { route, .. }
            | ApiError::Transport { route, .. }
            | ApiError::NotFound { route, .. }
            | ApiError::Forbidden { route, .. }
            | ApiError::UnexpectedStatus { route, .. }
            | ApiError::Decode { route, .. }
            | ApiError::Pagination { route, .. } => Some(route),
            ApiError::NameRequired(_) | ApiError::Encode(_) | ApiError::InvalidUrl(_) => None,
        }
    }
}
