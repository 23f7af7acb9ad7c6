//! Dispatch core for the Concourse ATC API.
//!
//! # Overview
//! Callers name an API route and supply parameters; the core resolves the
//! route to a method and URL, sends it through an injected transport, sorts
//! the response into an outcome and decodes the body. `AtcClient` layers the
//! typed build, worker and cluster operations on top of `Connection`.
//!
//! # Design
//! - Routes live in a `RouteTable` value built once and shared via `Arc`;
//!   there is no global registry.
//! - The network sits behind the `Transport` trait. `ReqwestTransport` is
//!   the production implementation; tests substitute their own.
//! - Every failure is an `ApiError` variant. Status codes other than 404 and
//!   403 are reported as `UnexpectedStatus`, so 401 needs no special path.
//! - 404 handling is decided per operation in `AtcClient`: lookups by id
//!   return `Ok(None)`, operations that need the resource propagate.
//! - Wire types are defined independently from the mock-server crate;
//!   integration tests catch schema drift.

pub mod classify;
pub mod client;
pub mod config;
pub mod connection;
pub mod context;
pub mod decode;
pub mod error;
pub mod http;
pub mod pagination;
pub mod request;
pub mod routes;
pub mod transport;
pub mod types;

pub use client::{AtcClient, TeamClient};
pub use config::{ClientConfig, ConfigError};
pub use connection::{Connection, Dispatched};
pub use context::{CallContext, CancellationToken};
pub use decode::{Json, NoContent, Raw, ResponseFormat};
pub use error::ApiError;
pub use http::{Headers, HttpMethod, HttpRequest, HttpResponse, RequestBody, ResponseBody};
pub use pagination::{Page, Pagination};
pub use request::ApiRequest;
pub use routes::{Route, RouteTable};
pub use transport::{LogTraceHook, ReqwestTransport, TraceHook, Transport, TransportError};
pub use types::{Build, BuildStatus, Plan, User, Worker};
