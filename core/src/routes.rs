//! Named routes: operation name → HTTP method + path template.
//!
//! # Design
//! A `RouteTable` is an ordinary value built once at startup and shared
//! behind an `Arc`; there is no global registry. Templates use `{param}`
//! placeholders that the request builder binds per call. Construction
//! validates templates so a malformed table is rejected before any request
//! is built from it.

use std::collections::HashMap;

use thiserror::Error;

use crate::error::ApiError;
use crate::http::HttpMethod;

/// Route names for the built-in ATC table.
pub mod names {
    pub const CREATE_BUILD: &str = "CreateBuild";
    pub const LIST_BUILDS: &str = "ListBuilds";
    pub const GET_BUILD: &str = "GetBuild";
    pub const BUILD_RESOURCES: &str = "BuildResources";
    pub const BUILD_EVENTS: &str = "BuildEvents";
    pub const ABORT_BUILD: &str = "AbortBuild";
    pub const GET_BUILD_PLAN: &str = "GetBuildPlan";
    pub const LIST_BUILD_ARTIFACTS: &str = "ListBuildArtifacts";
    pub const CREATE_JOB_BUILD: &str = "CreateJobBuild";
    pub const GET_JOB_BUILD: &str = "GetJobBuild";
    pub const LIST_WORKERS: &str = "ListWorkers";
    pub const REGISTER_WORKER: &str = "RegisterWorker";
    pub const LAND_WORKER: &str = "LandWorker";
    pub const PRUNE_WORKER: &str = "PruneWorker";
    pub const GET_INFO: &str = "GetInfo";
    pub const LIST_PIPELINES: &str = "ListPipelines";
    pub const LIST_TEAMS: &str = "ListTeams";
    pub const GET_TEAM: &str = "GetTeam";
    pub const GET_USER: &str = "GetUser";
    pub const GET_CHECK: &str = "GetCheck";
    pub const DOWNLOAD_CLI: &str = "DownloadCLI";
    pub const LIST_ACTIVE_USERS_SINCE: &str = "ListActiveUsersSince";
    pub const LIST_TEAM_PIPELINES: &str = "ListTeamPipelines";
    pub const GET_PIPELINE: &str = "GetPipeline";
    pub const LIST_TEAM_BUILDS: &str = "ListTeamBuilds";
}

const ATC_ROUTES: &[(&str, HttpMethod, &str)] = &[
    (names::CREATE_BUILD, HttpMethod::Post, "/api/v1/builds"),
    (names::LIST_BUILDS, HttpMethod::Get, "/api/v1/builds"),
    (names::GET_BUILD, HttpMethod::Get, "/api/v1/builds/{build_id}"),
    (names::BUILD_RESOURCES, HttpMethod::Get, "/api/v1/builds/{build_id}/resources"),
    (names::BUILD_EVENTS, HttpMethod::Get, "/api/v1/builds/{build_id}/events"),
    (names::ABORT_BUILD, HttpMethod::Put, "/api/v1/builds/{build_id}/abort"),
    (names::GET_BUILD_PLAN, HttpMethod::Get, "/api/v1/builds/{build_id}/plan"),
    (names::LIST_BUILD_ARTIFACTS, HttpMethod::Get, "/api/v1/builds/{build_id}/artifacts"),
    (
        names::CREATE_JOB_BUILD,
        HttpMethod::Post,
        "/api/v1/pipelines/{pipeline_name}/jobs/{job_name}/builds",
    ),
    (
        names::GET_JOB_BUILD,
        HttpMethod::Get,
        "/api/v1/pipelines/{pipeline_name}/jobs/{job_name}/builds/{build_name}",
    ),
    (names::LIST_WORKERS, HttpMethod::Get, "/api/v1/workers"),
    (names::REGISTER_WORKER, HttpMethod::Post, "/api/v1/workers"),
    (names::LAND_WORKER, HttpMethod::Put, "/api/v1/workers/{worker_name}/land"),
    (names::PRUNE_WORKER, HttpMethod::Put, "/api/v1/workers/{worker_name}/prune"),
    (names::GET_INFO, HttpMethod::Get, "/api/v1/info"),
    (names::LIST_PIPELINES, HttpMethod::Get, "/api/v1/pipelines"),
    (names::LIST_TEAMS, HttpMethod::Get, "/api/v1/teams"),
    (names::GET_TEAM, HttpMethod::Get, "/api/v1/teams/{team_name}"),
    (names::GET_USER, HttpMethod::Get, "/api/v1/user"),
    (names::GET_CHECK, HttpMethod::Get, "/api/v1/checks/{check_id}"),
    (names::DOWNLOAD_CLI, HttpMethod::Get, "/api/v1/cli"),
    (names::LIST_ACTIVE_USERS_SINCE, HttpMethod::Get, "/api/v1/users"),
    (names::LIST_TEAM_PIPELINES, HttpMethod::Get, "/api/v1/teams/{team_name}/pipelines"),
    (
        names::GET_PIPELINE,
        HttpMethod::Get,
        "/api/v1/teams/{team_name}/pipelines/{pipeline_name}",
    ),
    (names::LIST_TEAM_BUILDS, HttpMethod::Get, "/api/v1/teams/{team_name}/builds"),
];

/// Errors found while validating a route table.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteTableError {
    #[error("route '{0}' is registered more than once")]
    Duplicate(String),

    #[error("route '{name}' has a malformed path template '{path}'")]
    MalformedTemplate { name: String, path: String },
}

/// A single named route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub name: String,
    pub method: HttpMethod,
    pub path: String,
}

impl Route {
    pub fn new(name: impl Into<String>, method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method,
            path: path.into(),
        }
    }

    /// Placeholder names in template order.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut out = Vec::new();
        let mut rest = self.path.as_str();
        while let Some(open) = rest.find('{') {
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) => {
                    out.push(&after[..close]);
                    rest = &after[close + 1..];
                }
                None => break,
            }
        }
        out
    }

    fn template_is_well_formed(&self) -> bool {
        if !self.path.starts_with('/') {
            return false;
        }
        let mut open = false;
        let mut name_len = 0;
        for c in self.path.chars() {
            match c {
                '{' if open => return false,
                '{' => {
                    open = true;
                    name_len = 0;
                }
                '}' if !open || name_len == 0 => return false,
                '}' => open = false,
                '/' if open => return false,
                _ if open => name_len += 1,
                _ => {}
            }
        }
        !open
    }
}

/// Immutable name → route mapping.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: HashMap<String, Route>,
}

impl RouteTable {
    pub fn new(routes: impl IntoIterator<Item = Route>) -> Result<Self, RouteTableError> {
        let mut map = HashMap::new();
        for route in routes {
            if !route.template_is_well_formed() {
                return Err(RouteTableError::MalformedTemplate {
                    name: route.name,
                    path: route.path,
                });
            }
            if map.contains_key(&route.name) {
                return Err(RouteTableError::Duplicate(route.name));
            }
            map.insert(route.name.clone(), route);
        }
        Ok(Self { routes: map })
    }

    /// The built-in table for the ATC API.
    pub fn atc() -> Self {
        let routes = ATC_ROUTES
            .iter()
            .map(|(name, method, path)| Route::new(*name, *method, *path))
            .map(|route| (route.name.clone(), route))
            .collect();
        Self { routes }
    }

    pub fn resolve(&self, name: &str) -> Result<&Route, ApiError> {
        self.routes.get(name).ok_or_else(|| ApiError::RouteNotFound {
            route: name.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atc_table_resolves_every_name() {
        let table = RouteTable::atc();
        assert_eq!(table.len(), ATC_ROUTES.len());
        for (name, method, path) in ATC_ROUTES {
            let route = table.resolve(name).unwrap();
            assert_eq!(route.method, *method);
            assert_eq!(route.path, *path);
        }
    }

    #[test]
    fn atc_table_passes_validation() {
        let routes = ATC_ROUTES
            .iter()
            .map(|(name, method, path)| Route::new(*name, *method, *path));
        assert!(RouteTable::new(routes).is_ok());
    }

    #[test]
    fn unknown_route_fails() {
        let err = RouteTable::atc().resolve("DeleteUniverse").unwrap_err();
        assert!(matches!(err, ApiError::RouteNotFound { ref route } if route == "DeleteUniverse"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = RouteTable::new([
            Route::new("GetBuild", HttpMethod::Get, "/a"),
            Route::new("GetBuild", HttpMethod::Get, "/b"),
        ])
        .unwrap_err();
        assert_eq!(err, RouteTableError::Duplicate("GetBuild".to_string()));
    }

    #[test]
    fn malformed_templates_are_rejected() {
        for path in ["/builds/{id", "/builds/id}", "/builds/{}", "builds", "/a/{b/c}", "/{{x}}"] {
            let result = RouteTable::new([Route::new("R", HttpMethod::Get, path)]);
            assert!(
                matches!(result, Err(RouteTableError::MalformedTemplate { .. })),
                "{path} should be rejected"
            );
        }
    }

    #[test]
    fn placeholders_in_order() {
        let table = RouteTable::atc();
        let route = table.resolve(names::GET_JOB_BUILD).unwrap();
        assert_eq!(route.placeholders(), vec!["pipeline_name", "job_name", "build_name"]);
        assert!(table.resolve(names::GET_INFO).unwrap().placeholders().is_empty());
    }
}
