//! Typed ATC operations built on `Connection`.
//!
//! # Design
//! Each method only chooses a route, binds its parameters and picks the
//! response shape; dispatch, classification and decoding are shared.
//! Lookups by identifier are absence-tolerant and return `Ok(None)` on 404.
//! Operations that need the resource to exist (e.g. `find_team`) let
//! `ApiError::NotFound` propagate.

use std::time::Duration;

use chrono::NaiveDate;
use url::Url;

use crate::config::{ClientConfig, ConfigError};
use crate::connection::Connection;
use crate::context::CallContext;
use crate::decode::{Json, NoContent};
use crate::error::ApiError;
use crate::http::{Headers, ResponseBody};
use crate::pagination::{Page, Pagination};
use crate::request::ApiRequest;
use crate::routes::names;
use crate::types::{
    Build, BuildInputsOutputs, Check, Info, Pipeline, Plan, PublicBuildPlan, Team, User, Worker,
    WorkerArtifact,
};

#[derive(Debug, Clone)]
pub struct AtcClient {
    connection: Connection,
}

impl AtcClient {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(Connection::from_config(config)?))
    }

    pub fn url(&self) -> &Url {
        self.connection.url()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    // -----------------------------------------------------------------------
    // Builds
    // -----------------------------------------------------------------------

    pub async fn create_build(&self, plan: &Plan, ctx: &CallContext) -> Result<Build, ApiError> {
        let request = ApiRequest::new(names::CREATE_BUILD).json(plan)?;
        fetch(&self.connection, request, ctx).await
    }

    pub async fn create_job_build(
        &self,
        pipeline_name: &str,
        job_name: &str,
        ctx: &CallContext,
    ) -> Result<Build, ApiError> {
        require_name("pipeline", pipeline_name)?;
        require_name("job", job_name)?;
        let request = ApiRequest::new(names::CREATE_JOB_BUILD)
            .param("pipeline_name", pipeline_name)
            .param("job_name", job_name);
        fetch(&self.connection, request, ctx).await
    }

    pub async fn job_build(
        &self,
        pipeline_name: &str,
        job_name: &str,
        build_name: &str,
        ctx: &CallContext,
    ) -> Result<Option<Build>, ApiError> {
        require_name("pipeline", pipeline_name)?;
        require_name("job", job_name)?;
        let request = ApiRequest::new(names::GET_JOB_BUILD)
            .param("pipeline_name", pipeline_name)
            .param("job_name", job_name)
            .param("build_name", build_name);
        found(fetch(&self.connection, request, ctx).await)
    }

    pub async fn build(&self, build_id: &str, ctx: &CallContext) -> Result<Option<Build>, ApiError> {
        let request = ApiRequest::new(names::GET_BUILD).param("build_id", build_id);
        found(fetch(&self.connection, request, ctx).await)
    }

    pub async fn builds(
        &self,
        page: Page,
        ctx: &CallContext,
    ) -> Result<(Vec<Build>, Pagination), ApiError> {
        let request = ApiRequest::new(names::LIST_BUILDS).query_pairs(page.query_params());
        fetch_page(&self.connection, request, ctx).await
    }

    pub async fn abort_build(&self, build_id: &str, ctx: &CallContext) -> Result<(), ApiError> {
        let request = ApiRequest::new(names::ABORT_BUILD).param("build_id", build_id);
        self.connection.send::<NoContent>(request, ctx).await?;
        Ok(())
    }

    pub async fn build_plan(
        &self,
        build_id: &str,
        ctx: &CallContext,
    ) -> Result<Option<PublicBuildPlan>, ApiError> {
        let request = ApiRequest::new(names::GET_BUILD_PLAN).param("build_id", build_id);
        found(fetch(&self.connection, request, ctx).await)
    }

    pub async fn build_resources(
        &self,
        build_id: &str,
        ctx: &CallContext,
    ) -> Result<Option<BuildInputsOutputs>, ApiError> {
        let request = ApiRequest::new(names::BUILD_RESOURCES).param("build_id", build_id);
        found(fetch(&self.connection, request, ctx).await)
    }

    pub async fn list_build_artifacts(
        &self,
        build_id: &str,
        ctx: &CallContext,
    ) -> Result<Vec<WorkerArtifact>, ApiError> {
        let request = ApiRequest::new(names::LIST_BUILD_ARTIFACTS).param("build_id", build_id);
        fetch(&self.connection, request, ctx).await
    }

    /// Opens the build's server-sent event feed. Decoding the feed is left
    /// to the caller; dropping the body closes it.
    pub async fn build_events(
        &self,
        build_id: &str,
        ctx: &CallContext,
    ) -> Result<ResponseBody, ApiError> {
        let request = ApiRequest::new(names::BUILD_EVENTS)
            .param("build_id", build_id)
            .header("Accept", "text/event-stream");
        let (_, body) = self.connection.open_stream(request, ctx).await?;
        Ok(body)
    }

    // -----------------------------------------------------------------------
    // Workers
    // -----------------------------------------------------------------------

    pub async fn list_workers(&self, ctx: &CallContext) -> Result<Vec<Worker>, ApiError> {
        fetch(&self.connection, ApiRequest::new(names::LIST_WORKERS), ctx).await
    }

    /// Registers or heartbeats `worker`; `ttl` bounds how long the
    /// registration lasts without another heartbeat.
    pub async fn save_worker(
        &self,
        worker: &Worker,
        ttl: Option<Duration>,
        ctx: &CallContext,
    ) -> Result<Worker, ApiError> {
        let mut request = ApiRequest::new(names::REGISTER_WORKER).json(worker)?;
        if let Some(ttl) = ttl {
            request = request.query("ttl", format_ttl(ttl));
        }
        fetch(&self.connection, request, ctx).await
    }

    pub async fn land_worker(&self, worker_name: &str, ctx: &CallContext) -> Result<(), ApiError> {
        require_name("worker", worker_name)?;
        let request = ApiRequest::new(names::LAND_WORKER).param("worker_name", worker_name);
        self.connection.send::<NoContent>(request, ctx).await?;
        Ok(())
    }

    pub async fn prune_worker(&self, worker_name: &str, ctx: &CallContext) -> Result<(), ApiError> {
        require_name("worker", worker_name)?;
        let request = ApiRequest::new(names::PRUNE_WORKER).param("worker_name", worker_name);
        self.connection.send::<NoContent>(request, ctx).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Cluster, pipelines, teams, users
    // -----------------------------------------------------------------------

    pub async fn get_info(&self, ctx: &CallContext) -> Result<Info, ApiError> {
        fetch(&self.connection, ApiRequest::new(names::GET_INFO), ctx).await
    }

    pub async fn list_pipelines(&self, ctx: &CallContext) -> Result<Vec<Pipeline>, ApiError> {
        fetch(&self.connection, ApiRequest::new(names::LIST_PIPELINES), ctx).await
    }

    pub async fn list_teams(&self, ctx: &CallContext) -> Result<Vec<Team>, ApiError> {
        fetch(&self.connection, ApiRequest::new(names::LIST_TEAMS), ctx).await
    }

    /// Fetches a team that must exist; absence is an error.
    pub async fn find_team(&self, team_name: &str, ctx: &CallContext) -> Result<Team, ApiError> {
        require_name("team", team_name)?;
        let request = ApiRequest::new(names::GET_TEAM).param("team_name", team_name);
        fetch(&self.connection, request, ctx).await
    }

    pub async fn user_info(
        &self,
        ctx: &CallContext,
    ) -> Result<serde_json::Map<String, serde_json::Value>, ApiError> {
        fetch(&self.connection, ApiRequest::new(names::GET_USER), ctx).await
    }

    pub async fn check(&self, check_id: &str, ctx: &CallContext) -> Result<Option<Check>, ApiError> {
        let request = ApiRequest::new(names::GET_CHECK).param("check_id", check_id);
        found(fetch(&self.connection, request, ctx).await)
    }

    /// Downloads the `fly` binary for `platform`/`arch`. The body is handed
    /// back unread together with the response headers.
    pub async fn download_cli(
        &self,
        arch: &str,
        platform: &str,
        ctx: &CallContext,
    ) -> Result<(Headers, ResponseBody), ApiError> {
        let request = ApiRequest::new(names::DOWNLOAD_CLI)
            .query("arch", arch)
            .query("platform", platform);
        self.connection.open_stream(request, ctx).await
    }

    /// Users who have logged in on or after `since`.
    pub async fn list_active_users_since(
        &self,
        since: NaiveDate,
        ctx: &CallContext,
    ) -> Result<Vec<User>, ApiError> {
        let request = ApiRequest::new(names::LIST_ACTIVE_USERS_SINCE)
            .query("since", since.format("%Y-%m-%d").to_string());
        fetch(&self.connection, request, ctx).await
    }

    /// A handle scoped to `team_name`. Nothing is sent until an operation
    /// on the handle is called.
    pub fn team(&self, team_name: &str) -> TeamClient {
        TeamClient {
            name: team_name.to_string(),
            connection: self.connection.clone(),
        }
    }
}

/// Operations scoped to one team.
#[derive(Debug, Clone)]
pub struct TeamClient {
    name: String,
    connection: Connection,
}

impl TeamClient {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn pipelines(&self, ctx: &CallContext) -> Result<Vec<Pipeline>, ApiError> {
        let request = ApiRequest::new(names::LIST_TEAM_PIPELINES).param("team_name", &self.name);
        fetch(&self.connection, request, ctx).await
    }

    pub async fn pipeline(
        &self,
        pipeline_name: &str,
        ctx: &CallContext,
    ) -> Result<Option<Pipeline>, ApiError> {
        require_name("pipeline", pipeline_name)?;
        let request = ApiRequest::new(names::GET_PIPELINE)
            .param("team_name", &self.name)
            .param("pipeline_name", pipeline_name);
        found(fetch(&self.connection, request, ctx).await)
    }

    pub async fn builds(
        &self,
        page: Page,
        ctx: &CallContext,
    ) -> Result<(Vec<Build>, Pagination), ApiError> {
        let request = ApiRequest::new(names::LIST_TEAM_BUILDS)
            .param("team_name", &self.name)
            .query_pairs(page.query_params());
        fetch_page(&self.connection, request, ctx).await
    }
}

async fn fetch<T>(connection: &Connection, request: ApiRequest, ctx: &CallContext) -> Result<T, ApiError>
where
    T: serde::de::DeserializeOwned,
{
    Ok(connection.send::<Json<T>>(request, ctx).await?.into_value())
}

async fn fetch_page(
    connection: &Connection,
    request: ApiRequest,
    ctx: &CallContext,
) -> Result<(Vec<Build>, Pagination), ApiError> {
    let response = connection.send::<Json<Vec<Build>>>(request, ctx).await?;
    let pagination = response.pagination()?;
    Ok((response.into_value(), pagination))
}

/// Turns a 404 into `None`.
fn found<T>(result: Result<T, ApiError>) -> Result<Option<T>, ApiError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ApiError::NotFound { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}

fn require_name(kind: &'static str, value: &str) -> Result<(), ApiError> {
    if value.is_empty() {
        return Err(ApiError::NameRequired(kind));
    }
    Ok(())
}

/// Duration in the `300s` / `1500ms` form ATC parses.
fn format_ttl(ttl: Duration) -> String {
    if ttl.subsec_nanos() == 0 {
        format!("{}s", ttl.as_secs())
    } else {
        format!("{}ms", ttl.as_millis())
    }
}
