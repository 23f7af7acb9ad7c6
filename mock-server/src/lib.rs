//! In-memory stand-in for the Concourse ATC API.
//!
//! # Design
//! All state sits in one `Atc` value behind `Arc<RwLock<..>>`. Only the
//! endpoints the client core dispatches to are served. Error bodies use the
//! ATC `{"errors":[...]}` envelope. Build listings page newest-first and
//! advertise neighbours through relative `Link` headers.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::info;

/// Team whose details are never visible to the mock's user.
pub const RESTRICTED_TEAM: &str = "ops";
pub const PIPELINE: &str = "main-pipeline";

const DEFAULT_PAGE_LIMIT: usize = 100;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Build {
    pub id: i64,
    pub team_name: String,
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_name: Option<String>,
    pub api_url: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: i64,
    pub name: String,
    pub paused: bool,
    pub public: bool,
    pub archived: bool,
    pub team_name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Team {
    pub id: i64,
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Check {
    pub id: i64,
    pub status: String,
    pub create_time: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub connector: String,
    pub last_login: i64,
}

#[derive(Debug, Default)]
pub struct Atc {
    builds: BTreeMap<i64, Build>,
    plans: BTreeMap<i64, Value>,
    workers: BTreeMap<String, Map<String, Value>>,
    pipelines: Vec<Pipeline>,
    teams: Vec<Team>,
    checks: BTreeMap<i64, Check>,
    /// Users with the day of their last login as `YYYY-MM-DD`.
    users: Vec<(User, String)>,
}

impl Atc {
    /// One pipeline, a public and a restricted team, two users and a
    /// finished check.
    pub fn seeded() -> Self {
        let mut atc = Atc {
            pipelines: vec![Pipeline {
                id: 1,
                name: PIPELINE.to_string(),
                paused: false,
                public: true,
                archived: false,
                team_name: "main".to_string(),
            }],
            teams: vec![
                Team { id: 1, name: "main".to_string() },
                Team { id: 2, name: RESTRICTED_TEAM.to_string() },
            ],
            ..Atc::default()
        };
        atc.users = vec![
            (
                User {
                    id: 1,
                    username: "admin".to_string(),
                    connector: "local".to_string(),
                    last_login: 1_710_028_800,
                },
                "2024-03-10".to_string(),
            ),
            (
                User {
                    id: 2,
                    username: "guest".to_string(),
                    connector: "github".to_string(),
                    last_login: 1_672_531_200,
                },
                "2023-01-01".to_string(),
            ),
        ];
        atc.checks.insert(
            1,
            Check {
                id: 1,
                status: "succeeded".to_string(),
                create_time: 1_700_000_000,
            },
        );
        atc
    }

    fn add_build(&mut self, job: Option<(&str, &str)>) -> Build {
        let id = self.builds.keys().next_back().map_or(1, |last| last + 1);
        let name = match job {
            Some((pipeline, job)) => {
                let count = self
                    .builds
                    .values()
                    .filter(|b| {
                        b.pipeline_name.as_deref() == Some(pipeline)
                            && b.job_name.as_deref() == Some(job)
                    })
                    .count();
                (count + 1).to_string()
            }
            None => id.to_string(),
        };
        let build = Build {
            id,
            team_name: "main".to_string(),
            name,
            status: "started".to_string(),
            job_name: job.map(|(_, j)| j.to_string()),
            pipeline_name: job.map(|(p, _)| p.to_string()),
            api_url: format!("/api/v1/builds/{id}"),
        };
        self.builds.insert(id, build.clone());
        build
    }
}

pub type Db = Arc<RwLock<Atc>>;

pub fn app() -> Router {
    app_with(Atc::seeded())
}

pub fn app_with(atc: Atc) -> Router {
    let db: Db = Arc::new(RwLock::new(atc));
    Router::new()
        .route("/api/v1/builds", get(list_builds).post(create_build))
        .route("/api/v1/builds/{build_id}", get(get_build))
        .route("/api/v1/builds/{build_id}/abort", put(abort_build))
        .route("/api/v1/builds/{build_id}/plan", get(build_plan))
        .route("/api/v1/builds/{build_id}/resources", get(build_resources))
        .route("/api/v1/builds/{build_id}/artifacts", get(build_artifacts))
        .route("/api/v1/builds/{build_id}/events", get(build_events))
        .route(
            "/api/v1/pipelines/{pipeline_name}/jobs/{job_name}/builds",
            post(create_job_build),
        )
        .route(
            "/api/v1/pipelines/{pipeline_name}/jobs/{job_name}/builds/{build_name}",
            get(get_job_build),
        )
        .route("/api/v1/workers", get(list_workers).post(register_worker))
        .route("/api/v1/workers/{worker_name}/land", put(land_worker))
        .route("/api/v1/workers/{worker_name}/prune", put(prune_worker))
        .route("/api/v1/info", get(info))
        .route("/api/v1/pipelines", get(list_pipelines))
        .route("/api/v1/teams", get(list_teams))
        .route("/api/v1/teams/{team_name}", get(get_team))
        .route("/api/v1/user", get(user))
        .route("/api/v1/checks/{check_id}", get(get_check))
        .route("/api/v1/cli", get(download_cli))
        .route("/api/v1/users", get(list_active_users))
        .route("/api/v1/teams/{team_name}/pipelines", get(list_team_pipelines))
        .route(
            "/api/v1/teams/{team_name}/pipelines/{pipeline_name}",
            get(get_team_pipeline),
        )
        .route("/api/v1/teams/{team_name}/builds", get(list_team_builds))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

type ApiResult<T> = Result<T, (StatusCode, Json<Value>)>;

fn errors(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "errors": [message.into()] })))
}

fn not_found(what: &str) -> (StatusCode, Json<Value>) {
    errors(StatusCode::NOT_FOUND, format!("{what} not found"))
}

// ---------------------------------------------------------------------------
// Builds
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub since: Option<i64>,
    #[serde(default)]
    pub until: Option<i64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

async fn list_builds(State(db): State<Db>, Query(page): Query<PageQuery>) -> Response {
    let atc = db.read().await;
    let builds: Vec<&Build> = atc.builds.values().collect();
    page_builds(&builds, &page, "/api/v1/builds")
}

/// Pages `builds` (ascending by id) newest-first and links neighbours
/// relative to `path`.
fn page_builds(builds: &[&Build], page: &PageQuery, path: &str) -> Response {
    let limit = page.limit.filter(|l| *l > 0).unwrap_or(DEFAULT_PAGE_LIMIT);
    let newest_first = builds.iter().rev();

    let selected: Vec<Build> = match (page.since.filter(|s| *s > 0), page.until.filter(|u| *u > 0)) {
        (Some(since), _) => {
            let mut newer: Vec<Build> = builds
                .iter()
                .filter(|b| b.id > since)
                .take(limit)
                .map(|b| (*b).clone())
                .collect();
            newer.reverse();
            newer
        }
        (None, Some(until)) => newest_first
            .filter(|b| b.id < until)
            .take(limit)
            .map(|b| (*b).clone())
            .collect(),
        (None, None) => newest_first.take(limit).map(|b| (*b).clone()).collect(),
    };

    let mut links = Vec::new();
    if let (Some(first), Some(last)) = (selected.first(), selected.last()) {
        if builds.iter().any(|b| b.id < last.id) {
            links.push(format!(r#"<{path}?until={}&limit={limit}>; rel="next""#, last.id));
        }
        if builds.iter().any(|b| b.id > first.id) {
            links.push(format!(r#"<{path}?since={}&limit={limit}>; rel="previous""#, first.id));
        }
    }

    let mut headers = HeaderMap::new();
    if !links.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&links.join(", ")) {
            headers.insert(header::LINK, value);
        }
    }
    (headers, Json(selected)).into_response()
}

async fn create_build(
    State(db): State<Db>,
    Json(plan): Json<Value>,
) -> ApiResult<(StatusCode, Json<Build>)> {
    if plan.get("id").and_then(Value::as_str).is_none() {
        return Err(errors(StatusCode::BAD_REQUEST, "plan must have an id"));
    }
    let mut atc = db.write().await;
    let build = atc.add_build(None);
    atc.plans.insert(build.id, plan);
    info!(build_id = build.id, "one-off build created");
    Ok((StatusCode::CREATED, Json(build)))
}

async fn get_build(State(db): State<Db>, Path(build_id): Path<i64>) -> ApiResult<Json<Build>> {
    let atc = db.read().await;
    atc.builds.get(&build_id).cloned().map(Json).ok_or_else(|| not_found("build"))
}

async fn abort_build(State(db): State<Db>, Path(build_id): Path<i64>) -> ApiResult<StatusCode> {
    let mut atc = db.write().await;
    let build = atc.builds.get_mut(&build_id).ok_or_else(|| not_found("build"))?;
    if matches!(build.status.as_str(), "pending" | "started") {
        build.status = "aborted".to_string();
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn build_plan(State(db): State<Db>, Path(build_id): Path<i64>) -> ApiResult<Json<Value>> {
    let atc = db.read().await;
    let plan = atc.plans.get(&build_id).ok_or_else(|| not_found("plan"))?;
    Ok(Json(json!({ "schema": "exec.v2", "plan": plan })))
}

async fn build_resources(
    State(db): State<Db>,
    Path(build_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let atc = db.read().await;
    if !atc.builds.contains_key(&build_id) {
        return Err(not_found("build"));
    }
    Ok(Json(json!({ "inputs": [], "outputs": [] })))
}

async fn build_artifacts(
    State(db): State<Db>,
    Path(build_id): Path<i64>,
) -> ApiResult<Json<Vec<Value>>> {
    let atc = db.read().await;
    if !atc.builds.contains_key(&build_id) {
        return Err(not_found("build"));
    }
    Ok(Json(Vec::new()))
}

async fn build_events(State(db): State<Db>, Path(build_id): Path<i64>) -> ApiResult<Response> {
    let atc = db.read().await;
    let build = atc.builds.get(&build_id).ok_or_else(|| not_found("build"))?;
    let status = json!({ "event": "status", "data": { "status": build.status } });
    let body = format!("id: 0\nevent: event\ndata: {status}\n\nid: 1\nevent: end\ndata:\n\n");
    Ok(([(header::CONTENT_TYPE, "text/event-stream")], body).into_response())
}

async fn create_job_build(
    State(db): State<Db>,
    Path((pipeline_name, job_name)): Path<(String, String)>,
) -> ApiResult<Json<Build>> {
    let mut atc = db.write().await;
    if !atc.pipelines.iter().any(|p| p.name == pipeline_name) {
        return Err(not_found("pipeline"));
    }
    let build = atc.add_build(Some((&pipeline_name, &job_name)));
    info!(build_id = build.id, pipeline = %pipeline_name, job = %job_name, "job build created");
    Ok(Json(build))
}

async fn get_job_build(
    State(db): State<Db>,
    Path((pipeline_name, job_name, build_name)): Path<(String, String, String)>,
) -> ApiResult<Json<Build>> {
    let atc = db.read().await;
    atc.builds
        .values()
        .find(|b| {
            b.pipeline_name.as_deref() == Some(pipeline_name.as_str())
                && b.job_name.as_deref() == Some(job_name.as_str())
                && b.name == build_name
        })
        .cloned()
        .map(Json)
        .ok_or_else(|| not_found("build"))
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TtlQuery {
    pub ttl: Option<String>,
}

fn valid_ttl(raw: &str) -> bool {
    let digits = raw
        .strip_suffix("ms")
        .or_else(|| raw.strip_suffix('s'))
        .unwrap_or_default();
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

async fn list_workers(State(db): State<Db>) -> Json<Vec<Map<String, Value>>> {
    Json(db.read().await.workers.values().cloned().collect())
}

async fn register_worker(
    State(db): State<Db>,
    Query(query): Query<TtlQuery>,
    Json(mut worker): Json<Map<String, Value>>,
) -> ApiResult<Json<Map<String, Value>>> {
    if let Some(ttl) = &query.ttl {
        if !valid_ttl(ttl) {
            return Err(errors(StatusCode::BAD_REQUEST, format!("malformed ttl: {ttl}")));
        }
    }
    let name = match worker.get("name").and_then(Value::as_str) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => return Err(errors(StatusCode::BAD_REQUEST, "worker name required")),
    };
    worker.insert("state".to_string(), Value::from("running"));
    db.write().await.workers.insert(name.clone(), worker.clone());
    info!(worker = %name, ttl = ?query.ttl, "worker registered");
    Ok(Json(worker))
}

async fn land_worker(State(db): State<Db>, Path(worker_name): Path<String>) -> ApiResult<StatusCode> {
    let mut atc = db.write().await;
    let worker = atc.workers.get_mut(&worker_name).ok_or_else(|| not_found("worker"))?;
    worker.insert("state".to_string(), Value::from("landing"));
    Ok(StatusCode::OK)
}

async fn prune_worker(State(db): State<Db>, Path(worker_name): Path<String>) -> ApiResult<StatusCode> {
    let mut atc = db.write().await;
    let state = atc
        .workers
        .get(&worker_name)
        .ok_or_else(|| not_found("worker"))?
        .get("state")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if state == "running" {
        return Err(errors(StatusCode::BAD_REQUEST, "cannot prune running worker"));
    }
    atc.workers.remove(&worker_name);
    Ok(StatusCode::OK)
}

// ---------------------------------------------------------------------------
// Cluster, pipelines, teams, users
// ---------------------------------------------------------------------------

async fn info() -> Json<Value> {
    Json(json!({
        "version": "7.11.0",
        "worker_version": "2.5",
        "external_url": "http://localhost:8080",
        "cluster_name": "mock",
    }))
}

async fn list_pipelines(State(db): State<Db>) -> Json<Vec<Pipeline>> {
    Json(db.read().await.pipelines.clone())
}

async fn list_teams(State(db): State<Db>) -> Json<Vec<Team>> {
    Json(db.read().await.teams.clone())
}

async fn get_team(State(db): State<Db>, Path(team_name): Path<String>) -> ApiResult<Json<Team>> {
    let atc = db.read().await;
    visible_team(&atc, &team_name).cloned().map(Json)
}

async fn user() -> Json<Value> {
    Json(json!({
        "sub": "mock-sub",
        "user_name": "admin",
        "is_admin": true,
        "teams": { "main": ["owner"] },
    }))
}

async fn get_check(State(db): State<Db>, Path(check_id): Path<i64>) -> ApiResult<Json<Check>> {
    let atc = db.read().await;
    atc.checks.get(&check_id).cloned().map(Json).ok_or_else(|| not_found("check"))
}

// ---------------------------------------------------------------------------
// CLI downloads, users, team-scoped views
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CliQuery {
    pub arch: Option<String>,
    pub platform: Option<String>,
}

async fn download_cli(Query(query): Query<CliQuery>) -> ApiResult<Response> {
    let (Some(arch), Some(platform)) = (query.arch, query.platform) else {
        return Err(errors(StatusCode::BAD_REQUEST, "arch and platform are required"));
    };
    if !matches!(platform.as_str(), "linux" | "darwin" | "windows")
        || !matches!(arch.as_str(), "amd64" | "arm64")
    {
        return Err(not_found("cli"));
    }
    let filename = if platform == "windows" { "fly.exe" } else { "fly" };
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={filename}"),
            ),
        ],
        format!("fly-{platform}-{arch}"),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct SinceQuery {
    pub since: Option<String>,
}

fn valid_date(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}

async fn list_active_users(
    State(db): State<Db>,
    Query(query): Query<SinceQuery>,
) -> ApiResult<Json<Vec<User>>> {
    let since = query.since.unwrap_or_default();
    if !valid_date(&since) {
        return Err(errors(StatusCode::BAD_REQUEST, format!("malformed since: {since}")));
    }
    let atc = db.read().await;
    // ISO dates order the same as strings.
    let users = atc
        .users
        .iter()
        .filter(|(_, day)| day.as_str() >= since.as_str())
        .map(|(user, _)| user.clone())
        .collect();
    Ok(Json(users))
}

/// Team lookup shared by the team-scoped views.
fn visible_team<'a>(atc: &'a Atc, team_name: &str) -> ApiResult<&'a Team> {
    let team = atc
        .teams
        .iter()
        .find(|t| t.name == team_name)
        .ok_or_else(|| not_found("team"))?;
    if team.name == RESTRICTED_TEAM {
        return Err(errors(
            StatusCode::FORBIDDEN,
            format!("not authorized to view team {team_name}"),
        ));
    }
    Ok(team)
}

async fn list_team_pipelines(
    State(db): State<Db>,
    Path(team_name): Path<String>,
) -> ApiResult<Json<Vec<Pipeline>>> {
    let atc = db.read().await;
    visible_team(&atc, &team_name)?;
    Ok(Json(
        atc.pipelines
            .iter()
            .filter(|p| p.team_name == team_name)
            .cloned()
            .collect(),
    ))
}

async fn get_team_pipeline(
    State(db): State<Db>,
    Path((team_name, pipeline_name)): Path<(String, String)>,
) -> ApiResult<Json<Pipeline>> {
    let atc = db.read().await;
    visible_team(&atc, &team_name)?;
    atc.pipelines
        .iter()
        .find(|p| p.team_name == team_name && p.name == pipeline_name)
        .cloned()
        .map(Json)
        .ok_or_else(|| not_found("pipeline"))
}

async fn list_team_builds(
    State(db): State<Db>,
    Path(team_name): Path<String>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Response> {
    let atc = db.read().await;
    visible_team(&atc, &team_name)?;
    let builds: Vec<&Build> = atc.builds.values().filter(|b| b.team_name == team_name).collect();
    Ok(page_builds(&builds, &page, &format!("/api/v1/teams/{team_name}/builds")))
}
