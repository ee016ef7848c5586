use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use sentinel_core::monitor::STATUS_OK;
use sentinel_core::{CheckRecord, Monitor, NewMonitor, ProbeKind};

use crate::error::ApiError;
use crate::state::AppState;

const MAX_CHECKS_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct CreateMonitorRequest {
    pub name: String,
    pub url: String,
    /// `http` (default), `keyword` or `port`.
    pub kind: Option<String>,
    pub keyword: Option<String>,
    pub port: Option<i64>,
    pub active: Option<bool>,
}

impl CreateMonitorRequest {
    fn into_new_monitor(self) -> Result<NewMonitor, ApiError> {
        let kind = ProbeKind::from_parts(
            self.kind.as_deref().unwrap_or("http"),
            self.keyword,
            self.port,
        )?;

        if !matches!(kind, ProbeKind::Port { .. }) && !is_valid_url(&self.url) {
            return Err(ApiError::BadRequest(format!("Invalid URL: {}", self.url)));
        }

        let monitor = NewMonitor::http(self.name.trim(), self.url.trim())
            .with_kind(kind)
            .with_active(self.active.unwrap_or(true));
        monitor.validate()?;
        Ok(monitor)
    }
}

/// A monitor with its recent history, oldest check first.
#[derive(Debug, Serialize)]
pub struct MonitorView {
    #[serde(flatten)]
    pub monitor: Monitor,
    pub up: Option<bool>,
    pub history: Vec<CheckRecord>,
}

impl MonitorView {
    fn new(monitor: Monitor, history: Vec<CheckRecord>) -> Self {
        let up = monitor.last_check.map(|c| c.status == STATUS_OK);
        Self {
            monitor,
            up,
            history,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChecksQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct ChecksResponse {
    pub monitor_id: i64,
    pub checks: Vec<CheckRecord>,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
    pub id: i64,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/monitors", post(create_monitor).get(list_monitors))
        .route("/monitors/{id}", get(get_monitor).delete(delete_monitor))
        .route("/monitors/{id}/checks", get(list_checks))
        .route("/monitors/{id}/check", post(trigger_check))
}

fn is_valid_url(s: &str) -> bool {
    url::Url::parse(s.trim())
        .map(|u| u.scheme() == "http" || u.scheme() == "https")
        .unwrap_or(false)
}

fn parse_monitor_id(id: &str) -> Result<i64, ApiError> {
    id.parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid monitor ID: {id}")))
}

async fn load_monitor(state: &AppState, id: i64) -> Result<Monitor, ApiError> {
    state
        .store
        .get_monitor(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Monitor {id} not found")))
}

async fn with_history(state: &AppState, monitor: Monitor) -> Result<MonitorView, ApiError> {
    let history = state
        .store
        .recent_checks(monitor.id, state.history_limit)
        .await?;
    Ok(MonitorView::new(monitor, history))
}

/// POST /api/v1/monitors
async fn create_monitor(
    State(state): State<AppState>,
    Json(body): Json<CreateMonitorRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let new = body.into_new_monitor()?;
    let monitor = state.store.add_monitor(new).await?;

    info!(monitor_id = monitor.id, url = %monitor.url, "Monitor created, running first check");
    drop(state.engine.trigger(monitor.id));

    Ok((StatusCode::CREATED, Json(MonitorView::new(monitor, Vec::new()))))
}

/// GET /api/v1/monitors
async fn list_monitors(State(state): State<AppState>) -> Result<Json<Vec<MonitorView>>, ApiError> {
    let monitors = state.store.list_monitors().await?;
    let mut views = Vec::with_capacity(monitors.len());
    for monitor in monitors {
        views.push(with_history(&state, monitor).await?);
    }
    Ok(Json(views))
}

/// GET /api/v1/monitors/:id
async fn get_monitor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MonitorView>, ApiError> {
    let id = parse_monitor_id(&id)?;
    let monitor = load_monitor(&state, id).await?;
    Ok(Json(with_history(&state, monitor).await?))
}

/// GET /api/v1/monitors/:id/checks?limit=N
async fn list_checks(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ChecksQuery>,
) -> Result<Json<ChecksResponse>, ApiError> {
    let id = parse_monitor_id(&id)?;
    let limit = query.limit.unwrap_or(state.history_limit);
    if limit == 0 || limit > MAX_CHECKS_LIMIT {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {MAX_CHECKS_LIMIT}"
        )));
    }

    load_monitor(&state, id).await?;
    let checks = state.store.recent_checks(id, limit).await?;
    Ok(Json(ChecksResponse {
        monitor_id: id,
        checks,
    }))
}

/// POST /api/v1/monitors/:id/check
async fn trigger_check(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_monitor_id(&id)?;
    load_monitor(&state, id).await?;

    drop(state.engine.trigger(id));

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "Check scheduled".into(),
            id,
        }),
    ))
}

/// DELETE /api/v1/monitors/:id
async fn delete_monitor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = parse_monitor_id(&id)?;

    if !state.store.delete_monitor(id).await? {
        return Err(ApiError::NotFound(format!("Monitor {id} not found")));
    }
    state.engine.forget(id);

    Ok(Json(MessageResponse {
        message: "Monitor and its history deleted".into(),
        id,
    }))
}

