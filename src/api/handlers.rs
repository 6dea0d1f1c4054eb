use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::StatusCode,
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::AppState;
use crate::alerts::{Alert, EvaluationReport, MetricSnapshot};
use crate::notifications::NotificationChannel;
use crate::realtime::handle_socket;
use crate::rules::{Rule, StoreError};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (status, Json(ErrorResponse { error: error.into() }))
}

fn store_error(e: StoreError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &e {
        StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::DuplicateId { .. } => StatusCode::CONFLICT,
        StoreError::IdMismatch { .. } => StatusCode::BAD_REQUEST,
        StoreError::InvalidDefaults { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e.to_string())
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_alerts: usize,
    pub realtime_clients: usize,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_alerts: state.engine.alerts().active_count().await,
        realtime_clients: state.engine.hub().client_count().await,
    })
}

// ===== WebSocket Handler =====

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let hub = state.engine.hub().clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

// ===== Metric Ingestion =====

pub async fn ingest_metrics(
    State(state): State<AppState>,
    Path(source): Path<String>,
    Json(metrics): Json<Value>,
) -> Json<EvaluationReport> {
    let report = state.engine.ingest(MetricSnapshot::new(source, metrics)).await;
    Json(report)
}

// ===== Alerts =====

#[derive(Debug, Deserialize)]
pub struct HistoryQueryParams {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    100
}

#[derive(Debug, Default, Deserialize)]
pub struct ResolveRequest {
    pub reason: Option<String>,
}

pub async fn get_active_alerts(State(state): State<AppState>) -> Json<Vec<Alert>> {
    Json(state.engine.active_alerts().await)
}

pub async fn get_alert_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryQueryParams>,
) -> Json<Vec<Alert>> {
    Json(state.engine.alert_history(params.limit).await)
}

pub async fn acknowledge_alert(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Alert> {
    state
        .engine
        .acknowledge(&id)
        .await
        .map(Json)
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "Alert not found"))
}

pub async fn resolve_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ResolveRequest>>,
) -> ApiResult<Alert> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    state
        .engine
        .resolve(&id, request.reason.as_deref())
        .await
        .map(Json)
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "Alert not found"))
}

// ===== Rules =====

pub async fn get_rules(State(state): State<AppState>) -> Json<Vec<Rule>> {
    Json(state.engine.rules().rules().await)
}

pub async fn get_rule(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Rule> {
    state
        .engine
        .rules()
        .get_rule(&id)
        .await
        .map(Json)
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "Rule not found"))
}

pub async fn create_rule(
    State(state): State<AppState>,
    Json(rule): Json<Rule>,
) -> Result<(StatusCode, Json<Rule>), (StatusCode, Json<ErrorResponse>)> {
    let rule = state.engine.add_rule(rule).await.map_err(store_error)?;
    Ok((StatusCode::CREATED, Json(rule)))
}

pub async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(rule): Json<Rule>,
) -> ApiResult<Rule> {
    state.engine.update_rule(&id, rule).await.map(Json).map_err(store_error)
}

pub async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    state.engine.delete_rule(&id).await.map_err(store_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// ===== Channels =====

pub async fn get_channels(State(state): State<AppState>) -> Json<Vec<NotificationChannel>> {
    Json(state.engine.rules().channels().await)
}

pub async fn get_channel(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<NotificationChannel> {
    state
        .engine
        .rules()
        .get_channel(&id)
        .await
        .map(Json)
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "Channel not found"))
}

pub async fn create_channel(
    State(state): State<AppState>,
    Json(channel): Json<NotificationChannel>,
) -> Result<(StatusCode, Json<NotificationChannel>), (StatusCode, Json<ErrorResponse>)> {
    let channel = state.engine.add_channel(channel).await.map_err(store_error)?;
    Ok((StatusCode::CREATED, Json(channel)))
}

pub async fn update_channel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(channel): Json<NotificationChannel>,
) -> ApiResult<NotificationChannel> {
    state
        .engine
        .update_channel(&id, channel)
        .await
        .map(Json)
        .map_err(store_error)
}

pub async fn delete_channel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    state.engine.delete_channel(&id).await.map_err(store_error)?;
    Ok(StatusCode::NO_CONTENT)
}
