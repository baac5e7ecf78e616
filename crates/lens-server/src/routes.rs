use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{delete, get, post};
use axum::Router;
use lens_analytics::ReportGenerator;
use lens_core::error::LensError;
use lens_core::types::{ConversationMessage, QueryFilter, QueryTrace, TimeWindow};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

type ApiResult<T> = Result<T, (StatusCode, String)>;

/// Map a core error onto an HTTP status. Internal details stay in the log.
fn api_error(err: LensError) -> (StatusCode, String) {
    match err {
        LensError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
        LensError::SessionNotFound(_) | LensError::SessionClosed => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        LensError::SessionBusy | LensError::Discarded => (StatusCode::CONFLICT, err.to_string()),
        LensError::DataUnavailable(msg) => {
            warn!("Data unavailable: {}", msg);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Transaction data is unavailable".into(),
            )
        }
        other => {
            error!("Request failed: {}", other);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".into())
        }
    }
}

// ── Health ──────────────────────────────────────────────────────────────

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

// ── Metrics ─────────────────────────────────────────────────────────────

pub fn metric_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/metrics/corridors", get(corridor_metrics))
        .route("/v1/metrics/segments", get(segment_metrics))
        .route("/v1/metrics/trend", get(trend_metrics))
        .route("/v1/metrics/amounts", get(amount_metrics))
        .route("/v1/metrics/weekdays", get(weekday_metrics))
        .route("/v1/metrics/summary", get(summary_metrics))
        .route("/v1/metrics/overview", get(overview))
        .route("/v1/metrics/report", get(report))
        .route("/v1/corridors", get(known_corridors))
}

/// `?corridor=USD_MXN&window=30d`; both optional.
#[derive(Debug, Default, Deserialize)]
pub struct MetricsQuery {
    #[serde(default)]
    corridor: Option<String>,
    #[serde(default)]
    window: Option<String>,
}

impl MetricsQuery {
    fn to_filter(&self) -> ApiResult<QueryFilter> {
        let window = match self.window.as_deref() {
            Some(raw) => raw
                .parse::<TimeWindow>()
                .map_err(|e| (StatusCode::BAD_REQUEST, e))?,
            None => TimeWindow::All,
        };
        Ok(QueryFilter::all()
            .with_corridor(self.corridor.as_deref())
            .with_window(window))
    }
}

async fn corridor_metrics(
    State(state): State<AppState>,
    Query(q): Query<MetricsQuery>,
) -> ApiResult<impl IntoResponse> {
    let rows = state
        .aggregator
        .compute_corridor_metrics(&q.to_filter()?)
        .await
        .map_err(api_error)?;
    Ok(Json(rows))
}

async fn segment_metrics(
    State(state): State<AppState>,
    Query(q): Query<MetricsQuery>,
) -> ApiResult<impl IntoResponse> {
    let rows = state
        .aggregator
        .compute_segment_metrics(&q.to_filter()?)
        .await
        .map_err(api_error)?;
    Ok(Json(rows))
}

async fn trend_metrics(
    State(state): State<AppState>,
    Query(q): Query<MetricsQuery>,
) -> ApiResult<impl IntoResponse> {
    let rows = state
        .aggregator
        .compute_trend(&q.to_filter()?)
        .await
        .map_err(api_error)?;
    Ok(Json(rows))
}

async fn amount_metrics(
    State(state): State<AppState>,
    Query(q): Query<MetricsQuery>,
) -> ApiResult<impl IntoResponse> {
    let rows = state
        .aggregator
        .compute_amount_distribution(&q.to_filter()?)
        .await
        .map_err(api_error)?;
    Ok(Json(rows))
}

async fn weekday_metrics(
    State(state): State<AppState>,
    Query(q): Query<MetricsQuery>,
) -> ApiResult<impl IntoResponse> {
    let rows = state
        .aggregator
        .compute_weekday_pattern(&q.to_filter()?)
        .await
        .map_err(api_error)?;
    Ok(Json(rows))
}

async fn summary_metrics(
    State(state): State<AppState>,
    Query(q): Query<MetricsQuery>,
) -> ApiResult<impl IntoResponse> {
    let summary = state
        .aggregator
        .compute_summary(&q.to_filter()?)
        .await
        .map_err(api_error)?;
    Ok(Json(summary))
}

/// Every dashboard view from one fetch of the filtered set.
async fn overview(
    State(state): State<AppState>,
    Query(q): Query<MetricsQuery>,
) -> ApiResult<impl IntoResponse> {
    let snapshot = state
        .aggregator
        .compute_dashboard(&q.to_filter()?)
        .await
        .map_err(api_error)?;
    Ok(Json(snapshot))
}

async fn report(
    State(state): State<AppState>,
    Query(q): Query<MetricsQuery>,
) -> ApiResult<impl IntoResponse> {
    let snapshot = state
        .aggregator
        .compute_dashboard(&q.to_filter()?)
        .await
        .map_err(api_error)?;
    Ok((
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        ReportGenerator::dashboard_report(&snapshot),
    ))
}

async fn known_corridors(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let corridors = state.aggregator.known_corridors().await.map_err(api_error)?;
    Ok(Json(corridors))
}

// ── Ask ─────────────────────────────────────────────────────────────────

pub fn ask_routes() -> Router<AppState> {
    Router::new().route("/v1/ask", post(ask))
}

#[derive(Debug, Deserialize)]
struct AskRequest {
    message: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct AskResponse {
    session_id: String,
    answer_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace: Option<QueryTrace>,
}

/// Submit a question, opening a new session when none is named.
async fn ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.message.trim().is_empty() {
        return Err(api_error(LensError::InvalidInput("question is empty".into())));
    }
    let sm = &state.session_manager;
    let session = match req.session_id.as_deref() {
        Some(id) => sm.get(id),
        None => sm.create_session("api"),
    }
    .map_err(api_error)?;

    let reply = session.submit(&req.message).await.map_err(api_error)?;

    Ok(Json(AskResponse {
        session_id: session.id().to_string(),
        answer_text: reply.content,
        trace: reply.trace,
    }))
}

// ── Sessions ────────────────────────────────────────────────────────────

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/sessions", get(list_sessions).post(create_session))
        .route("/v1/sessions/{id}", delete(delete_session))
        .route("/v1/sessions/{id}/messages", get(session_messages))
        .route("/v1/sessions/{id}/cancel", post(cancel_session))
}

async fn list_sessions(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let sessions = state.session_manager.list_sessions().map_err(api_error)?;
    Ok(Json(sessions))
}

#[derive(Debug, Default, Deserialize)]
struct CreateSessionRequest {
    #[serde(default)]
    name: Option<String>,
}

async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<impl IntoResponse> {
    let name = req.name.unwrap_or_else(|| "analyst".to_string());
    let session = state
        .session_manager
        .create_session(name)
        .map_err(api_error)?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": session.id(),
            "name": session.name(),
        })),
    ))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.session_manager.dispose(&id).map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn session_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let session = state.session_manager.get(&id).map_err(api_error)?;
    let messages: Vec<ConversationMessage> = session
        .recent_messages(state.session_manager.max_history())
        .map_err(api_error)?;
    Ok(Json(messages))
}

async fn cancel_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let session = state.session_manager.get(&id).map_err(api_error)?;
    let cancelled = session.cancel().map_err(api_error)?;
    Ok(Json(serde_json::json!({ "cancelled": cancelled })))
}
