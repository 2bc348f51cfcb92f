//! Dashboard/health plane (`SPEC_FULL.md` §4.8, component C8): the HTTP
//! surface operators and the scheduler's liveness/readiness probes talk to.
//! Built on a `TcpListener` + `watch`-channel graceful shutdown, serving
//! read-mostly aggregations over the cache, tracking, and failure-memory
//! layers plus a handful of write-side control endpoints (pause, trigger).

mod ratelimit;
pub mod suggestions;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use ratelimit::KeyedRateLimiter;
use sa_cache::TieredCacheStore;
use sa_clients::{SafetyAmpClient, SamsaraClient};
use sa_core::traits::{CacheStore, ErpReader};
use sa_orchestrator::{SyncType, TriggerQueue};
use sa_tracking::{ApiCallTracker, AuditLog, EventTracker, FailureMemory, RecentFilters};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const NORMAL_RATE_LIMIT: usize = 60;
const EXPENSIVE_RATE_LIMIT: usize = 10;
const PAUSE_RATE_LIMIT: usize = 5;
const RATE_WINDOW: Duration = Duration::from_secs(60);
const PAUSED_BY_RE_MAX_LEN: usize = 64;

pub struct AppState {
    pub cache: Arc<TieredCacheStore>,
    pub events: Arc<EventTracker>,
    pub failures: Arc<FailureMemory>,
    pub calls: Arc<ApiCallTracker>,
    pub safetyamp: Arc<SafetyAmpClient>,
    pub samsara: Option<Arc<SamsaraClient>>,
    pub erp: Arc<dyn ErpReader>,
    pub trigger_queue: Arc<TriggerQueue>,
    pub shutdown_requested: Arc<AtomicBool>,
    pub audit: AuditLog,
    pub dashboard_token: Option<String>,
    metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
    normal_limiter: KeyedRateLimiter,
    expensive_limiter: KeyedRateLimiter,
    pause_limiter: KeyedRateLimiter,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: Arc<TieredCacheStore>,
        events: Arc<EventTracker>,
        failures: Arc<FailureMemory>,
        calls: Arc<ApiCallTracker>,
        safetyamp: Arc<SafetyAmpClient>,
        samsara: Option<Arc<SamsaraClient>>,
        erp: Arc<dyn ErpReader>,
        trigger_queue: Arc<TriggerQueue>,
        shutdown_requested: Arc<AtomicBool>,
        dashboard_token: Option<String>,
        metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
    ) -> Self {
        Self {
            cache,
            events,
            failures,
            calls,
            safetyamp,
            samsara,
            erp,
            trigger_queue,
            shutdown_requested,
            audit: AuditLog::new(1000),
            dashboard_token,
            metrics_handle,
            normal_limiter: KeyedRateLimiter::new(NORMAL_RATE_LIMIT, RATE_WINDOW),
            expensive_limiter: KeyedRateLimiter::new(EXPENSIVE_RATE_LIMIT, RATE_WINDOW),
            pause_limiter: KeyedRateLimiter::new(PAUSE_RATE_LIMIT, RATE_WINDOW),
        }
    }

    fn shutting_down(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }
}

pub struct DashboardServer {
    pub addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<anyhow::Result<()>>,
}

impl DashboardServer {
    pub async fn start(state: Arc<AppState>, bind: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(bind).await?;
        let addr = listener.local_addr()?;
        let app = build_router(state);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut rx = shutdown_rx;
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async move {
                    while !*rx.borrow() {
                        if rx.changed().await.is_err() {
                            break;
                        }
                    }
                })
                .await?;
            Ok(())
        });

        Ok(Self {
            addr,
            shutdown_tx,
            join,
        })
    }

    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown_tx.send(true);
        self.join.await??;
        Ok(())
    }
}

/// Standalone `/metrics`-only listener for the metrics port (§4.8, §6:
/// "HTTP endpoints served on two ports ... metrics: default 9090"). Keeps
/// Prometheus scraping reachable independently of the dashboard's bearer
/// auth and per-route rate limits.
pub struct MetricsServer {
    pub addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<anyhow::Result<()>>,
}

impl MetricsServer {
    pub async fn start(state: Arc<AppState>, bind: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(bind).await?;
        let addr = listener.local_addr()?;
        let app = Router::new()
            .route("/metrics", get(metrics_endpoint))
            .with_state(state);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut rx = shutdown_rx;
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async move {
                    while !*rx.borrow() {
                        if rx.changed().await.is_err() {
                            break;
                        }
                    }
                })
                .await?;
            Ok(())
        });

        Ok(Self {
            addr,
            shutdown_tx,
            join,
        })
    }

    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown_tx.send(true);
        self.join.await??;
        Ok(())
    }
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/live", get(live))
        .route("/ready", get(ready))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/audit-log", get(audit_log))
        .route("/api/dashboard/sync-status", get(sync_status))
        .route("/api/dashboard/api-calls", get(api_calls))
        .route("/api/dashboard/error-suggestions", get(error_suggestions))
        .route("/api/dashboard/cache-stats", get(cache_stats))
        .route("/api/dashboard/failed-records", get(failed_records))
        .route("/api/dashboard/failed-records/:entity_type/:entity_id/retry", post(retry_failed_record))
        .route("/api/dashboard/sync-pause", get(sync_pause_status).post(sync_pause))
        .route("/api/dashboard/trigger-sync", post(trigger_sync))
        .with_state(state)
}

async fn live(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.shutting_down() {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "shutting_down" })))
    } else {
        (StatusCode::OK, Json(json!({ "status": "live" })))
    }
}

async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "shutting_down" })));
    }
    match state.erp.health_check().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ready" }))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not_ready", "error": e.to_string() })),
        ),
    }
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database_ok = state.erp.health_check().await.is_ok();
    let safetyamp_ok = state.safetyamp.ping_users().await.is_ok();
    let samsara_ok = match &state.samsara {
        Some(client) => client.ping_vehicles().await.is_ok(),
        None => true,
    };
    let cache_ok = state.cache.get_pause_flag().await.is_ok();

    let failed_count = state.failures.list_all().await.map(|v| v.len()).unwrap_or(0);
    let recent_errors: Vec<Value> = state
        .events
        .errors_since(24.0)
        .into_iter()
        .rev()
        .take(5)
        .map(|e| {
            json!({
                "entity_type": e.entity_type,
                "entity_id": e.entity_id,
                "message": e.error_message,
                "timestamp": e.timestamp,
            })
        })
        .collect();

    let status = if !database_ok {
        "unhealthy"
    } else if !safetyamp_ok || !samsara_ok || !cache_ok {
        "degraded"
    } else {
        "healthy"
    };

    let body = json!({
        "status": status,
        "checks": {
            "database": database_ok,
            "safetyamp": safetyamp_ok,
            "samsara": samsara_ok,
            "cache": cache_ok,
        },
        "sync_in_progress": state.events.sync_in_progress().await,
        "failed_sync_count": failed_count,
        "last_errors": recent_errors,
    });

    let code = if status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(body))
}

async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, state.metrics_handle.render())
}

async fn audit_log(headers: HeaderMap, State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    require_auth(&headers, &state)?;
    let events = state.audit.recent(1000);
    Ok(Json(json!({ "events": events })))
}

async fn sync_status(headers: HeaderMap, State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    require_auth(&headers, &state)?;
    rate_limit(&headers, &state, false).await?;
    let sessions = state.events.recent_sessions(10).await.map_err(ApiError::internal)?;
    Ok(Json(json!({
        "sync_in_progress": state.events.sync_in_progress().await,
        "recent_sessions": sessions,
    })))
}

#[derive(Deserialize, Default)]
struct ApiCallsQuery {
    limit: Option<usize>,
    service: Option<String>,
    method: Option<String>,
    errors_only: Option<bool>,
    correlation_id: Option<String>,
}

async fn api_calls(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Query(q): Query<ApiCallsQuery>,
) -> ApiResult<Json<Value>> {
    require_auth(&headers, &state)?;
    rate_limit(&headers, &state, false).await?;
    let limit = q.limit.unwrap_or(100).min(1000);
    let filters = RecentFilters {
        service: q.service.as_deref(),
        method: q.method.as_deref(),
        errors_only: q.errors_only.unwrap_or(false),
        correlation_id: q.correlation_id.as_deref(),
    };
    let records = state.calls.recent(limit, filters).await;
    let stats = state.calls.stats().await;
    Ok(Json(json!({ "records": records, "stats": stats })))
}

async fn error_suggestions(headers: HeaderMap, State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    require_auth(&headers, &state)?;
    rate_limit(&headers, &state, false).await?;
    let errors = state.events.errors_since(24.0);
    let failures = state.failures.list_all().await.map_err(ApiError::internal)?;
    let items = suggestions::build_suggestions(&errors, &failures);
    Ok(Json(json!({ "suggestions": items })))
}

async fn cache_stats(headers: HeaderMap, State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    require_auth(&headers, &state)?;
    rate_limit(&headers, &state, false).await?;
    let mut metadata = HashMap::new();
    for name in [
        "cluster_map",
        "role_map",
        "title_map",
        "existing_users",
        "home_office_map",
        "clusters_raw",
        "sites_raw",
        "assets_raw",
    ] {
        if let Ok(Some(meta)) = state.cache.metadata(name, None).await {
            metadata.insert(name.to_string(), meta);
        }
    }
    Ok(Json(json!({ "caches": metadata })))
}

#[derive(Deserialize, Default)]
struct FailedRecordsQuery {
    page: Option<usize>,
    page_size: Option<usize>,
    entity_type: Option<String>,
}

async fn failed_records(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Query(q): Query<FailedRecordsQuery>,
) -> ApiResult<Json<Value>> {
    require_auth(&headers, &state)?;
    rate_limit(&headers, &state, false).await?;
    let mut all = state.failures.list_all().await.map_err(ApiError::internal)?;
    if let Some(entity_type) = &q.entity_type {
        all.retain(|r| &r.entity_type == entity_type);
    }
    let page = q.page.unwrap_or(1).max(1);
    let page_size = q.page_size.unwrap_or(50).clamp(1, 200);
    let total = all.len();
    let start = (page - 1) * page_size;
    let page_items: Vec<_> = all.into_iter().skip(start).take(page_size).collect();
    Ok(Json(json!({
        "records": page_items,
        "page": page,
        "page_size": page_size,
        "total": total,
    })))
}

async fn retry_failed_record(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Path((entity_type, entity_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    require_auth(&headers, &state)?;
    rate_limit(&headers, &state, true).await?;
    let marked = state
        .failures
        .mark_for_retry(&entity_type, &entity_id)
        .await
        .map_err(ApiError::internal)?;
    state.audit.record(sa_core::models::AuditEvent {
        timestamp: Utc::now().timestamp() as f64,
        actor: None,
        action: "retry_failed_record".into(),
        path: format!("/api/dashboard/failed-records/{entity_type}/{entity_id}/retry"),
        body_summary: None,
    });
    Ok(Json(json!({ "marked_for_retry": marked })))
}

#[derive(Deserialize)]
struct SyncPauseRequest {
    paused: bool,
    paused_by: Option<String>,
}

fn paused_by_re() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^[\w@.\-]{0,64}$").unwrap())
}

/// `GET /api/dashboard/sync-pause` (§8 scenario S6): current pause state plus
/// who paused it and when.
async fn sync_pause_status(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Value>> {
    require_auth(&headers, &state)?;
    rate_limit(&headers, &state, false).await?;
    let paused = state.cache.get_pause_flag().await.map_err(ApiError::internal)?;
    let metadata = state.cache.pause_metadata().await.map_err(ApiError::internal)?;
    let (paused_by, paused_at) = match &metadata {
        Some(m) => (m.get("paused_by").cloned(), m.get("paused_at").cloned()),
        None => (None, None),
    };
    Ok(Json(json!({
        "paused": paused,
        "paused_by": paused_by,
        "paused_at": paused_at,
    })))
}

async fn sync_pause(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Json(req): Json<SyncPauseRequest>,
) -> ApiResult<Json<Value>> {
    require_auth(&headers, &state)?;
    let key = rate_limit_key(&headers);
    if !state.pause_limiter.try_acquire(&key).await {
        return Err(ApiError::too_many_requests("rate limit exceeded"));
    }

    let paused_by = match &req.paused_by {
        Some(value) => {
            if value.len() > PAUSED_BY_RE_MAX_LEN || !paused_by_re().is_match(value) {
                return Err(ApiError::bad_request("invalid paused_by"));
            }
            Some(value.as_str())
        }
        None => None,
    };

    state
        .cache
        .set_pause_flag(req.paused, paused_by)
        .await
        .map_err(ApiError::internal)?;

    state.audit.record(sa_core::models::AuditEvent {
        timestamp: Utc::now().timestamp() as f64,
        actor: paused_by.map(str::to_string),
        action: "sync_pause".into(),
        path: "/api/dashboard/sync-pause".into(),
        body_summary: Some(json!({ "paused": req.paused }).to_string()),
    });

    Ok(Json(json!({ "paused": req.paused })))
}

#[derive(Deserialize)]
struct TriggerSyncRequest {
    sync_type: String,
}

async fn trigger_sync(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Json(req): Json<TriggerSyncRequest>,
) -> ApiResult<Json<Value>> {
    require_auth(&headers, &state)?;
    rate_limit(&headers, &state, true).await?;

    let Some(sync_type) = SyncType::parse(&req.sync_type) else {
        return Err(ApiError::bad_request("unknown sync_type"));
    };
    state.trigger_queue.enqueue(sync_type).await;

    state.audit.record(sa_core::models::AuditEvent {
        timestamp: Utc::now().timestamp() as f64,
        actor: None,
        action: "trigger_sync".into(),
        path: "/api/dashboard/trigger-sync".into(),
        body_summary: Some(req.sync_type.clone()),
    });

    Ok(Json(json!({ "queued": req.sync_type })))
}

/// Keys the per-caller rate limiter off the bearer token (or "anonymous"
/// when auth is disabled). Never logged or echoed back to the client.
fn rate_limit_key(headers: &HeaderMap) -> String {
    headers
        .get("x-dashboard-token")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| "anonymous".to_string())
}

fn require_auth(headers: &HeaderMap, state: &AppState) -> ApiResult<()> {
    let Some(expected) = &state.dashboard_token else {
        return Ok(());
    };
    let provided = headers
        .get("x-dashboard-token")
        .and_then(|v| v.to_str().ok());
    if provided == Some(expected.as_str()) {
        return Ok(());
    }
    Err(ApiError::unauthorized("missing or invalid dashboard token"))
}

async fn rate_limit(headers: &HeaderMap, state: &AppState, expensive: bool) -> ApiResult<()> {
    let key = rate_limit_key(headers);
    let limiter = if expensive {
        &state.expensive_limiter
    } else {
        &state.normal_limiter
    };
    if limiter.try_acquire(&key).await {
        Ok(())
    } else {
        Err(ApiError::too_many_requests("rate limit exceeded"))
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn unauthorized(message: &str) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.to_string(),
        }
    }

    fn bad_request(message: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.to_string(),
        }
    }

    fn too_many_requests(message: &str) -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: message.to_string(),
        }
    }

    fn internal<E: std::fmt::Display>(err: E) -> Self {
        tracing::error!(error = %err, "dashboard internal error");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paused_by_pattern_rejects_invalid_characters() {
        assert!(paused_by_re().is_match("ops@example.com"));
        assert!(!paused_by_re().is_match("bad value!"));
    }
}
