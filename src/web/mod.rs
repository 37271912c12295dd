//! HTTP API layer: webhook ingress, silence CRUD, health and status
//! endpoints. Routes are thin — all real logic lives in the component
//! modules; handlers only parse, authenticate, and delegate.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::ingress::{check_auth, parse_webhook};
use crate::model::{MatchOp, Matcher, Silence, SilenceStatus};
use crate::processor::AsyncProcessor;
use crate::silence::SharedSilenceEngine;
use crate::store::AlertStore;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct AppState {
    pub config: AppConfig,
    pub processor: Arc<AsyncProcessor>,
    pub silences: SharedSilenceEngine,
    pub store: Arc<AlertStore>,
    pub started_at: Instant,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhook/proxy", post(webhook_proxy))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/api/v2/status", get(status))
        .route("/api/v2/alerts", get(list_alerts))
        .route("/api/v2/silences", get(list_silences).post(create_silence))
        .route("/api/v2/silence/:id", get(get_silence).delete(delete_silence))
        .with_state(state)
}

#[derive(Serialize)]
struct WebhookAlertResult {
    fingerprint: String,
    accepted: bool,
    error: Option<String>,
}

#[derive(Serialize)]
struct WebhookProxyResponse {
    accepted: usize,
    rejected: usize,
    alerts: Vec<WebhookAlertResult>,
}

/// Submits every alert in the batch independently (spec §4.11/§6): one
/// alert failing to queue doesn't drop the rest of the batch. Returns 202
/// when every alert was accepted, 207 when some were rejected.
async fn webhook_proxy(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<(StatusCode, Json<WebhookProxyResponse>), AppError> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok());
    check_auth(state.config.ingress_token().as_deref(), token)?;

    let alerts = parse_webhook(&body)?;
    let mut results = Vec::with_capacity(alerts.len());
    let mut accepted = 0usize;
    let mut rejected = 0usize;

    for alert in alerts {
        let fingerprint = alert.fingerprint.clone();
        match state.processor.submit(alert).await {
            Ok(()) => {
                accepted += 1;
                results.push(WebhookAlertResult { fingerprint, accepted: true, error: None });
            }
            Err(err) => {
                rejected += 1;
                results.push(WebhookAlertResult {
                    fingerprint,
                    accepted: false,
                    error: Some(err.to_string()),
                });
            }
        }
    }

    let status = if rejected == 0 { StatusCode::ACCEPTED } else { StatusCode::MULTI_STATUS };
    Ok((status, Json(WebhookProxyResponse { accepted, rejected, alerts: results })))
}

#[derive(Serialize)]
struct HealthComponents {
    store: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    components: HealthComponents,
}

/// Liveness probe (spec §6): 503 when `AlertStore` can't be reached, since
/// every other component degrades gracefully but storage cannot.
async fn healthz(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse { status: "ok", components: HealthComponents { store: "ok" } }),
        ),
        Err(err) => {
            tracing::warn!(error = %err, "healthz: store unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse { status: "degraded", components: HealthComponents { store: "unreachable" } }),
            )
        }
    }
}

/// Prometheus text exposition for whatever's registered in the default
/// registry (ingestion counters, cache hit rate, publish outcomes). Metric
/// internals are out of scope; this is just the registration surface.
async fn metrics() -> Result<(StatusCode, String), AppError> {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buf = Vec::new();
    encoder
        .encode(&families, &mut buf)
        .map_err(|e| AppError::internal("metrics_encode", e.to_string()))?;
    let body = String::from_utf8(buf).map_err(|e| AppError::internal("metrics_encode", e.to_string()))?;
    Ok((StatusCode::OK, body))
}

#[derive(serde::Serialize)]
struct StatusResponse {
    version: &'static str,
    uptime_seconds: u64,
    config_hash: String,
    firing_alert_count: u64,
    silence_count: u64,
    by_status: std::collections::HashMap<String, u64>,
    by_severity: std::collections::HashMap<String, u64>,
    by_namespace: std::collections::HashMap<String, u64>,
    oldest_alert_at: Option<chrono::DateTime<chrono::Utc>>,
    newest_alert_at: Option<chrono::DateTime<chrono::Utc>>,
}

async fn status(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, AppError> {
    let stats = state.store.stats().await?;
    Ok(Json(StatusResponse {
        version: VERSION,
        uptime_seconds: state.started_at.elapsed().as_secs(),
        config_hash: config_hash(&state.config),
        firing_alert_count: stats.firing_alert_count,
        silence_count: stats.silence_count,
        by_status: stats.by_status,
        by_severity: stats.by_severity,
        by_namespace: stats.by_namespace,
        oldest_alert_at: stats.oldest_alert_at,
        newest_alert_at: stats.newest_alert_at,
    }))
}

#[derive(Deserialize)]
struct ListAlertsQuery {
    status: Option<String>,
    namespace: Option<String>,
    alert_name: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Serialize)]
struct ListAlertsResponse {
    alerts: Vec<crate::model::Alert>,
    total: u64,
}

/// Spec §4.2 `ListAlerts(filters, limit, offset) -> (page, total)` exposed
/// as a query-filtered, paginated GET, the same shape as the silences list.
async fn list_alerts(
    State(state): State<Arc<AppState>>,
    axum::extract::Query(query): axum::extract::Query<ListAlertsQuery>,
) -> Result<Json<ListAlertsResponse>, AppError> {
    let status = match query.status.as_deref() {
        Some("firing") => Some(crate::model::AlertStatus::Firing),
        Some("resolved") => Some(crate::model::AlertStatus::Resolved),
        Some(other) => {
            return Err(AppError::validation(
                "list_alerts",
                format!("unknown status filter '{other}'"),
            ))
        }
        None => None,
    };
    let filters = crate::store::AlertFilters {
        status,
        namespace: query.namespace,
        alert_name: query.alert_name,
    };
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let offset = query.offset.unwrap_or(0).max(0);

    let (alerts, total) = state.store.list_alerts(&filters, limit, offset).await?;
    Ok(Json(ListAlertsResponse { alerts, total }))
}

/// FNV-1a over the canonical YAML rendering of the config, same hashing
/// idiom as [`crate::fingerprint`]. Not a security digest, just enough to
/// tell an operator whether two servers are running the same config.
fn config_hash(config: &AppConfig) -> String {
    use std::hash::Hasher;
    let rendered = serde_yaml::to_string(config).unwrap_or_default();
    let mut hasher = fnv::FnvHasher::default();
    hasher.write(rendered.as_bytes());
    format!("{:016x}", hasher.finish())
}

/// Wire-format projection matching Alertmanager v2's camelCase `Silence`
/// schema, including the computed `status.state` AM clients expect and
/// this crate's internal model intentionally doesn't store (spec §6).
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SilenceResponse {
    id: Uuid,
    created_by: String,
    comment: String,
    starts_at: chrono::DateTime<chrono::Utc>,
    ends_at: chrono::DateTime<chrono::Utc>,
    matchers: Vec<Matcher>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
    status: SilenceStatusBody,
}

#[derive(Serialize)]
struct SilenceStatusBody {
    state: SilenceStatus,
}

fn to_response(silence: &Silence) -> SilenceResponse {
    SilenceResponse {
        id: silence.id,
        created_by: silence.created_by.clone(),
        comment: silence.comment.clone(),
        starts_at: silence.starts_at,
        ends_at: silence.ends_at,
        matchers: silence.matchers.clone(),
        created_at: silence.created_at,
        updated_at: silence.updated_at,
        status: SilenceStatusBody { state: silence.status_at(chrono::Utc::now()) },
    }
}

async fn list_silences(State(state): State<Arc<AppState>>) -> Json<Vec<SilenceResponse>> {
    Json(state.silences.list().iter().map(to_response).collect())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSilenceRequest {
    created_by: String,
    comment: String,
    starts_at: chrono::DateTime<chrono::Utc>,
    ends_at: chrono::DateTime<chrono::Utc>,
    matchers: Vec<Matcher>,
}

fn match_op_str(op: MatchOp) -> &'static str {
    match op {
        MatchOp::Eq => "=",
        MatchOp::NotEq => "!=",
        MatchOp::Regex => "=~",
        MatchOp::NotRegex => "!~",
    }
}

/// Deterministic id derived from the normalized payload (spec §8): two
/// identical silence requests hash to the same id, so the second POST
/// collides on the store's primary key instead of minting a duplicate row.
fn deterministic_silence_id(req: &CreateSilenceRequest) -> Uuid {
    let mut matcher_strings: Vec<String> = req
        .matchers
        .iter()
        .map(|m| format!("{}{}{}", m.name, match_op_str(m.op), m.value))
        .collect();
    matcher_strings.sort();

    let mut fields = std::collections::HashMap::new();
    fields.insert("created_by".to_string(), req.created_by.clone());
    fields.insert("comment".to_string(), req.comment.clone());
    fields.insert("starts_at".to_string(), req.starts_at.to_rfc3339());
    fields.insert("ends_at".to_string(), req.ends_at.to_rfc3339());
    fields.insert("matchers".to_string(), matcher_strings.join(","));

    let digest = crate::fingerprint::fingerprint(&fields);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, digest.as_bytes())
}

async fn create_silence(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSilenceRequest>,
) -> Result<Json<SilenceResponse>, AppError> {
    let id = deterministic_silence_id(&req);
    if state.silences.get(id).is_some() {
        return Err(AppError::storage_conflict(
            "create_silence",
            "an identical silence already exists",
        ));
    }

    let now = chrono::Utc::now();
    let silence = Silence {
        id,
        created_by: req.created_by,
        comment: req.comment,
        starts_at: req.starts_at,
        ends_at: req.ends_at,
        matchers: req.matchers,
        created_at: now,
        updated_at: now,
    };
    silence
        .validate()
        .map_err(|e| AppError::validation("create_silence", e))?;

    state.store.insert_silence(&silence).await?;
    state.silences.upsert(silence.clone());

    Ok(Json(to_response(&silence)))
}

async fn get_silence(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SilenceResponse>, AppError> {
    state
        .silences
        .get(id)
        .map(|s| Json(to_response(&s)))
        .ok_or_else(|| AppError::validation("get_silence", "silence not found"))
}

async fn delete_silence(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.store.delete_silence(id).await?;
    state.silences.remove(id);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    // Route wiring is exercised by the integration tests under tests/,
    // which spin up a real AppState against an in-memory store.
}
