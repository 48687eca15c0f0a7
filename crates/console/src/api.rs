//! HTTP API for classification, model and meter management, lookups,
//! health checks and Prometheus metrics

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use flowmeter_lib::{
    classifier::{ModelManager, StatsOutcome, StatsQuery},
    health::{components, ComponentStatus, HealthRegistry},
    lookup::{AsnDatabase, DnsServerSet, LoadReport, VpnRangeSet, DEFAULT_BATCH_SIZE},
    meter::MeterService,
    models::{ClassificationRequest, MeterPolicyDraft},
    observability::{ConsoleMetrics, StructuredLogger},
    ConsoleError, ConsoleResult, Pipeline,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: ConsoleMetrics,
    pub logger: StructuredLogger,
    pub manager: Arc<ModelManager>,
    pub meters: Arc<MeterService>,
    pub pipeline: Arc<Pipeline>,
    pub lookups: LookupSets,
}

/// The reloadable reference sets
#[derive(Clone)]
pub struct LookupSets {
    pub dns: Arc<DnsServerSet>,
    pub vpn: Arc<VpnRangeSet>,
    pub asn: Arc<AsnDatabase>,
}

/// Which lookup set a bulk load targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    Dns,
    Vpn,
    Asn,
}

impl LookupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupKind::Dns => "dns",
            LookupKind::Vpn => "vpn",
            LookupKind::Asn => "asn",
        }
    }
}

impl LookupSets {
    /// Replace one set from a file on the blocking pool. Readers keep the
    /// previous set until the new one is fully loaded.
    pub async fn load(
        &self,
        kind: LookupKind,
        path: PathBuf,
        batch_size: usize,
    ) -> ConsoleResult<usize> {
        let sets = self.clone();
        tokio::task::spawn_blocking(move || match kind {
            LookupKind::Dns => sets.dns.bulk_load_path(&path, batch_size),
            LookupKind::Vpn => sets.vpn.bulk_load_path(&path, batch_size),
            LookupKind::Asn => sets.asn.bulk_load_path(&path, batch_size),
        })
        .await
        .map_err(|e| ConsoleError::Internal(format!("lookup load task failed: {}", e)))?
    }

    pub fn len(&self, kind: LookupKind) -> usize {
        match kind {
            LookupKind::Dns => self.dns.len(),
            LookupKind::Vpn => self.vpn.len(),
            LookupKind::Asn => self.asn.len(),
        }
    }
}

/// Error body: `{"error": ..., "code": ...}` with the mapped status
pub struct ApiError(ConsoleError);

impl From<ConsoleError> for ApiError {
    fn from(err: ConsoleError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(code = self.0.code(), error = %self.0, "Request failed");
        }
        let body = json!({
            "error": self.0.to_string(),
            "code": self.0.code(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Health check response - returns 200 if healthy, 503 if degraded/unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

async fn classify(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ClassificationRequest>,
) -> ApiResult<impl IntoResponse> {
    let response = state.pipeline.handle(&request).await?;
    Ok(Json(response))
}

async fn list_models(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.manager.list().await?))
}

#[derive(Debug, Deserialize)]
struct ActivateRequest {
    name: String,
}

async fn activate_model(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ActivateRequest>,
) -> ApiResult<impl IntoResponse> {
    match state.manager.activate(&request.name).await {
        Ok(()) => {
            state
                .health_registry
                .set_healthy(components::MODEL_MANAGER)
                .await;
            Ok(Json(json!({ "active": request.name })))
        }
        Err(e) => {
            if matches!(e, ConsoleError::Load(_) | ConsoleError::Timeout(_)) {
                state
                    .health_registry
                    .set_degraded(components::MODEL_MANAGER, e.to_string())
                    .await;
            }
            Err(e.into())
        }
    }
}

async fn load_model(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.manager.load(&name).await?;
    Ok(Json(json!({ "name": name, "loaded": true })))
}

async fn unload_model(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.manager.unload(&name).await?;
    Ok(Json(json!({ "name": name, "loaded": false })))
}

async fn model_categories(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.manager.categories(&name).await?))
}

async fn list_meters(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.meters.list().await)
}

async fn get_meter(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.meters.get(id).await?))
}

async fn create_meter(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<MeterPolicyDraft>,
) -> ApiResult<impl IntoResponse> {
    let policy = state.meters.create(draft).await?;
    Ok((StatusCode::CREATED, Json(policy)))
}

async fn update_meter(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(draft): Json<MeterPolicyDraft>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.meters.update(id, draft).await?))
}

async fn delete_meter(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.meters.delete(id).await?))
}

async fn query_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> impl IntoResponse {
    Json(state.manager.query_stats(&query).await)
}

/// Drain live counters now instead of waiting for the worker
async fn snapshot_stats(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let body = match state.manager.snapshot_and_reset_stats().await? {
        StatsOutcome::Persisted(stats) => json!({ "status": "persisted", "stats": stats }),
        StatsOutcome::Skipped => json!({ "status": "skipped", "stats": [] }),
    };
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
struct LoadRequest {
    path: PathBuf,
    #[serde(default)]
    batch_size: Option<usize>,
}

async fn load_lookup(state: &AppState, kind: LookupKind, request: LoadRequest) -> Response {
    let batch_size = request.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
    info!(set = kind.as_str(), path = %request.path.display(), batch_size, "Bulk loading lookup set");

    let result = state
        .lookups
        .load(kind, request.path, batch_size)
        .await;
    let report = LoadReport::from_result(kind.as_str(), &result);

    state
        .metrics
        .set_lookup_entries(kind.as_str(), state.lookups.len(kind));
    state
        .logger
        .log_lookup_reloaded(kind.as_str(), report.success, report.count, &report.message);

    let status = match &result {
        Ok(_) => {
            state.health_registry.set_healthy(components::LOOKUPS).await;
            StatusCode::OK
        }
        Err(e) => {
            state
                .health_registry
                .set_degraded(components::LOOKUPS, report.message.clone())
                .await;
            StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        }
    };
    (status, Json(report)).into_response()
}

async fn load_dns(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoadRequest>,
) -> Response {
    load_lookup(&state, LookupKind::Dns, request).await
}

async fn load_vpn(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoadRequest>,
) -> Response {
    load_lookup(&state, LookupKind::Vpn, request).await
}

async fn load_asn(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoadRequest>,
) -> Response {
    load_lookup(&state, LookupKind::Asn, request).await
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/classify", post(classify))
        .route("/api/v1/models", get(list_models))
        .route("/api/v1/models/active", put(activate_model))
        .route("/api/v1/models/:name/load", post(load_model))
        .route("/api/v1/models/:name/unload", post(unload_model))
        .route("/api/v1/models/:name/categories", get(model_categories))
        .route("/api/v1/meters", get(list_meters).post(create_meter))
        .route(
            "/api/v1/meters/:id",
            get(get_meter).put(update_meter).delete(delete_meter),
        )
        .route("/api/v1/stats", get(query_stats))
        .route("/api/v1/stats/snapshot", post(snapshot_stats))
        .route("/api/v1/lookups/dns/load", post(load_dns))
        .route("/api/v1/lookups/vpn/load", post(load_vpn))
        .route("/api/v1/lookups/asn/load", post(load_asn))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
