//! Integration tests for the console API endpoints

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use flowmeter_console::api::{create_router, AppState, LookupSets};
use flowmeter_lib::{
    classifier::{Disambiguator, ManagerConfig, ModelManager, StatsRepository},
    controller::{ControllerApi, FlowCompiler},
    health::{components, HealthRegistry},
    lookup::{AsnDatabase, DnsServerSet, VpnRangeSet},
    meter::{MeterRepository, MeterService},
    models::{ModelBackend, ModelConfiguration},
    observability::{ConsoleMetrics, StructuredLogger},
    state::ModelStateStore,
    ConsoleError, ConsoleResult, Pipeline,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// Controller that accepts every write unless told to reject meters
#[derive(Default)]
struct StubController {
    reject_meters: AtomicBool,
}

#[async_trait]
impl ControllerApi for StubController {
    async fn put_meter(
        &self,
        _controller: &str,
        _switch_id: &str,
        _meter_id: u32,
        _body: &Value,
    ) -> ConsoleResult<u16> {
        if self.reject_meters.load(Ordering::SeqCst) {
            return Err(ConsoleError::Upstream {
                status: 400,
                body: "bad meter".into(),
            });
        }
        Ok(201)
    }

    async fn delete_meter(
        &self,
        _controller: &str,
        _switch_id: &str,
        _meter_id: u32,
    ) -> ConsoleResult<u16> {
        Ok(200)
    }

    async fn put_flow(
        &self,
        _controller: &str,
        _switch_id: &str,
        _table_id: u8,
        _flow_id: &str,
        _body: &Value,
    ) -> ConsoleResult<u16> {
        Ok(201)
    }
}

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    controller: Arc<StubController>,
    dir: TempDir,
}

/// Console with one linear model, "web", that always answers Netflix
async fn setup_test_app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let artifact = dir.path().join("web.json");
    let model = json!({
        "weights": [[0.0, 0.0], [0.0, 0.0]],
        "bias": [0.95f32.ln(), 0.05f32.ln()],
    });
    std::fs::write(&artifact, model.to_string()).unwrap();

    let health_registry = HealthRegistry::new();
    health_registry.register(components::MODEL_MANAGER).await;
    health_registry.register(components::LOOKUPS).await;

    let metrics = ConsoleMetrics::new();
    let logger = StructuredLogger::new("api-test");

    let lookups = LookupSets {
        dns: Arc::new(DnsServerSet::new()),
        vpn: Arc::new(VpnRangeSet::new()),
        asn: Arc::new(AsnDatabase::new()),
    };
    let disambiguator = Disambiguator::new(
        lookups.dns.clone(),
        lookups.vpn.clone(),
        lookups.asn.clone(),
    );
    let manager = Arc::new(ModelManager::new(
        ModelStateStore::in_memory(),
        disambiguator,
        Arc::new(StatsRepository::in_memory()),
        ManagerConfig::default(),
        metrics.clone(),
        logger.clone(),
    ));
    manager
        .import_configs(vec![ModelConfiguration {
            name: "web".into(),
            artifact,
            backend: ModelBackend::Linear,
            input_shape: vec![2],
            categories: vec!["Netflix".into(), "Zoom".into()],
            confidence_threshold: 0.7,
        }])
        .await
        .unwrap();

    let controller = Arc::new(StubController::default());
    let api: Arc<dyn ControllerApi> = controller.clone();
    let meters = Arc::new(MeterService::new(
        MeterRepository::in_memory(),
        api.clone(),
        metrics.clone(),
    ));
    let pipeline = Arc::new(Pipeline::new(
        manager.clone(),
        meters.clone(),
        FlowCompiler::new(api, metrics.clone(), logger.clone()),
        logger.clone(),
    ));

    let state = Arc::new(AppState {
        health_registry,
        metrics,
        logger,
        manager,
        meters,
        pipeline,
        lookups,
    });
    let router = create_router(state.clone());

    TestApp {
        router,
        state,
        controller,
        dir,
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn classify_body() -> Value {
    json!({
        "src_ip": "192.168.1.10",
        "dst_ip": "203.0.113.7",
        "src_port": 51000,
        "dst_port": 443,
        "src_mac": "aa:bb:cc:dd:ee:01",
        "payload": [[0.1, 0.2]],
        "src": 1,
        "tcp": 1,
        "switch_id": "openflow:1",
        "inbound_port": 1,
        "outbound_port": 2,
        "controller_ip": "10.0.0.5"
    })
}

fn meter_body(period: &str) -> Value {
    json!({
        "controller": "10.0.0.5",
        "switch_id": "openflow:1",
        "rate_kbps": 1000,
        "categories": ["Netflix"],
        "activation_period": period
    })
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let app = setup_test_app().await;

    let (status, health) = send(&app.router, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert!(health["components"]["model_manager"].is_object());
    assert!(health["components"]["lookups"].is_object());
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let app = setup_test_app().await;
    app.state
        .health_registry
        .set_degraded(components::LOOKUPS, "VPN seed failed")
        .await;

    let (status, health) = send(&app.router, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let app = setup_test_app().await;
    app.state
        .health_registry
        .set_unhealthy(components::MODEL_MANAGER, "No model loadable")
        .await;

    let (status, health) = send(&app.router, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_follows_ready_flag() {
    let app = setup_test_app().await;

    let (status, readiness) = send(&app.router, "GET", "/readyz", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);

    app.state.health_registry.set_ready(true).await;
    let (status, readiness) = send(&app.router, "GET", "/readyz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let app = setup_test_app().await;
    app.state.metrics.observe_classification("web", "high", 0.002);
    app.state.metrics.inc_flow_push("client_to_server", "success");

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("flowmeter_classification_latency_seconds_bucket"));
    assert!(text.contains("flowmeter_classifications_total"));
    assert!(text.contains("flowmeter_flow_pushes_total"));
}

#[tokio::test]
async fn test_model_activation_and_categories() {
    let app = setup_test_app().await;

    let (status, _) = send(
        &app.router,
        "PUT",
        "/api/v1/models/active",
        Some(json!({ "name": "web" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, models) = send(&app.router, "GET", "/api/v1/models", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(models[0]["name"], "web");
    assert_eq!(models[0]["is_active"], true);
    assert_eq!(models[0]["is_loaded"], true);

    let (status, categories) =
        send(&app.router, "GET", "/api/v1/models/web/categories", None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = categories
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Netflix", "Zoom", "Unknown", "DNS", "Apple"]);
    assert!(categories[0]["cookie"].as_u64().is_some());
}

#[tokio::test]
async fn test_unknown_model_is_404() {
    let app = setup_test_app().await;

    let (status, body) = send(
        &app.router,
        "PUT",
        "/api/v1/models/active",
        Some(json!({ "name": "missing" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_meter_crud_and_conflicts() {
    let app = setup_test_app().await;

    let (status, created) =
        send(&app.router, "POST", "/api/v1/meters", Some(meter_body("WEEKDAY"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["meter_id"], 1);

    let (status, body) =
        send(&app.router, "POST", "/api/v1/meters", Some(meter_body("ALL_WEEK"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");

    let id = created["id"].as_u64().unwrap();
    let mut update = meter_body("WEEKEND");
    update["rate_kbps"] = json!(4000);
    let (status, updated) =
        send(&app.router, "PUT", &format!("/api/v1/meters/{}", id), Some(update)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["rate_kbps"], 4000);

    let (status, _) = send(&app.router, "DELETE", &format!("/api/v1/meters/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, meters) = send(&app.router, "GET", "/api/v1/meters", None).await;
    assert!(meters.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_rejected_meter_is_502() {
    let app = setup_test_app().await;
    app.controller.reject_meters.store(true, Ordering::SeqCst);

    let (status, body) =
        send(&app.router, "POST", "/api/v1/meters", Some(meter_body("ALL_WEEK"))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "upstream_error");
}

#[tokio::test]
async fn test_invalid_meter_is_400() {
    let app = setup_test_app().await;
    let mut body = meter_body("WEEKDAY");
    body["rate_kbps"] = json!(0);

    let (status, body) = send(&app.router, "POST", "/api/v1/meters", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");
}

#[tokio::test]
async fn test_classify_without_active_model_is_404() {
    let app = setup_test_app().await;

    let (status, body) =
        send(&app.router, "POST", "/api/v1/classify", Some(classify_body())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_classify_rejects_bad_flag() {
    let app = setup_test_app().await;
    app.state.manager.activate("web").await.unwrap();
    let mut body = classify_body();
    body["tcp"] = json!(3);

    let (status, body) = send(&app.router, "POST", "/api/v1/classify", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");
}

#[tokio::test]
async fn test_classify_applies_meter() {
    let app = setup_test_app().await;
    app.state.manager.activate("web").await.unwrap();

    let (status, unmetered) =
        send(&app.router, "POST", "/api/v1/classify", Some(classify_body())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(unmetered["status"], "unmetered");
    assert_eq!(unmetered["classification"], "Netflix");

    send(&app.router, "POST", "/api/v1/meters", Some(meter_body("ALL_WEEK"))).await;
    let (status, metered) =
        send(&app.router, "POST", "/api/v1/classify", Some(classify_body())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(metered["status"], "success");
    assert_eq!(metered["applied_meter_id"], 1);
    assert_eq!(metered["flow_results"].as_array().unwrap().len(), 2);
    assert_eq!(metered["flow_results"][1]["status"], "success");
}

#[tokio::test]
async fn test_stats_snapshot_and_query() {
    let app = setup_test_app().await;
    app.state.manager.activate("web").await.unwrap();
    send(&app.router, "POST", "/api/v1/classify", Some(classify_body())).await;

    let (status, snapshot) = send(&app.router, "POST", "/api/v1/stats/snapshot", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["status"], "persisted");

    let (status, stats) = send(&app.router, "GET", "/api/v1/stats?model=web", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats[0]["total"], 1);
    assert_eq!(stats[0]["high_confidence"], 1);

    let (_, other) = send(&app.router, "GET", "/api/v1/stats?model=other", None).await;
    assert!(other.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_dns_bulk_load_reports_count() {
    let app = setup_test_app().await;
    let path = app.dir.path().join("dns.csv");
    std::fs::write(&path, "ip,provider\n192.0.2.53,lab\n192.0.2.54,lab\n").unwrap();

    let (status, report) = send(
        &app.router,
        "POST",
        "/api/v1/lookups/dns/load",
        Some(json!({ "path": path, "batch_size": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["success"], true);
    assert_eq!(report["count"], 2);
    assert!(app.state.lookups.dns.contains("192.0.2.54".parse().unwrap()));
}

#[tokio::test]
async fn test_failed_bulk_load_keeps_previous_set() {
    let app = setup_test_app().await;
    let good = app.dir.path().join("vpn.csv");
    std::fs::write(&good, "198.51.100.0/24\n").unwrap();
    let (status, _) = send(
        &app.router,
        "POST",
        "/api/v1/lookups/vpn/load",
        Some(json!({ "path": good })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let bad = app.dir.path().join("vpn-bad.csv");
    std::fs::write(&bad, "203.0.113.0/24\nnot-a-network\n").unwrap();
    let (status, report) = send(
        &app.router,
        "POST",
        "/api/v1/lookups/vpn/load",
        Some(json!({ "path": bad })),
    )
    .await;
    assert_ne!(status, StatusCode::OK);
    assert_eq!(report["success"], false);

    assert!(app.state.lookups.vpn.contains("198.51.100.9".parse().unwrap()));
    assert!(!app.state.lookups.vpn.contains("203.0.113.9".parse().unwrap()));

    let (_, health) = send(&app.router, "GET", "/healthz", None).await;
    assert_eq!(health["components"]["lookups"]["status"], "degraded");
}
