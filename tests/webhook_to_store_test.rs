//! End-to-end: webhook ingress -> AsyncProcessor -> durable store, driven
//! through the real `axum::Router` rather than calling component methods
//! directly, mirroring the donor's own integration test style of exercising
//! the whole stack instead of isolated units.

use std::sync::Arc;
use std::time::Duration;

use hyper::{Body, Request, StatusCode};
use sentrymux::cache::ClassificationCache;
use sentrymux::classifier::Classifier;
use sentrymux::config::{AppConfig, HumanDuration, LlmConfig};
use sentrymux::fingerprint::fingerprint;
use sentrymux::grouping::GroupManager;
use sentrymux::inhibition::{ActiveAlertCache, InhibitionEngine};
use sentrymux::llm::LlmClient;
use sentrymux::matcher::RegexCache;
use sentrymux::processor::AsyncProcessor;
use sentrymux::publisher::{Publisher, TargetRegistry};
use sentrymux::routing::RoutingConfig;
use sentrymux::silence::SilenceEngine;
use sentrymux::store::AlertStore;
use sentrymux::web::{router, AppState};
use tower::ServiceExt;

async fn build_state() -> Arc<AppState> {
    let store = Arc::new(AlertStore::connect("sqlite::memory:").await.unwrap());

    let llm_config = LlmConfig {
        endpoint: "http://127.0.0.1:1/classify".to_string(),
        model: None,
        max_retries: 1,
        time_budget: HumanDuration(Duration::from_millis(200)),
        breaker_failure_threshold: 5,
        breaker_cooldown: HumanDuration(Duration::from_secs(60)),
    };

    let cache = Arc::new(ClassificationCache::new(100, None));
    let llm = Arc::new(LlmClient::new(llm_config));
    let classifier = Arc::new(Classifier::new(cache, llm, Duration::from_secs(60)));

    let regex_cache = Arc::new(RegexCache::default());
    let active_alerts = Arc::new(ActiveAlertCache::default());
    let inhibition = Arc::new(InhibitionEngine::new(vec![], active_alerts.clone(), regex_cache.clone()));
    let silences = Arc::new(SilenceEngine::new(regex_cache.clone()));

    let routing = Arc::new(
        RoutingConfig::parse(
            r#"
route:
  receiver: default
  group_by: [alertname]
  group_wait: 1ms
  group_interval: 1ms
  repeat_interval: 1h
receivers:
  - name: default
"#,
        )
        .unwrap(),
    );

    let groups = Arc::new(GroupManager::new(1000));
    let registry = Arc::new(TargetRegistry::new(vec![]));
    let publisher = Arc::new(Publisher::new(Default::default(), registry));

    let processor = AsyncProcessor::spawn(
        Default::default(),
        store.clone(),
        classifier,
        routing,
        regex_cache,
        groups.clone(),
        silences.clone(),
        inhibition,
    );

    tokio::spawn(sentrymux::processor::run_group_flush_loop(
        groups,
        store.clone(),
        publisher,
        Duration::from_millis(5),
    ));

    Arc::new(AppState {
        config: AppConfig::from_yaml("llm:\n  endpoint: \"http://127.0.0.1:1/classify\"\n").unwrap(),
        processor,
        silences,
        store,
        started_at: std::time::Instant::now(),
    })
}

#[tokio::test]
async fn webhook_alert_is_persisted_after_ingestion() {
    let state = build_state().await;
    let store = state.store.clone();
    let app = router(state);

    let body = r#"{"alerts": [{"labels": {"alertname": "HighCPU", "severity": "critical", "instance": "web-01"}, "status": "firing"}]}"#;

    let request = Request::builder()
        .method("POST")
        .uri("/webhook/proxy")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let mut labels = std::collections::HashMap::new();
    labels.insert("alertname".to_string(), "HighCPU".to_string());
    labels.insert("severity".to_string(), "critical".to_string());
    labels.insert("instance".to_string(), "web-01".to_string());
    let fp = fingerprint(&labels);

    let mut found = None;
    for _ in 0..50 {
        if let Some(alert) = store.get_alert(&fp).await.unwrap() {
            found = Some(alert);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let alert = found.expect("alert should be persisted by the worker pool within the poll window");
    assert_eq!(alert.alert_name, "HighCPU");
    assert!(alert.is_firing());
}

#[tokio::test]
async fn posting_the_same_silence_twice_conflicts_on_the_second() {
    let state = build_state().await;
    let app = router(state);

    let payload = r#"{
        "createdBy": "oncall",
        "comment": "known issue",
        "startsAt": "2026-01-01T00:00:00Z",
        "endsAt": "2026-01-02T00:00:00Z",
        "matchers": [{"name": "alertname", "op": "=", "value": "HighCPU"}]
    }"#;

    let first = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v2/silences")
                .header("content-type", "application/json")
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v2/silences")
                .header("content-type", "application/json")
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn healthz_and_status_endpoints_respond() {
    let state = build_state().await;
    let app = router(state);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v2/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn list_alerts_endpoint_filters_and_paginates() {
    let state = build_state().await;
    let app = router(state);

    let body = r#"{"alerts": [{"labels": {"alertname": "HighCPU", "instance": "web-01"}, "status": "firing"}]}"#;
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook/proxy")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let mut response = None;
    for _ in 0..50 {
        let r = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v2/alerts?status=firing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        if r.status() == StatusCode::OK {
            let body = hyper::body::to_bytes(r.into_body()).await.unwrap();
            let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
            if parsed["total"].as_u64() == Some(1) {
                response = Some(parsed);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let parsed = response.expect("alert should show up in the listing within the poll window");
    assert_eq!(parsed["alerts"][0]["alert_name"], "HighCPU");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v2/alerts?status=resolved")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["total"], 0);
}
