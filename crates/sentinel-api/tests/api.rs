//! API integration tests for sentinel-api routes.
//!
//! Uses Axum's `tower::ServiceExt` to send requests directly to the app
//! without binding a TCP socket.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use sentinel_api::app::build_app;
use sentinel_api::state::AppState;
use sentinel_core::testing::{MemoryStore, ScriptedProber};
use sentinel_core::{CheckResult, Engine, EngineConfig, MonitorStore, NewMonitor, SqliteStore};

struct Harness {
    store: Arc<MemoryStore>,
    prober: Arc<ScriptedProber>,
    state: AppState,
}

impl Harness {
    fn new(prober: ScriptedProber) -> Self {
        let store = Arc::new(MemoryStore::new());
        let prober = Arc::new(prober);
        let config = EngineConfig::default().with_retry_backoff(1);
        let engine = Engine::new(store.clone(), prober.clone(), &config, None);
        Self {
            store,
            prober,
            state: AppState::new(engine),
        }
    }

    fn app(&self) -> axum::Router {
        build_app(self.state.clone())
    }

    async fn wait_for_checks(&self, count: usize) {
        for _ in 0..200 {
            if self.store.check_count() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} checks, saw {}", self.store.check_count());
    }
}

async fn body_json(body: Body) -> Value {
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(body: Body) -> String {
    let bytes = body.collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn json_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(b) = body {
        builder.body(Body::from(serde_json::to_vec(&b).unwrap())).unwrap()
    } else {
        builder.body(Body::empty()).unwrap()
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn health_returns_ok() {
    let h = Harness::new(ScriptedProber::always(200));
    let resp = h.app().oneshot(get("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp.into_body()).await, "ok");
}

#[tokio::test]
async fn create_monitor_returns_201_and_runs_first_check() {
    let h = Harness::new(ScriptedProber::always(200));
    let resp = h
        .app()
        .oneshot(json_request(
            "POST",
            "/api/v1/monitors",
            Some(json!({"name": "Shop", "url": "https://shop.example.com"})),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = body_json(resp.into_body()).await;
    assert_eq!(body["name"], "Shop");
    assert_eq!(body["kind"], "http");
    assert_eq!(body["active"], true);
    assert!(body["last_check"].is_null());
    assert!(body["history"].as_array().unwrap().is_empty());

    h.wait_for_checks(1).await;
    assert_eq!(h.prober.calls(), 1);

    let id = body["id"].as_i64().unwrap();
    let resp = h.app().oneshot(get(&format!("/api/v1/monitors/{id}"))).await.unwrap();
    let body = body_json(resp.into_body()).await;
    assert_eq!(body["last_check"]["status"], 200);
    assert_eq!(body["up"], true);
    assert_eq!(body["history"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn create_keyword_and_port_monitors() {
    let h = Harness::new(ScriptedProber::always(200));

    let resp = h
        .app()
        .oneshot(json_request(
            "POST",
            "/api/v1/monitors",
            Some(json!({
                "name": "Landing",
                "url": "https://example.com",
                "kind": "keyword",
                "keyword": "Welcome"
            })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = body_json(resp.into_body()).await;
    assert_eq!(body["kind"], "keyword");
    assert_eq!(body["keyword"], "Welcome");

    let resp = h
        .app()
        .oneshot(json_request(
            "POST",
            "/api/v1/monitors",
            Some(json!({"name": "Postgres", "url": "db.internal", "kind": "port", "port": 5432})),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = body_json(resp.into_body()).await;
    assert_eq!(body["kind"], "port");
    assert_eq!(body["port"], 5432);
}

#[tokio::test]
async fn create_monitor_rejects_invalid_input() {
    let h = Harness::new(ScriptedProber::always(200));
    let cases = [
        json!({"name": "x", "url": "not-a-url"}),
        json!({"name": "", "url": "https://example.com"}),
        json!({"name": "x", "url": "https://example.com", "kind": "keyword"}),
        json!({"name": "x", "url": "https://example.com", "kind": "keyword", "keyword": ""}),
        json!({"name": "x", "url": "host", "kind": "port", "port": 70000}),
        json!({"name": "x", "url": "https://example.com", "kind": "icmp"}),
    ];

    for case in cases {
        let resp = h
            .app()
            .oneshot(json_request("POST", "/api/v1/monitors", Some(case.clone())))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "case: {case}");
        let body = body_json(resp.into_body()).await;
        assert_eq!(body["error"], "bad_request");
        assert!(body["message"].is_string());
    }
    assert_eq!(h.store.list_monitors().await.unwrap().len(), 0);
}

#[tokio::test]
async fn list_monitors_includes_recent_history_oldest_first() {
    let h = Harness::new(ScriptedProber::always(200));
    let h = Harness {
        state: h.state.clone().with_history_limit(3),
        ..h
    };
    let monitor = h
        .store
        .add_monitor(NewMonitor::http("site", "https://example.com"))
        .await
        .unwrap();
    for latency_ms in 1..=5 {
        h.store
            .record_check(
                monitor.id,
                &CheckResult {
                    status: 200,
                    latency_ms,
                    timestamp: chrono::Utc::now(),
                },
            )
            .await
            .unwrap();
    }

    let resp = h.app().oneshot(get("/api/v1/monitors")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp.into_body()).await;
    let list = body.as_array().unwrap();
    assert_eq!(list.len(), 1);
    let latencies: Vec<i64> = list[0]["history"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["latency_ms"].as_i64().unwrap())
        .collect();
    assert_eq!(latencies, vec![3, 4, 5]);
}

#[tokio::test]
async fn checks_endpoint_validates_limit() {
    let h = Harness::new(ScriptedProber::always(200));
    let monitor = h
        .store
        .add_monitor(NewMonitor::http("site", "https://example.com"))
        .await
        .unwrap();

    for bad in ["0", "501"] {
        let resp = h
            .app()
            .oneshot(get(&format!("/api/v1/monitors/{}/checks?limit={bad}", monitor.id)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    let resp = h
        .app()
        .oneshot(get(&format!("/api/v1/monitors/{}/checks?limit=5", monitor.id)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp.into_body()).await;
    assert_eq!(body["monitor_id"], monitor.id);
    assert!(body["checks"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn manual_check_returns_202() {
    let h = Harness::new(ScriptedProber::always(0));
    let monitor = h
        .store
        .add_monitor(NewMonitor::http("site", "https://example.com"))
        .await
        .unwrap();

    let resp = h
        .app()
        .oneshot(json_request(
            "POST",
            &format!("/api/v1/monitors/{}/check", monitor.id),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    h.wait_for_checks(1).await;
    assert_eq!(h.prober.calls(), 3);
    let stored = h.store.get_monitor(monitor.id).await.unwrap().unwrap();
    assert_eq!(stored.last_status(), Some(0));
}

#[tokio::test]
async fn unknown_and_malformed_ids() {
    let h = Harness::new(ScriptedProber::always(200));

    let resp = h.app().oneshot(get("/api/v1/monitors/999")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body = body_json(resp.into_body()).await;
    assert_eq!(body["error"], "not_found");

    let resp = h.app().oneshot(get("/api/v1/monitors/abc")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = h
        .app()
        .oneshot(json_request("POST", "/api/v1/monitors/999/check", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = h
        .app()
        .oneshot(json_request("DELETE", "/api/v1/monitors/999", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_monitor_removes_history() {
    let h = Harness::new(ScriptedProber::always(200));
    let monitor = h
        .store
        .add_monitor(NewMonitor::http("site", "https://example.com"))
        .await
        .unwrap();
    h.state.engine.check_now(monitor.id).await.unwrap();
    assert_eq!(h.store.check_count(), 1);

    let resp = h
        .app()
        .oneshot(json_request(
            "DELETE",
            &format!("/api/v1/monitors/{}", monitor.id),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp.into_body()).await;
    assert_eq!(body["id"], monitor.id);

    assert_eq!(h.store.check_count(), 0);
    let resp = h
        .app()
        .oneshot(get(&format!("/api/v1/monitors/{}", monitor.id)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn metrics_returns_openmetrics() {
    let h = Harness::new(ScriptedProber::always(503));
    let checked = h
        .store
        .add_monitor(NewMonitor::http("Shop \"EU\"", "https://example.com"))
        .await
        .unwrap();
    h.store
        .add_monitor(NewMonitor::http("fresh", "https://example.org"))
        .await
        .unwrap();
    h.state.engine.check_now(checked.id).await.unwrap();

    let resp = h.app().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let ct = resp.headers().get("content-type").unwrap().to_str().unwrap();
    assert!(ct.contains("openmetrics-text"));

    let text = body_text(resp.into_body()).await;
    assert!(text.contains("sentinel_monitors 2"));
    assert!(text.contains("name=\"Shop \\\"EU\\\"\""));
    assert!(text.contains(&format!("sentinel_monitor_up{{monitor_id=\"{}\"}} 0", checked.id)));
    assert!(text.contains(&format!(
        "sentinel_monitor_last_status{{monitor_id=\"{}\"}} 503",
        checked.id
    )));
    assert_eq!(text.matches("sentinel_monitor_up{").count(), 1);
    assert!(text.trim_end().ends_with("# EOF"));
}

#[tokio::test]
async fn works_over_sqlite_store() {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let prober = Arc::new(ScriptedProber::always(200));
    let engine = Engine::new(store.clone(), prober, &EngineConfig::default(), None);
    let app = build_app(AppState::new(engine));

    let resp = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/monitors",
            Some(json!({"name": "Shop", "url": "https://shop.example.com"})),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let id = body_json(resp.into_body()).await["id"].as_i64().unwrap();

    for _ in 0..200 {
        if !store.recent_checks(id, 1).await.unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let resp = app.oneshot(get(&format!("/api/v1/monitors/{id}/checks"))).await.unwrap();
    let body = body_json(resp.into_body()).await;
    assert_eq!(body["checks"].as_array().unwrap().len(), 1);
    assert_eq!(body["checks"][0]["status"], 200);
}
