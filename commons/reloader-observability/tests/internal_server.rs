use axum::body::{Body, to_bytes};
use http::{Request, StatusCode};
use prometheus::{IntCounterVec, Opts, Registry};
use reloader_observability::internal_router;
use tower::ServiceExt;

#[tokio::test]
async fn metrics_endpoint_renders_registered_counters() {
    let registry = Registry::new();
    let counter = IntCounterVec::new(
        Opts::new("test_pushes_total", "Pushes."),
        &["tenant"],
    )
    .unwrap();
    registry.register(Box::new(counter.clone())).unwrap();
    counter.with_label_values(&["team-a"]).inc();

    let resp = internal_router(registry)
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("test_pushes_total{tenant=\"team-a\"} 1"));
}

#[tokio::test]
async fn health_endpoints_answer_ok() {
    for path in ["/health", "/healthz"] {
        let resp = internal_router(Registry::new())
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "{path}");
    }
}
