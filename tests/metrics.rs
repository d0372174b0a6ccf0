// tests/metrics.rs
//
// Installs the global Prometheus recorder, so everything that needs it
// lives in this single test.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
};
use serde_json::json;
use tower::ServiceExt as _;

use live_sources::{
    metrics::Metrics, EngineConfig, FetchError, Fetcher, FetcherSet, LiveSources, NewSource,
    Record, Source,
};

struct Two;

#[async_trait]
impl Fetcher for Two {
    async fn fetch(&self, _source: &Source) -> Result<Vec<Record>, FetchError> {
        Ok(vec![Record::with_id("x", json!(1)), Record::with_id("y", json!(2))])
    }
    fn name(&self) -> &'static str {
        "two"
    }
}

#[tokio::test(start_paused = true)]
async fn ingest_metrics_are_exported() {
    let metrics = Metrics::init().expect("install recorder");

    let engine = LiveSources::with_fetchers(EngineConfig::default(), FetcherSet::uniform(Arc::new(Two)));
    engine.start();
    engine
        .management()
        .register(NewSource::new("m", "custom", "https://example.com").with_interval(60))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(121)).await;

    let req = Request::builder()
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let resp = metrics.router().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    assert!(text.contains(r#"ingest_cycles_total{outcome="ok"} 2"#), "{text}");
    assert!(text.contains("ingest_entries_total 2"), "{text}");
    assert!(text.contains("ingest_duplicates_total 2"), "{text}");
    assert!(text.contains("ingest_fetch_ms"), "{text}");
    assert!(text.contains("live_sources_registered 1"), "{text}");
}
