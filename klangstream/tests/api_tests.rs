#![cfg(all(unix, feature = "klangserver"))]

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::{engine, eventually, FakeTool};
use http_body_util::BodyExt;
use klangstream::api::{create_router, PrefetchResponse};
use klangstream::EngineStats;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_stream_without_id_is_bad_request() {
    let router = create_router(engine(FakeTool::new(None, "true")));

    for uri in ["/api/stream", "/api/stream?id="] {
        let response = router.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
    }
}

#[tokio::test]
async fn test_stream_from_cached_url_with_range() -> anyhow::Result<()> {
    let cdn = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/audio"))
        .and(header("range", "bytes=2-"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 2-5/6")
                .set_body_bytes(b"cdef".to_vec()),
        )
        .mount(&cdn)
        .await;

    let engine = engine(FakeTool::new(None, "true"));
    engine
        .cache()
        .put("abc", format!("{}/audio", cdn.uri()), Duration::from_secs(60))
        .await;

    let request = Request::get("/api/stream?id=abc")
        .header("range", "bytes=2-")
        .body(Body::empty())?;
    let response = create_router(engine).oneshot(request).await?;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()["content-range"], "bytes 2-5/6");
    assert_eq!(response.headers()["accept-ranges"], "bytes");
    let body = response.into_body().collect().await?.to_bytes();
    assert_eq!(&body[..], b"cdef");
    Ok(())
}

#[tokio::test]
async fn test_stream_fallback_over_http() -> anyhow::Result<()> {
    let router = create_router(engine(FakeTool::new(None, "printf opus-bytes")));

    let response = router.oneshot(get("/api/stream?id=abc")).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "audio/webm");
    let body = response.into_body().collect().await?.to_bytes();
    assert_eq!(&body[..], b"opus-bytes");
    Ok(())
}

#[tokio::test]
async fn test_third_concurrent_stream_gets_429() -> anyhow::Result<()> {
    let router = create_router(engine(FakeTool::new(None, common::ENDLESS)));

    let first = router.clone().oneshot(get("/api/stream?id=a")).await?;
    let second = router.clone().oneshot(get("/api/stream?id=b")).await?;
    let third = router.clone().oneshot(get("/api/stream?id=c")).await?;

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
    Ok(())
}

#[tokio::test]
async fn test_prefetch_accepts_single_and_window() -> anyhow::Result<()> {
    let tool = FakeTool::new(Some("https://cdn.example/x"), "true");
    let engine = &engine(tool.clone());
    let router = create_router(engine.clone());

    let response = router.clone().oneshot(get("/api/prefetch?id=one")).await?;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: PrefetchResponse =
        serde_json::from_slice(&response.into_body().collect().await?.to_bytes())?;
    assert_eq!(body.scheduled, 1);

    let response = router
        .clone()
        .oneshot(get("/api/prefetch?ids=two,three,four"))
        .await?;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: PrefetchResponse =
        serde_json::from_slice(&response.into_body().collect().await?.to_bytes())?;
    assert_eq!(body.scheduled, 2);

    let response = router.clone().oneshot(get("/api/prefetch")).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(
        eventually(Duration::from_secs(2), || async move {
            engine.stats().await.cached_urls == 3
        })
        .await
    );
    assert_eq!(tool.calls(), 3);
    Ok(())
}

#[tokio::test]
async fn test_stats_endpoint() -> anyhow::Result<()> {
    let engine = engine(FakeTool::new(None, "true"));
    engine
        .cache()
        .put("abc", "https://cdn.example/abc", Duration::from_secs(60))
        .await;

    let response = create_router(engine).oneshot(get("/api/stream/stats")).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let stats: EngineStats =
        serde_json::from_slice(&response.into_body().collect().await?.to_bytes())?;

    assert_eq!(
        stats,
        EngineStats {
            cached_urls: 1,
            pending_resolutions: 0,
            active_extractions: 0,
            max_extractions: 2,
        }
    );
    Ok(())
}
