//! End-to-end scenarios against the assembled V2 router (spec.md §8),
//! exercised the way `nora-registry`'s handler tests drive a router via
//! `tower::ServiceExt::oneshot` rather than a live TCP listener.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;

use warden_registry::ca::RootCa;
use warden_registry::content::{memory::MemoryContentStore, ContentStore};
use warden_registry::mappings::{memory::MemoryConfigStore, ConfigStore};
use warden_registry::proxy::ProxyHandlerRegistry;
use warden_registry::rate_limit::RateLimitConfig;
use warden_registry::registry_v2;
use warden_registry::AppState;

fn test_state() -> Arc<AppState> {
    Arc::new(AppState::new(
        ContentStore::new(Box::new(MemoryContentStore::new())),
        Arc::new(ConfigStore::new(Box::new(MemoryConfigStore::new()))),
        Arc::new(ProxyHandlerRegistry::new()),
        None::<Arc<RootCa>>,
        RateLimitConfig::default(),
        false,
    ))
}

fn router(state: Arc<AppState>) -> axum::Router<()> {
    registry_v2::routes().with_state(state)
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

#[tokio::test]
async fn version_check_returns_empty_object() {
    let app = router(test_state());
    let response = app
        .oneshot(Request::builder().uri("/v2/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("docker-distribution-api-version")
            .unwrap(),
        "registry/2.0"
    );
    let body = body_bytes(response).await;
    assert_eq!(body, b"{}");
}

#[tokio::test]
async fn resumable_upload_then_blob_fetch() {
    let state = test_state();
    let app = router(state);

    // POST start
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v2/acme/widget/blobs/uploads/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let location = response
        .headers()
        .get("location")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(response.headers().get("range").unwrap(), "0-0");

    // PATCH "hello"
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri(&location)
                .body(Body::from("hello"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(response.headers().get("range").unwrap(), "0-4");

    // PATCH "world"
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri(&location)
                .body(Body::from("world"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(response.headers().get("range").unwrap(), "0-9");

    // PUT finalize with the correct digest of "helloworld"
    let digest = "sha256:936a185caaa266bb9cbe981e9e05cb78cd732b0b3280eb944412bb6f8f8f07af";
    let finalize_uri = format!("{location}?digest={digest}");
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(&finalize_uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let blob_location = response.headers().get("location").unwrap().to_str().unwrap().to_string();
    assert_eq!(blob_location, format!("/v2/acme/widget/blobs/{digest}"));

    // GET the finalized blob
    let response = app
        .clone()
        .oneshot(Request::builder().uri(&blob_location).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_bytes(response).await;
    assert_eq!(body, b"helloworld");

    // Catalog now lists the repository
    let response = app
        .oneshot(Request::builder().uri("/v2/_catalog").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_bytes(response).await;
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("acme/widget"));
}

#[tokio::test]
async fn digest_mismatch_on_finalize_leaves_blob_absent() {
    let state = test_state();
    let app = router(state);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v2/acme/widget/blobs/uploads/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let location = response
        .headers()
        .get("location")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    app.clone()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri(&location)
                .body(Body::from("helloworld"))
                .unwrap(),
        )
        .await
        .unwrap();

    let wrong_digest = format!("sha256:{}", "0".repeat(64));
    let finalize_uri = format!("{location}?digest={wrong_digest}");
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(&finalize_uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/v2/acme/widget/blobs/{wrong_digest}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // the session is not terminal on a mismatch (spec.md §3): the client
    // can PUT again with the correct digest and succeed.
    let correct_digest = "sha256:936a185caaa266bb9cbe981e9e05cb78cd732b0b3280eb944412bb6f8f8f07af";
    let retry_uri = format!("{location}?digest={correct_digest}");
    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(&retry_uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn manifest_put_then_get_by_digest_and_tag() {
    let state = test_state();
    let app = router(state);

    let manifest = br#"{"schemaVersion":2,"config":{"digest":"sha256:abc"},"layers":[]}"#;
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/v2/library/nginx/manifests/latest")
                .body(Body::from(manifest.to_vec()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let digest = response
        .headers()
        .get("docker-content-digest")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    for reference in ["latest", digest.as_str()] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/v2/library/nginx/manifests/{reference}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_bytes(response).await;
        assert_eq!(body, manifest);
    }
}

#[tokio::test]
async fn nested_repository_names_route_correctly() {
    let state = test_state();
    let app = router(state);

    let manifest = br#"{"schemaVersion":2,"config":{},"layers":[]}"#;
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/v2/a/b/c/manifests/latest")
                .body(Body::from(manifest.to_vec()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    // duplicate slashes normalize to the same route
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v2//a//b//c//manifests//latest")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
