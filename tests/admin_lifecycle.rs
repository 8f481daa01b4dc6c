//! Admin API closed lifecycle (spec.md §8): add -> list -> get -> remove
//! -> list, exercised against the real router rather than the store
//! directly, so route wiring and status codes are covered too.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;

use warden_registry::admin;
use warden_registry::ca::RootCa;
use warden_registry::content::{memory::MemoryContentStore, ContentStore};
use warden_registry::mappings::{memory::MemoryConfigStore, ConfigStore, RegistryMapping};
use warden_registry::proxy::ProxyHandlerRegistry;
use warden_registry::rate_limit::RateLimitConfig;
use warden_registry::AppState;

fn test_state() -> Arc<AppState> {
    Arc::new(AppState::new(
        ContentStore::new(Box::new(MemoryContentStore::new())),
        Arc::new(ConfigStore::new(Box::new(MemoryConfigStore::new()))),
        Arc::new(ProxyHandlerRegistry::new()),
        None::<Arc<RootCa>>,
        RateLimitConfig::default(),
        true,
    ))
}

#[tokio::test]
async fn add_list_get_remove_list_is_a_closed_lifecycle() {
    let state = test_state();
    let app = admin::routes().with_state(state);

    let mapping = RegistryMapping {
        hostname: "mirror.internal".to_string(),
        remote_url: "https://upstream.example.com".to_string(),
        credentials: None,
    };

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/registries")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&mapping).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/registries").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let listed: Vec<RegistryMapping> = serde_json::from_slice(&body).unwrap();
    assert!(listed.iter().any(|m| m.hostname == "mirror.internal"));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/registries/mirror.internal")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/registries/mirror.internal")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(Request::builder().uri("/api/registries").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let listed: Vec<RegistryMapping> = serde_json::from_slice(&body).unwrap();
    assert!(!listed.iter().any(|m| m.hostname == "mirror.internal"));
}
