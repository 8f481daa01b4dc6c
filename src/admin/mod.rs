//! Admin API (spec.md §4.8): a thin CRUD surface over the Config Store,
//! plus liveness/readiness probes (SPEC_FULL.md's expanded Admin Surface
//! module).
//!
//! Grounded on `nora-registry/src/health.rs`'s `HealthStatus`/readiness
//! shape, generalized from "storage backend" to "config store + content
//! store", and on the teacher's CRUD-handler idiom in `registry/docker.rs`.

use axum::extract::{ConnectInfo, FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::AppError;
use crate::mappings::RegistryMapping;
use crate::AppState;

/// `ConnectInfo<SocketAddr>` as an optional extractor: present when the
/// server was bound with `into_make_service_with_connect_info`, absent
/// (e.g. in tests driving the router directly via `oneshot`) without
/// rejecting the request.
struct OptionalConnectInfo(Option<SocketAddr>);

impl<S> FromRequestParts<S> for OptionalConnectInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts.extensions.get::<ConnectInfo<SocketAddr>>().map(|c| c.0),
        ))
    }
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/registries",
            get(list_registries).post(add_registry),
        )
        .route(
            "/api/registries/{host}",
            get(get_registry).put(update_registry).delete(delete_registry),
        )
        .route("/api/v1/health", get(health))
        .route("/api/v1/ready", get(ready))
}

async fn list_registries(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let mappings = state.mappings.list_sanitized().await?;
    Ok(Json(mappings).into_response())
}

async fn get_registry(
    State(state): State<Arc<AppState>>,
    Path(host): Path<String>,
) -> Result<Response, AppError> {
    let mapping = state.mappings.get(&host).await?;
    Ok(Json(mapping.sanitized()).into_response())
}

async fn add_registry(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    Json(mapping): Json<RegistryMapping>,
) -> Result<Response, AppError> {
    let hostname = mapping.hostname.clone();
    state.mappings.put(mapping).await?;
    state.proxy_registry.invalidate(&hostname);
    tracing::info!(hostname = %hostname, remote_addr = ?Some(remote_addr), "registry mapping added");
    Ok(StatusCode::CREATED.into_response())
}

async fn update_registry(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    Path(host): Path<String>,
    Json(mut mapping): Json<RegistryMapping>,
) -> Result<Response, AppError> {
    // path host overrides body, per spec.md §4.8.
    mapping.hostname = host.clone();
    state.mappings.put(mapping).await?;
    state.proxy_registry.invalidate(&host);
    tracing::info!(hostname = %host, remote_addr = ?Some(remote_addr), "registry mapping updated");
    Ok(StatusCode::OK.into_response())
}

async fn delete_registry(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    Path(host): Path<String>,
) -> Result<Response, AppError> {
    state.mappings.delete(&host).await?;
    state.proxy_registry.invalidate(&host);
    tracing::info!(hostname = %host, remote_addr = ?Some(remote_addr), "registry mapping removed");
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Serialize)]
struct HealthStatus {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessStatus {
    status: String,
    config_store: BackendHealth,
    content_store: BackendHealth,
}

#[derive(Serialize)]
struct BackendHealth {
    backend: String,
    reachable: bool,
}

async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn ready(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ReadinessStatus>) {
    let config_reachable = state.mappings.list().await.is_ok();
    let content_reachable = state.content.list_repositories().await.is_ok();

    let status_code = if config_reachable && content_reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = ReadinessStatus {
        status: if status_code == StatusCode::OK { "ready" } else { "not_ready" }.to_string(),
        config_store: BackendHealth {
            backend: state.mappings.backend_name().to_string(),
            reachable: config_reachable,
        },
        content_store: BackendHealth {
            backend: state.content.backend_name().to_string(),
            reachable: content_reachable,
        },
    };

    (status_code, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::RootCa;
    use crate::content::{memory::MemoryContentStore, ContentStore};
    use crate::mappings::{memory::MemoryConfigStore, ConfigStore};
    use crate::proxy::ProxyHandlerRegistry;
    use crate::rate_limit::RateLimitConfig;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

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
    async fn health_returns_ok() {
        let app = routes().with_state(test_state());
        let response = app
            .oneshot(Request::builder().uri("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn add_then_list_registries_redacts_credentials() {
        let state = test_state();
        let app = routes().with_state(state.clone());

        let mapping = RegistryMapping {
            hostname: "docker.io".to_string(),
            remote_url: "https://registry-1.docker.io".to_string(),
            credentials: None,
        };
        let body = serde_json::to_vec(&mapping).unwrap();
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/registries")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .oneshot(Request::builder().uri("/api/registries").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let listed: Vec<RegistryMapping> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn delete_missing_registry_is_not_found() {
        let app = routes().with_state(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/registries/ghost.io")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
