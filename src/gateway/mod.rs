// Copyright (c) 2026 Volkov Pavel | DevITWay
// SPDX-License-Identifier: MIT

//! Gateway Listeners (spec.md §4.6): the HTTP/HTTPS entrypoints that
//! dispatch by `Host` to either the reverse-proxy core or the local V2
//! registry engine, plus the separate Admin API listener.
//!
//! Grounded on `nora-registry/src/main.rs`'s `run_server`/`shutdown_signal`
//! shape: one root router, `axum::serve(...).with_graceful_shutdown(...)`.
//! The TLS listener and per-ClientHello cert resolution have no teacher
//! precedent (the teacher only serves plain HTTP); `axum-server`'s
//! `tls-rustls` feature is the standard ecosystem crate for a dynamic
//! `rustls::ServerConfig` alongside axum.

use axum::body::{Body, Bytes};
use axum::http::{header, Request};
use axum::response::Response;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceExt;
use tracing::{error, info};

use crate::ca::GatewayCertResolver;
use crate::config::GatewayConfig;
use crate::registry_v2::path::V2Route;
use crate::{admin, metrics, proxy, rate_limit, registry_v2, AppState};

/// Connections in flight when shutdown begins get this long to finish
/// before the listener is torn down (spec.md §4.6, §5).
const GRACEFUL_DRAIN: Duration = Duration::from_secs(5);

/// Request bodies proxied upstream are buffered (the redirect-following
/// transport cannot replay a streamed body); this bounds that buffer.
const MAX_PROXY_REQUEST_BODY: usize = 2 * 1024 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("failed to bind {0}: {1}")]
    Bind(SocketAddr, std::io::Error),
    #[error("invalid listen address {0:?}: {1}")]
    InvalidAddr(String, std::net::AddrParseError),
    #[error("tls setup failed: {0}")]
    Tls(#[from] crate::ca::CaError),
    #[error("server error: {0}")]
    Server(std::io::Error),
}

/// Build the root router for the main (proxy + local registry) surface.
/// `/metrics` is matched explicitly so it is reachable independent of the
/// request's `Host` header; everything else falls through to
/// [`dispatch_by_host`], which also picks the local registry's rate-limit
/// tier (spec.md's "Rate limiting" module: uploads get the generous tier,
/// everything else gets `general`).
fn build_main_router(state: Arc<AppState>) -> Router<()> {
    let general_router = registry_v2::routes()
        .with_state(state.clone())
        .layer(rate_limit::general_rate_limiter(&state.rate_limits));
    let upload_router = registry_v2::routes()
        .with_state(state.clone())
        .layer(rate_limit::upload_rate_limiter(&state.rate_limits));
    let state_for_fallback = state.clone();

    let fallback = tower::service_fn(move |req: Request<Body>| {
        let state = state_for_fallback.clone();
        let general_router = general_router.clone();
        let upload_router = upload_router.clone();
        async move {
            Ok::<_, std::convert::Infallible>(
                dispatch_by_host(state, general_router, upload_router, req).await,
            )
        }
    });

    Router::new()
        .merge(metrics::routes())
        .fallback_service(fallback)
        .layer(axum::middleware::from_fn(metrics::metrics_middleware))
        .layer(axum::middleware::from_fn(crate::request_id::request_id_middleware))
        .with_state(state)
}

/// Host-header routing decision (spec.md §2's data flow): a mapped host
/// goes through the reverse-proxy core, anything else is assumed to
/// target the local registry engine.
async fn dispatch_by_host(
    state: Arc<AppState>,
    general_router: Router<()>,
    upload_router: Router<()>,
    req: Request<Body>,
) -> Response {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(|h| h.split(':').next().unwrap_or(h).to_string());

    if let Some(host) = host {
        if state.mappings.get(&host).await.is_ok() {
            return proxy_upstream(&state, &host, req).await;
        }
    }

    let router = if is_upload_request(&req) { upload_router } else { general_router };
    match router.oneshot(req).await {
        Ok(response) => response,
        Err(infallible) => match infallible {},
    }
}

/// Classify a request against the local registry's own path grammar
/// ([`crate::registry_v2::path`]) so the upload rate-limit tier applies
/// to exactly the blob-upload session endpoints, the same shape the
/// handler itself will parse.
fn is_upload_request(req: &Request<Body>) -> bool {
    let Some(rest) = req.uri().path().strip_prefix("/v2/") else {
        return false;
    };
    matches!(
        registry_v2::path::parse(rest),
        Some(V2Route::StartUpload { .. } | V2Route::UploadSession { .. })
    )
}

async fn proxy_upstream(state: &AppState, host: &str, req: Request<Body>) -> Response {
    let (parts, body) = req.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let body = axum::body::to_bytes(body, MAX_PROXY_REQUEST_BODY)
        .await
        .unwrap_or_else(|_| Bytes::new());

    proxy::proxy_request(
        &state.proxy_registry,
        &state.mappings,
        host,
        parts.method,
        &path_and_query,
        parts.headers,
        body,
    )
    .await
}

fn build_admin_router(state: Arc<AppState>) -> Router<()> {
    let limiter = rate_limit::admin_rate_limiter(&state.rate_limits);
    admin::routes().with_state(state).layer(limiter)
}

fn build_server_config(resolver: Arc<GatewayCertResolver>) -> rustls::ServerConfig {
    let mut server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(resolver);
    server_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    server_config
}

async fn serve_plain(addr: SocketAddr, router: Router<()>, handle: Handle) -> Result<(), GatewayError> {
    info!(%addr, "listening (http)");
    axum_server::bind(addr)
        .handle(handle)
        .serve(router.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(GatewayError::Server)
}

async fn serve_tls(
    addr: SocketAddr,
    router: Router<()>,
    resolver: Arc<GatewayCertResolver>,
    handle: Handle,
) -> Result<(), GatewayError> {
    let tls_config = RustlsConfig::from_config(Arc::new(build_server_config(resolver)));
    info!(%addr, "listening (tls)");
    axum_server::bind_rustls(addr, tls_config)
        .handle(handle)
        .serve(router.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(GatewayError::Server)
}

fn parse_addr(raw: &str) -> Result<SocketAddr, GatewayError> {
    raw.parse()
        .map_err(|e| GatewayError::InvalidAddr(raw.to_string(), e))
}

/// Bring up every configured listener and block until a shutdown signal
/// is received, then drain in-flight requests for up to
/// [`GRACEFUL_DRAIN`] before returning.
pub async fn run(state: Arc<AppState>, config: &GatewayConfig) -> Result<(), GatewayError> {
    let main_router = build_main_router(state.clone());

    let http_handle = Handle::new();
    let http_addr = parse_addr(&config.listen)?;
    let http_task = tokio::spawn(serve_plain(http_addr, main_router.clone(), http_handle.clone()));

    let mut handles = vec![http_handle];
    let mut tasks = vec![http_task];

    if config.auto_tls || config.has_static_cert() {
        let resolver = build_cert_resolver(&state, config)?;
        let tls_handle = Handle::new();
        let tls_addr = parse_addr(&config.listen_tls)?;
        tasks.push(tokio::spawn(serve_tls(
            tls_addr,
            main_router.clone(),
            resolver.clone(),
            tls_handle.clone(),
        )));
        handles.push(tls_handle);

        if let Some(registry_addr) = &config.registry_tls {
            let registry_router = registry_v2::routes().with_state(state.clone());
            let registry_handle = Handle::new();
            let registry_addr = parse_addr(registry_addr)?;
            tasks.push(tokio::spawn(serve_tls(
                registry_addr,
                registry_router,
                resolver,
                registry_handle.clone(),
            )));
            handles.push(registry_handle);
        }
    }

    if config.admin_api {
        let admin_router = build_admin_router(state.clone());
        let admin_handle = Handle::new();
        let admin_addr = parse_addr(&config.admin_addr)?;
        tasks.push(tokio::spawn(serve_plain(admin_addr, admin_router, admin_handle.clone())));
        handles.push(admin_handle);
    }

    shutdown_signal().await;
    info!("starting graceful shutdown");
    for handle in &handles {
        handle.graceful_shutdown(Some(GRACEFUL_DRAIN));
    }

    for task in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "listener exited with error"),
            Err(e) => error!(error = %e, "listener task panicked"),
        }
    }

    Ok(())
}

fn build_cert_resolver(
    state: &Arc<AppState>,
    config: &GatewayConfig,
) -> Result<Arc<GatewayCertResolver>, GatewayError> {
    let static_cert = if config.has_static_cert() {
        let cert_path = config.cert_file.as_ref().expect("checked by has_static_cert");
        let key_path = config.key_file.as_ref().expect("checked by has_static_cert");
        Some(GatewayCertResolver::load_static_pair(cert_path, key_path)?)
    } else {
        None
    };

    let ca = state
        .ca
        .clone()
        .expect("RootCa must be initialized whenever a TLS listener is started");

    Ok(Arc::new(GatewayCertResolver::new(
        static_cert,
        ca,
        state.mappings.clone(),
    )))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_addr_accepts_host_port() {
        let addr = parse_addr("127.0.0.1:8080").unwrap();
        assert_eq!(addr.port(), 8080);
    }

    #[test]
    fn parse_addr_rejects_garbage() {
        assert!(parse_addr("not-an-address").is_err());
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[test]
    fn upload_start_and_session_are_upload_tier() {
        assert!(is_upload_request(&get("/v2/library/nginx/blobs/uploads/")));
        assert!(is_upload_request(&get("/v2/library/nginx/blobs/uploads/abc-123")));
    }

    #[test]
    fn reads_and_manifests_are_general_tier() {
        assert!(!is_upload_request(&get("/v2/library/nginx/manifests/latest")));
        assert!(!is_upload_request(&get(&format!(
            "/v2/library/nginx/blobs/sha256:{}",
            "a".repeat(64)
        ))));
        assert!(!is_upload_request(&get("/v2/_catalog")));
        assert!(!is_upload_request(&get("/v2/")));
    }
}
