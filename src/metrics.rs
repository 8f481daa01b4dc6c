// Copyright (c) 2026 Volkov Pavel | DevITWay
// SPDX-License-Identifier: MIT

use axum::{
    body::Body,
    extract::MatchedPath,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};
use std::sync::Arc;
use std::time::Instant;

use crate::AppState;

lazy_static! {
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "gateway_http_requests_total",
        "Total number of HTTP requests",
        &["route", "method", "status"]
    )
    .expect("metric can be created");

    pub static ref HTTP_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "gateway_http_request_duration_seconds",
        "HTTP request latency in seconds",
        &["route", "method"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("metric can be created");

    pub static ref PROXY_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "gateway_proxy_requests_total",
        "Total requests handled by the reverse-proxy core",
        &["hostname", "outcome"]
    )
    .expect("metric can be created");

    pub static ref CERT_MINTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "gateway_cert_mints_total",
        "Total leaf certificates minted by the CA",
        &["server_name"]
    )
    .expect("metric can be created");

    pub static ref CERT_CACHE_SIZE: IntGauge = register_int_gauge!(
        "gateway_cert_cache_size",
        "Number of leaf certificates currently cached"
    )
    .expect("metric can be created");
}

/// Routes for the metrics endpoint
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/metrics", get(metrics_handler))
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .unwrap_or_default();

    ([("content-type", "text/plain; charset=utf-8")], buffer)
}

/// Middleware to record request metrics for the admin/v2 HTTP surface.
pub async fn metrics_middleware(
    matched_path: Option<MatchedPath>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let route = matched_path
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&route, &method, &status])
        .inc();
    HTTP_REQUEST_DURATION
        .with_label_values(&[&route, &method])
        .observe(duration);

    response
}

pub fn record_proxy_outcome(hostname: &str, outcome: &str) {
    PROXY_REQUESTS_TOTAL
        .with_label_values(&[hostname, outcome])
        .inc();
}

pub fn record_cert_mint(server_name: &str, cache_size: i64) {
    CERT_MINTS_TOTAL.with_label_values(&[server_name]).inc();
    CERT_CACHE_SIZE.set(cache_size);
}
