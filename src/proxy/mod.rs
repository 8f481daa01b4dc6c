//! Proxy Handler Registry (spec.md §4.5): the host-aware reverse-proxy
//! core. Builds and caches one handler per hostname, rebuilding whenever
//! the Config Store mutates that hostname's mapping.
//!
//! Grounded on `nora-registry/src/registry/docker_auth.rs`'s
//! `RwLock<HashMap<..>>` cache shape; the upstream dispatch itself reuses
//! [`transport::RedirectFollowingTransport`].

pub mod transport;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use parking_lot::RwLock;
use reqwest::Url;
use std::collections::HashMap;
use std::sync::Arc;

use crate::mappings::{ConfigStore, RegistryMapping};
use transport::{PreparedRequest, RedirectFollowingTransport};

/// A built handler for one hostname: the parsed upstream root plus a
/// transport instance with the mapping's credentials already captured.
#[derive(Clone)]
struct ProxyHandler {
    mapping: RegistryMapping,
    upstream_root: Url,
    transport: RedirectFollowingTransport,
}

/// Response body size above which a buffered reader is used to smooth out
/// syscall cadence (spec.md §4.5 step 6).
const LARGE_BODY_THRESHOLD: u64 = 10 * 1024 * 1024;

pub struct ProxyHandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<ProxyHandler>>>,
}

impl ProxyHandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Drop the cached handler for `hostname`, forcing the next request to
    /// rebuild it from the Config Store's current mapping.
    pub fn invalidate(&self, hostname: &str) {
        self.handlers.write().remove(hostname);
    }

    fn get_or_build(&self, mapping: &RegistryMapping) -> Result<Arc<ProxyHandler>, ProxyError> {
        if let Some(handler) = self.handlers.read().get(&mapping.hostname) {
            return Ok(handler.clone());
        }

        let upstream_root = Url::parse(&mapping.remote_url)
            .map_err(|e| ProxyError::InvalidMapping(e.to_string()))?;

        let handler = Arc::new(ProxyHandler {
            mapping: mapping.clone(),
            upstream_root,
            transport: RedirectFollowingTransport::new(),
        });

        // duplicate builds under a race are tolerated; last writer wins.
        let mut handlers = self.handlers.write();
        let entry = handlers
            .entry(mapping.hostname.clone())
            .or_insert_with(|| handler.clone());
        Ok(entry.clone())
    }
}

impl Default for ProxyHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no mapping for host {0:?}")]
    NoMapping(String),
    #[error("invalid mapping: {0}")]
    InvalidMapping(String),
}

/// Entry point for the proxy core: resolve the Host header against the
/// Config Store, build or reuse a handler, and forward the request.
pub async fn proxy_request(
    registry: &ProxyHandlerRegistry,
    config: &ConfigStore,
    hostname: &str,
    method: Method,
    path_and_query: &str,
    mut headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let mapping = match config.get(hostname).await {
        Ok(mapping) => mapping,
        Err(_) => {
            crate::metrics::record_proxy_outcome(hostname, "no_mapping");
            return (StatusCode::NOT_FOUND, "no mapping for this host").into_response();
        }
    };

    let handler = match registry.get_or_build(&mapping) {
        Ok(handler) => handler,
        Err(e) => {
            crate::metrics::record_proxy_outcome(hostname, "invalid_mapping");
            return (StatusCode::BAD_GATEWAY, e.to_string()).into_response();
        }
    };

    let target_url = match handler.upstream_root.join(path_and_query) {
        Ok(url) => url,
        Err(e) => {
            crate::metrics::record_proxy_outcome(hostname, "bad_url");
            return (StatusCode::BAD_GATEWAY, e.to_string()).into_response();
        }
    };

    // director: rewrite Host to the upstream's, inject credentials only if
    // the client didn't already supply Basic auth (spec.md §4.5 step 4).
    if let Some(upstream_host) = target_url.host_str() {
        if let Ok(value) = HeaderValue::from_str(upstream_host) {
            headers.insert(axum::http::header::HOST, value);
        }
    }
    if !headers.contains_key(axum::http::header::AUTHORIZATION) {
        if let Some(creds) = &mapping.credentials {
            let token = base64::engine::general_purpose::STANDARD
                .encode(format!("{}:{}", creds.username.expose(), creds.password.expose()));
            if let Ok(value) = HeaderValue::from_str(&format!("Basic {token}")) {
                headers.insert(axum::http::header::AUTHORIZATION, value);
            }
        }
    }

    let header_pairs: Vec<(String, String)> = headers
        .iter()
        .filter(|(name, _)| *name != axum::http::header::HOST)
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .chain(std::iter::once((
            "host".to_string(),
            target_url.host_str().unwrap_or_default().to_string(),
        )))
        .collect();

    let prepared = PreparedRequest::new(method, target_url, header_pairs);
    // the wire body is not replayed across redirect hops (spec.md §4.4);
    // for non-redirected requests the client's body still needs sending,
    // so we attach it only to the first dispatch via a dedicated request.
    let response = if body.is_empty() {
        handler.transport.roundtrip(prepared).await
    } else {
        send_with_body(&handler.transport, prepared, body).await
    };

    match response {
        Ok(resp) => {
            crate::metrics::record_proxy_outcome(hostname, "ok");
            translate_response(resp).await
        }
        Err(e) => {
            crate::metrics::record_proxy_outcome(hostname, "bad_gateway");
            (StatusCode::BAD_GATEWAY, format!("upstream error: {e}")).into_response()
        }
    }
}

/// Dispatch a body-bearing request directly (no redirect loop): uploads
/// and pushes are never the body-less GETs that upstream CDNs redirect.
async fn send_with_body(
    transport: &RedirectFollowingTransport,
    prepared: PreparedRequest,
    body: axum::body::Bytes,
) -> Result<reqwest::Response, transport::TransportError> {
    let mut builder = transport
        .client()
        .request(prepared.method, prepared.url)
        .body(body);
    for (name, value) in prepared.headers {
        builder = builder.header(name, value);
    }
    Ok(builder.send().await?)
}

async fn translate_response(resp: reqwest::Response) -> Response {
    let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_length = resp.content_length().unwrap_or(0);
    let mut headers = HeaderMap::new();
    for (name, value) in resp.headers().iter() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.insert(name, value);
        }
    }

    let body = if content_length > LARGE_BODY_THRESHOLD {
        // large responses are streamed through a buffered reader to
        // smooth out syscall cadence rather than read fully into memory.
        let stream = resp.bytes_stream();
        Body::from_stream(stream)
    } else {
        match resp.bytes().await {
            Ok(bytes) => Body::from(bytes),
            Err(_) => Body::empty(),
        }
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mappings::memory::MemoryConfigStore;
    use wiremock::matchers::method as http_method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn invalidate_drops_cached_handler() {
        let registry = ProxyHandlerRegistry::new();
        let mapping = RegistryMapping {
            hostname: "docker.io".to_string(),
            remote_url: "https://registry-1.docker.io".to_string(),
            credentials: None,
        };
        let first = registry.get_or_build(&mapping).unwrap();
        let second = registry.get_or_build(&mapping).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        registry.invalidate(&mapping.hostname);
        let third = registry.get_or_build(&mapping).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[tokio::test]
    async fn proxy_request_404s_without_mapping() {
        let registry = ProxyHandlerRegistry::new();
        let config = ConfigStore::new(Box::new(MemoryConfigStore::new()));

        let response = proxy_request(
            &registry,
            &config,
            "unknown.example.com",
            Method::GET,
            "/v2/",
            HeaderMap::new(),
            axum::body::Bytes::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn proxy_request_forwards_and_translates_status() {
        let server = MockServer::start().await;
        Mock::given(http_method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .mount(&server)
            .await;

        let registry = ProxyHandlerRegistry::new();
        let config = ConfigStore::new(Box::new(MemoryConfigStore::with_mappings(vec![
            RegistryMapping {
                hostname: "mirror.example.com".to_string(),
                remote_url: server.uri(),
                credentials: None,
            },
        ])));

        let response = proxy_request(
            &registry,
            &config,
            "mirror.example.com",
            Method::GET,
            "/v2/",
            HeaderMap::new(),
            axum::body::Bytes::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
