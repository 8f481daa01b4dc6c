//! Redirect-Following Transport (spec.md §4.4): replays the original
//! method and headers (never the body) against a 3xx's `Location`, up to
//! five hops, so the final response carries headers that belong to the
//! artifact rather than the redirect.
//!
//! Grounded on `nora-registry/src/registry/docker_auth.rs`'s
//! `fetch_with_auth` retry-on-401 loop, generalized from a single retry
//! to a bounded redirect loop.

use reqwest::{Client, Method, RequestBuilder, Response, Url};
use std::time::Duration;
use thiserror::Error;

const MAX_REDIRECTS: u8 = 5;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("redirect response missing Location header")]
    MissingLocation,
    #[error("redirect Location header was not valid UTF-8/URL: {0}")]
    InvalidLocation(String),
}

/// An HTTP client whose `roundtrip` manually follows redirects so it can
/// replay the original method and headers rather than reqwest's default
/// (which drops Authorization across cross-origin hops and replays GET
/// unconditionally regardless of original method).
#[derive(Clone)]
pub struct RedirectFollowingTransport {
    client: Client,
}

impl RedirectFollowingTransport {
    /// Builds a client tuned per spec.md §4.5's Proxy Handler Registry
    /// contract: TLS verification disabled (upstream CDNs frequently
    /// present certs the gateway has no reason to validate against),
    /// generous idle/keep-alive windows, and redirects disabled so this
    /// type's own loop is the only one in control.
    ///
    /// `read_timeout` stands in for spec.md §4.5 step 3's 30-minute
    /// response-header timeout: reqwest has no separate header-only
    /// timeout, so this bounds the time waiting on *any* read after the
    /// request is sent, header or body. The spec's global 100-max-idle-
    /// connections cap has no `reqwest`/hyper equivalent either — only
    /// the per-host cap below is settable (noted in DESIGN.md).
    pub fn new() -> Self {
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(5 * 60))
            .tcp_keepalive(Duration::from_secs(30 * 60))
            .pool_idle_timeout(Duration::from_secs(60 * 60))
            .pool_max_idle_per_host(20)
            .read_timeout(Duration::from_secs(30 * 60))
            .gzip(true)
            .build()
            .expect("static transport configuration is valid");
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Dispatch `request`, following up to `MAX_REDIRECTS` 3xx hops. The
    /// original method and headers are replayed on each hop; the body is
    /// not (registries only redirect body-less GETs against blob storage,
    /// where this is correct).
    pub async fn roundtrip(&self, request: PreparedRequest) -> Result<Response, TransportError> {
        let mut current_url = request.url.clone();
        let mut response = self.dispatch(&request, &current_url).await?;

        for _ in 0..MAX_REDIRECTS {
            if !is_redirect(response.status().as_u16()) {
                return Ok(response);
            }

            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or(TransportError::MissingLocation)?
                .to_string();

            current_url = current_url
                .join(&location)
                .map_err(|e| TransportError::InvalidLocation(e.to_string()))?;

            drop(response);
            response = self.dispatch(&request, &current_url).await?;
        }

        Ok(response)
    }

    async fn dispatch(&self, request: &PreparedRequest, url: &Url) -> Result<Response, TransportError> {
        let mut builder: RequestBuilder = self.client.request(request.method.clone(), url.clone());
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        Ok(builder.send().await?)
    }
}

impl Default for RedirectFollowingTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307)
}

/// The original request, captured once so it can be replayed verbatim
/// (minus body) across redirect hops.
#[derive(Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
}

impl PreparedRequest {
    pub fn new(method: Method, url: Url, headers: Vec<(String, String)>) -> Self {
        Self { method, url, headers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn follows_redirect_and_replays_headers() {
        let upstream = MockServer::start().await;
        let cdn = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/blobs/sha256:abc"))
            .and(header("authorization", "Bearer token123"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"blob-bytes".to_vec()))
            .mount(&cdn)
            .await;

        let redirect_target = format!("{}/blobs/sha256:abc", cdn.uri());
        Mock::given(method("GET"))
            .and(path("/v2/blobs/sha256:abc"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("Location", redirect_target.as_str()),
            )
            .mount(&upstream)
            .await;

        let transport = RedirectFollowingTransport::new();
        let url = Url::parse(&format!("{}/v2/blobs/sha256:abc", upstream.uri())).unwrap();
        let request = PreparedRequest::new(
            Method::GET,
            url,
            vec![("authorization".to_string(), "Bearer token123".to_string())],
        );

        let response = transport.roundtrip(request).await.unwrap();
        assert_eq!(response.status(), 200);
        let body = response.bytes().await.unwrap();
        assert_eq!(&body[..], b"blob-bytes");
    }

    #[tokio::test]
    async fn gives_up_after_five_hops() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/next"))
            .mount(&server)
            .await;

        let transport = RedirectFollowingTransport::new();
        let url = Url::parse(&server.uri()).unwrap();
        let request = PreparedRequest::new(Method::GET, url, vec![]);

        let response = transport.roundtrip(request).await.unwrap();
        assert_eq!(response.status(), 302);
    }

    #[tokio::test]
    async fn non_redirect_response_returned_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .mount(&server)
            .await;

        let transport = RedirectFollowingTransport::new();
        let url = Url::parse(&server.uri()).unwrap();
        let request = PreparedRequest::new(Method::GET, url, vec![]);

        let response = transport.roundtrip(request).await.unwrap();
        assert_eq!(response.status(), 200);
    }
}
