#![allow(dead_code)]
//! Rate limiting configuration and middleware
//!
//! Tiers:
//! - `admin`: protects the Admin API, which mutates shared routing state
//! - `upload`: the V2 upload endpoints, tuned for Docker's parallel pushes
//! - `general`: manifest/blob reads, catalog, and proxy passthrough

use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::GovernorLayer;

/// Rate limit configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub admin_rps: u32,
    pub admin_burst: u32,
    pub upload_rps: u32,
    pub upload_burst: u32,
    pub general_rps: u32,
    pub general_burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            admin_rps: 2,
            admin_burst: 10,
            upload_rps: 200,
            upload_burst: 500,
            general_rps: 100,
            general_burst: 200,
        }
    }
}

type Layer = GovernorLayer<PeerIpKeyExtractor, governor::middleware::StateInformationMiddleware, axum::body::Body>;

pub fn admin_rate_limiter(config: &RateLimitConfig) -> Layer {
    let governor_config = GovernorConfigBuilder::default()
        .per_second(config.admin_rps as u64)
        .burst_size(config.admin_burst)
        .use_headers()
        .finish()
        .expect("static governor configuration is valid");
    GovernorLayer::new(governor_config)
}

pub fn upload_rate_limiter(config: &RateLimitConfig) -> Layer {
    let governor_config = GovernorConfigBuilder::default()
        .per_second(config.upload_rps as u64)
        .burst_size(config.upload_burst)
        .use_headers()
        .finish()
        .expect("static governor configuration is valid");
    GovernorLayer::new(governor_config)
}

pub fn general_rate_limiter(config: &RateLimitConfig) -> Layer {
    let governor_config = GovernorConfigBuilder::default()
        .per_second(config.general_rps as u64)
        .burst_size(config.general_burst)
        .use_headers()
        .finish()
        .expect("static governor configuration is valid");
    GovernorLayer::new(governor_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = RateLimitConfig::default();
        assert_eq!(config.admin_rps, 2);
        assert_eq!(config.upload_rps, 200);
        assert_eq!(config.general_rps, 100);
    }

    #[test]
    fn limiter_construction() {
        let config = RateLimitConfig::default();
        let _ = admin_rate_limiter(&config);
        let _ = upload_rate_limiter(&config);
        let _ = general_rate_limiter(&config);
    }
}
