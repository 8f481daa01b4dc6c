// Copyright (c) 2026 Volkov Pavel | DevITWay
// SPDX-License-Identifier: MIT

//! warden-registry: a multi-tenant OCI/Docker registry gateway combining
//! a host-aware reverse proxy, an on-the-fly TLS certificate authority,
//! and a local V2 registry protocol engine behind one set of listeners.

pub mod admin;
pub mod ca;
pub mod config;
pub mod content;
pub mod error;
pub mod gateway;
pub mod mappings;
pub mod metrics;
pub mod proxy;
pub mod rate_limit;
pub mod registry_v2;
pub mod request_id;
pub mod secrets;
pub mod validation;

use std::sync::Arc;

use ca::RootCa;
use content::ContentStore;
use mappings::ConfigStore;
use proxy::ProxyHandlerRegistry;
use rate_limit::RateLimitConfig;

/// Shared application state handed to every handler via axum's `State`
/// extractor, mirroring the teacher's `Arc<AppState>` convention.
pub struct AppState {
    pub content: ContentStore,
    pub mappings: Arc<ConfigStore>,
    pub proxy_registry: Arc<ProxyHandlerRegistry>,
    pub ca: Option<Arc<RootCa>>,
    pub rate_limits: RateLimitConfig,
    pub admin_api_enabled: bool,
}

impl AppState {
    pub fn new(
        content: ContentStore,
        mappings: Arc<ConfigStore>,
        proxy_registry: Arc<ProxyHandlerRegistry>,
        ca: Option<Arc<RootCa>>,
        rate_limits: RateLimitConfig,
        admin_api_enabled: bool,
    ) -> Self {
        Self {
            content,
            mappings,
            proxy_registry,
            ca,
            rate_limits,
            admin_api_enabled,
        }
    }
}
