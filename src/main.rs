// Copyright (c) 2026 Volkov Pavel | DevITWay
// SPDX-License-Identifier: MIT

use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use warden_registry::ca::RootCa;
use warden_registry::config::{self, ConfigStoreType, GatewayConfig};
use warden_registry::content::file::FileContentStore;
use warden_registry::content::memory::MemoryContentStore;
use warden_registry::content::ContentStore;
use warden_registry::gateway;
use warden_registry::mappings::file::FileConfigStore;
use warden_registry::mappings::memory::MemoryConfigStore;
use warden_registry::mappings::ConfigStore;
use warden_registry::proxy::ProxyHandlerRegistry;
use warden_registry::rate_limit::RateLimitConfig;
use warden_registry::AppState;

#[tokio::main]
async fn main() {
    init_logging();

    let config = match GatewayConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        error!(error = %e, "fatal startup failure");
        std::process::exit(1);
    }

    info!("warden-registry shutdown complete");
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json().with_target(true))
        .init();
}

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("config store init failed: {0}")]
    ConfigStore(#[from] warden_registry::mappings::ConfigStoreError),
    #[error("ca init failed: {0}")]
    Ca(#[from] warden_registry::ca::CaError),
    #[error(transparent)]
    Gateway(#[from] warden_registry::gateway::GatewayError),
}

async fn run(config: GatewayConfig) -> Result<(), StartupError> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("no other rustls crypto provider installed");

    let mappings = build_config_store(&config).await?;
    seed_mappings(&mappings).await;

    let content = build_content_store(&config);

    let ca = RootCa::load_or_generate(
        &config.ca_dir.join("ca-cert.pem"),
        &config.ca_dir.join("ca-key.pem"),
    )
    .await?;
    info!(dir = %config.ca_dir.display(), "root CA ready");

    let state = Arc::new(AppState::new(
        content,
        Arc::new(mappings),
        Arc::new(ProxyHandlerRegistry::new()),
        Some(Arc::new(ca)),
        RateLimitConfig::default(),
        config.admin_api,
    ));

    info!(
        listen = %config.listen,
        listen_tls = %config.listen_tls,
        admin_api = config.admin_api,
        config_backend = state.mappings.backend_name(),
        content_backend = state.content.backend_name(),
        "warden-registry starting"
    );

    gateway::run(state, &config).await?;
    Ok(())
}

async fn build_config_store(config: &GatewayConfig) -> Result<ConfigStore, StartupError> {
    let store = match config.config_type {
        ConfigStoreType::Memory => ConfigStore::new(Box::new(MemoryConfigStore::new())),
        ConfigStoreType::File => {
            let path = config
                .config_path
                .as_ref()
                .expect("validated by GatewayConfig::load");
            let backend = FileConfigStore::load(path).await?;
            ConfigStore::new(Box::new(backend))
        }
    };
    Ok(store)
}

fn build_content_store(config: &GatewayConfig) -> ContentStore {
    match config.content_type {
        ConfigStoreType::Memory => ContentStore::new(Box::new(MemoryContentStore::new())),
        ConfigStoreType::File => {
            let path = config
                .content_path
                .as_ref()
                .expect("validated by GatewayConfig::load");
            ContentStore::new(Box::new(FileContentStore::new(path.clone())))
        }
    }
}

/// Seed the ConfigStore with the built-in defaults (skipping hosts already
/// present), then overlay `REGISTRY_MAPPINGS` (spec.md §6).
async fn seed_mappings(store: &ConfigStore) {
    for mapping in config::default_mappings() {
        if store.get(&mapping.hostname).await.is_ok() {
            continue;
        }
        if let Err(e) = store.put(mapping.clone()).await {
            warn!(hostname = %mapping.hostname, error = %e, "failed to seed default mapping");
        }
    }

    for mapping in config::parse_env_mappings() {
        let hostname = mapping.hostname.clone();
        if let Err(e) = store.put(mapping).await {
            warn!(hostname = %hostname, error = %e, "failed to apply REGISTRY_MAPPINGS entry");
        }
    }
}
