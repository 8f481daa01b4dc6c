// Copyright (c) 2026 Volkov Pavel | DevITWay
// SPDX-License-Identifier: MIT

//! Process configuration (spec.md §6's CLI surface) and the built-in
//! default mapping table (spec.md §6 "Defaults seeded on startup").
//!
//! Grounded on `nora-registry/src/config.rs`'s env-override-after-parse
//! pattern, generalized from a TOML file to `clap`-derived flags since
//! this gateway's process configuration is entirely CLI/env driven.

use clap::{Parser, ValueEnum};
use std::env;
use std::path::PathBuf;

use crate::mappings::RegistryMapping;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum ConfigStoreType {
    Memory,
    File,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "warden", version, about = "Multi-tenant OCI/Docker registry gateway")]
pub struct GatewayConfig {
    /// Plain HTTP bind address for the reverse-proxy/registry surface.
    #[arg(long, env = "WARDEN_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: String,

    /// TLS bind address for the reverse-proxy/registry surface.
    #[arg(long, env = "WARDEN_LISTEN_TLS", default_value = "0.0.0.0:8443")]
    pub listen_tls: String,

    /// Optional separate HTTPS bind address for the local V2 registry only.
    #[arg(long, env = "WARDEN_REGISTRY_TLS")]
    pub registry_tls: Option<String>,

    /// Operator-supplied PEM certificate chain. Requires `--key-file`.
    #[arg(long, env = "WARDEN_CERT_FILE")]
    pub cert_file: Option<PathBuf>,

    /// Operator-supplied PEM private key. Requires `--cert-file`.
    #[arg(long, env = "WARDEN_KEY_FILE")]
    pub key_file: Option<PathBuf>,

    /// Mint certificates via the built-in CA when no static pair is given.
    #[arg(long, env = "WARDEN_AUTO_TLS", default_value_t = true)]
    pub auto_tls: bool,

    /// Directory holding (or to create) the root CA's PEM cert/key.
    #[arg(long, env = "WARDEN_CA_DIR", default_value = "./data/ca")]
    pub ca_dir: PathBuf,

    /// Config Store backend.
    #[arg(long, value_enum, env = "WARDEN_CONFIG_TYPE", default_value = "memory")]
    pub config_type: ConfigStoreType,

    /// Path to the Config Store's JSON file. Required when `--config-type file`.
    #[arg(long, env = "WARDEN_CONFIG_PATH")]
    pub config_path: Option<PathBuf>,

    /// Content Store backend.
    #[arg(long, value_enum, env = "WARDEN_CONTENT_TYPE", default_value = "memory")]
    pub content_type: ConfigStoreType,

    /// Root directory for the file-backed Content Store. Required when
    /// `--content-type file`.
    #[arg(long, env = "WARDEN_CONTENT_PATH")]
    pub content_path: Option<PathBuf>,

    /// Enable the Admin API surface.
    #[arg(long, env = "WARDEN_ADMIN_API", default_value_t = false)]
    pub admin_api: bool,

    /// Bind address for the Admin API, when enabled.
    #[arg(long, env = "WARDEN_ADMIN_ADDR", default_value = "127.0.0.1:9090")]
    pub admin_addr: String,
}

impl GatewayConfig {
    /// Parse CLI flags (with env fallbacks already wired via `clap`'s
    /// `env = ...` attributes) and validate cross-field requirements that
    /// `clap` alone can't express.
    pub fn load() -> Result<Self, String> {
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.config_type == ConfigStoreType::File && self.config_path.is_none() {
            return Err("--config-path is required when --config-type=file".into());
        }
        if self.content_type == ConfigStoreType::File && self.content_path.is_none() {
            return Err("--content-path is required when --content-type=file".into());
        }
        if self.cert_file.is_some() != self.key_file.is_some() {
            return Err("--cert-file and --key-file must be given together".into());
        }
        Ok(())
    }

    pub fn has_static_cert(&self) -> bool {
        self.cert_file.is_some() && self.key_file.is_some()
    }
}

/// Hostnames pre-populated into the ConfigStore on startup, per spec.md §6.
const DEFAULT_MAPPINGS: &[(&str, &str)] = &[
    ("docker.io", "https://registry-1.docker.io"),
    ("registry-1.docker.io", "https://registry-1.docker.io"),
    ("auth.docker.io", "https://auth.docker.io"),
    ("gcr.io", "https://gcr.io"),
    ("k8s.gcr.io", "https://k8s.gcr.io"),
    ("quay.io", "https://quay.io"),
    ("ghcr.io", "https://ghcr.io"),
    ("registry.k8s.io", "https://registry.k8s.io"),
    ("mcr.microsoft.com", "https://mcr.microsoft.com"),
];

pub fn default_mappings() -> Vec<RegistryMapping> {
    DEFAULT_MAPPINGS
        .iter()
        .map(|(hostname, remote_url)| RegistryMapping {
            hostname: hostname.to_string(),
            remote_url: remote_url.to_string(),
            credentials: None,
        })
        .collect()
}

/// Parse `REGISTRY_MAPPINGS=host1=url1,host2=url2,...` per spec.md §6.
/// Whitespace is trimmed; malformed entries are skipped (the caller logs
/// a warning per entry).
pub fn parse_env_mappings() -> Vec<RegistryMapping> {
    let Ok(raw) = env::var("REGISTRY_MAPPINGS") else {
        return Vec::new();
    };
    parse_mapping_string(&raw)
}

fn parse_mapping_string(raw: &str) -> Vec<RegistryMapping> {
    raw.split(',')
        .filter_map(|pair| {
            let pair = pair.trim();
            if pair.is_empty() {
                return None;
            }
            let (hostname, remote_url) = pair.split_once('=')?;
            let hostname = hostname.trim().to_string();
            let remote_url = remote_url.trim().to_string();
            if hostname.is_empty() || remote_url.is_empty() {
                return None;
            }
            Some(RegistryMapping {
                hostname,
                remote_url,
                credentials: None,
            })
        })
        .collect()
}
