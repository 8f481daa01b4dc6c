//! Config Store: persistence and lookup for host-to-upstream routing
//! mappings (spec.md §3, §5).
//!
//! Grounded on `nora-registry/src/storage/mod.rs`'s trait + `Arc<dyn ..>`
//! wrapper pattern: a small async trait for the backend, a thin owning
//! wrapper type that validates at the boundary and is what the rest of the
//! crate depends on.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::secrets::ProtectedString;
use crate::validation::{validate_hostname, validate_upstream_url, ValidationError};

/// A single host-aware routing rule: requests whose SNI/Host match
/// `hostname` are proxied to `remote_url`, optionally injecting
/// `credentials` as HTTP Basic auth when the client didn't supply its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryMapping {
    pub hostname: String,
    pub remote_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<MappingCredentials>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MappingCredentials {
    pub username: ProtectedString,
    pub password: ProtectedString,
}

impl RegistryMapping {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_hostname(&self.hostname)?;
        validate_upstream_url(&self.remote_url)?;
        Ok(())
    }

    /// Returns a copy with `credentials` redacted, safe to hand back over
    /// the Admin API.
    pub fn sanitized(&self) -> Self {
        Self {
            hostname: self.hostname.clone(),
            remote_url: self.remote_url.clone(),
            credentials: self.credentials.as_ref().map(|_| MappingCredentials {
                username: ProtectedString::from("***"),
                password: ProtectedString::from("***"),
            }),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigStoreError {
    #[error("mapping not found for host {0:?}")]
    NotFound(String),
    #[error("mapping already exists for host {0:?}")]
    Conflict(String),
    #[error("invalid mapping: {0}")]
    Invalid(#[from] ValidationError),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl ConfigStoreError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Invalid(_) => StatusCode::BAD_REQUEST,
            Self::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "HOST_UNKNOWN",
            Self::Conflict(_) => "HOST_CONFLICT",
            Self::Invalid(_) => "MAPPING_INVALID",
            Self::Persistence(_) => "UNKNOWN",
        }
    }
}

/// Backend-agnostic storage for `RegistryMapping`s.
#[async_trait]
pub trait ConfigStoreBackend: Send + Sync {
    async fn list(&self) -> Result<Vec<RegistryMapping>, ConfigStoreError>;
    async fn get(&self, hostname: &str) -> Result<RegistryMapping, ConfigStoreError>;
    async fn put(&self, mapping: RegistryMapping) -> Result<(), ConfigStoreError>;
    async fn delete(&self, hostname: &str) -> Result<(), ConfigStoreError>;
    fn backend_name(&self) -> &'static str;
}

impl fmt::Debug for dyn ConfigStoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConfigStoreBackend({})", self.backend_name())
    }
}

/// Owning wrapper over a `ConfigStoreBackend`, validating mappings at the
/// boundary before they ever reach a backend.
pub struct ConfigStore {
    backend: Box<dyn ConfigStoreBackend>,
}

impl ConfigStore {
    pub fn new(backend: Box<dyn ConfigStoreBackend>) -> Self {
        Self { backend }
    }

    pub async fn list(&self) -> Result<Vec<RegistryMapping>, ConfigStoreError> {
        self.backend.list().await
    }

    /// Same as `list`, but with credentials redacted — used by the Admin
    /// API per SPEC_FULL.md's Admin Surface module.
    pub async fn list_sanitized(&self) -> Result<Vec<RegistryMapping>, ConfigStoreError> {
        Ok(self
            .backend
            .list()
            .await?
            .into_iter()
            .map(|m| m.sanitized())
            .collect())
    }

    pub async fn get(&self, hostname: &str) -> Result<RegistryMapping, ConfigStoreError> {
        self.backend.get(hostname).await
    }

    pub async fn put(&self, mapping: RegistryMapping) -> Result<(), ConfigStoreError> {
        mapping.validate()?;
        self.backend.put(mapping).await
    }

    pub async fn delete(&self, hostname: &str) -> Result<(), ConfigStoreError> {
        self.backend.delete(hostname).await
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitized_redacts_credentials() {
        let mapping = RegistryMapping {
            hostname: "docker.io".into(),
            remote_url: "https://registry-1.docker.io".into(),
            credentials: Some(MappingCredentials {
                username: "alice".into(),
                password: "hunter2".into(),
            }),
        };
        let sanitized = mapping.sanitized();
        let creds = sanitized.credentials.expect("credentials present");
        assert_eq!(creds.username.expose(), "***");
        assert_eq!(creds.password.expose(), "***");
    }

    #[test]
    fn debug_format_never_leaks_credentials() {
        let mapping = RegistryMapping {
            hostname: "docker.io".into(),
            remote_url: "https://registry-1.docker.io".into(),
            credentials: Some(MappingCredentials {
                username: "alice".into(),
                password: "hunter2".into(),
            }),
        };
        let debug_output = format!("{mapping:?}");
        assert!(!debug_output.contains("hunter2"));
        assert!(!debug_output.contains("alice"));
    }

    #[test]
    fn validate_rejects_bad_hostname_and_url() {
        let bad_host = RegistryMapping {
            hostname: "".into(),
            remote_url: "https://registry-1.docker.io".into(),
            credentials: None,
        };
        assert!(bad_host.validate().is_err());

        let bad_url = RegistryMapping {
            hostname: "docker.io".into(),
            remote_url: "not-a-url".into(),
            credentials: None,
        };
        assert!(bad_url.validate().is_err());
    }
}
