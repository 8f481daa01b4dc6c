//! File-backed `ConfigStoreBackend`: the whole mapping table lives as a
//! single JSON document on disk (spec.md §6), rewritten atomically
//! (write-to-tmp + rename) on every mutation so a crash mid-write never
//! corrupts the file a concurrent reader is looking at.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;

use super::{ConfigStoreBackend, ConfigStoreError, RegistryMapping};

pub struct FileConfigStore {
    path: PathBuf,
    mappings: RwLock<HashMap<String, RegistryMapping>>,
}

impl FileConfigStore {
    /// Load mappings from `path` if it exists, else start empty. The file
    /// is created on first successful `put`.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigStoreError> {
        let path = path.into();
        let mappings = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Vec<RegistryMapping>>(&bytes)
                .map_err(|e| ConfigStoreError::Persistence(e.to_string()))?
                .into_iter()
                .map(|m| (m.hostname.clone(), m))
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(ConfigStoreError::Persistence(e.to_string())),
        };

        Ok(Self {
            path,
            mappings: RwLock::new(mappings),
        })
    }

    async fn persist(&self) -> Result<(), ConfigStoreError> {
        let snapshot: Vec<RegistryMapping> = self.mappings.read().values().cloned().collect();
        let body = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| ConfigStoreError::Persistence(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ConfigStoreError::Persistence(e.to_string()))?;
        }

        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &body)
            .await
            .map_err(|e| ConfigStoreError::Persistence(e.to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o644);
            tokio::fs::set_permissions(&tmp_path, perms)
                .await
                .map_err(|e| ConfigStoreError::Persistence(e.to_string()))?;
        }

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| ConfigStoreError::Persistence(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl ConfigStoreBackend for FileConfigStore {
    async fn list(&self) -> Result<Vec<RegistryMapping>, ConfigStoreError> {
        Ok(self.mappings.read().values().cloned().collect())
    }

    async fn get(&self, hostname: &str) -> Result<RegistryMapping, ConfigStoreError> {
        self.mappings
            .read()
            .get(hostname)
            .cloned()
            .ok_or_else(|| ConfigStoreError::NotFound(hostname.to_string()))
    }

    async fn put(&self, mapping: RegistryMapping) -> Result<(), ConfigStoreError> {
        self.mappings.write().insert(mapping.hostname.clone(), mapping);
        self.persist().await
    }

    async fn delete(&self, hostname: &str) -> Result<(), ConfigStoreError> {
        let removed = self.mappings.write().remove(hostname);
        if removed.is_none() {
            return Err(ConfigStoreError::NotFound(hostname.to_string()));
        }
        self.persist().await
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}
