//! In-memory `ConfigStoreBackend`, grounded on `nora-registry/src/docker_auth.rs`'s
//! `RwLock<HashMap<..>>` cache shape.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{ConfigStoreBackend, ConfigStoreError, RegistryMapping};

#[derive(Default)]
pub struct MemoryConfigStore {
    mappings: RwLock<HashMap<String, RegistryMapping>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an initial set of mappings, e.g. from
    /// `REGISTRY_MAPPINGS` or a defaults table (spec.md §6).
    pub fn with_mappings(mappings: Vec<RegistryMapping>) -> Self {
        let store = Self::new();
        let mut guard = store.mappings.write();
        for mapping in mappings {
            guard.insert(mapping.hostname.clone(), mapping);
        }
        drop(guard);
        store
    }
}

#[async_trait]
impl ConfigStoreBackend for MemoryConfigStore {
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
        // last writer wins, matching the teacher's duplicate-insert tolerance
        self.mappings.write().insert(mapping.hostname.clone(), mapping);
        Ok(())
    }

    async fn delete(&self, hostname: &str) -> Result<(), ConfigStoreError> {
        self.mappings
            .write()
            .remove(hostname)
            .map(|_| ())
            .ok_or_else(|| ConfigStoreError::NotFound(hostname.to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(host: &str) -> RegistryMapping {
        RegistryMapping {
            hostname: host.to_string(),
            remote_url: "https://registry-1.docker.io".to_string(),
            credentials: None,
        }
    }

    #[tokio::test]
    async fn put_get_list_delete_roundtrip() {
        let store = MemoryConfigStore::new();
        store.put(mapping("docker.io")).await.unwrap();

        let got = store.get("docker.io").await.unwrap();
        assert_eq!(got.hostname, "docker.io");

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);

        store.delete("docker.io").await.unwrap();
        assert!(matches!(
            store.get("docker.io").await,
            Err(ConfigStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let store = MemoryConfigStore::new();
        assert!(matches!(
            store.delete("ghost.io").await,
            Err(ConfigStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn put_is_last_writer_wins() {
        let store = MemoryConfigStore::new();
        store.put(mapping("docker.io")).await.unwrap();
        let mut second = mapping("docker.io");
        second.remote_url = "https://mirror.example.com".to_string();
        store.put(second).await.unwrap();

        let got = store.get("docker.io").await.unwrap();
        assert_eq!(got.remote_url, "https://mirror.example.com");
    }

    #[tokio::test]
    async fn with_mappings_seeds_store() {
        let store = MemoryConfigStore::with_mappings(vec![mapping("a.io"), mapping("b.io")]);
        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
