//! In-memory `ContentStoreBackend`.
//!
//! Grounded on `nora-registry/src/registry/docker.rs`'s
//! `UPLOAD_SESSIONS: RwLock<HashMap<String, Vec<u8>>>` pattern for upload
//! sessions, generalized to a full repository/tag/blob store guarded the
//! same way.

use async_trait::async_trait;
use axum::body::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use super::{ContentError, ContentStoreBackend, Digest, StoredBlob, StoredManifest};

#[derive(Default)]
struct RepoData {
    /// tag/digest reference -> manifest (both tags and content digests are
    /// valid keys, per spec.md §4: a manifest pushed by tag is also
    /// addressable by its own digest).
    manifests: HashMap<String, StoredManifest>,
    /// tag name -> digest it currently resolves to, for reference counting.
    tags: HashMap<String, Digest>,
    blobs: HashMap<Digest, Bytes>,
}

#[derive(Default)]
pub struct MemoryContentStore {
    repos: RwLock<HashMap<String, RepoData>>,
    uploads: RwLock<HashMap<String, UploadSession>>,
}

struct UploadSession {
    repository: String,
    data: Vec<u8>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContentStoreBackend for MemoryContentStore {
    async fn list_repositories(&self) -> Result<Vec<String>, ContentError> {
        let mut names: Vec<String> = self.repos.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn list_tags(&self, repository: &str) -> Result<Vec<String>, ContentError> {
        let repos = self.repos.read();
        let repo = repos
            .get(repository)
            .ok_or_else(|| ContentError::RepositoryNotFound(repository.to_string()))?;
        let mut tags: Vec<String> = repo.tags.keys().cloned().collect();
        tags.sort();
        Ok(tags)
    }

    async fn put_manifest(
        &self,
        repository: &str,
        reference: &str,
        manifest: StoredManifest,
    ) -> Result<(), ContentError> {
        let mut repos = self.repos.write();
        let repo = repos.entry(repository.to_string()).or_default();

        repo.manifests.insert(manifest.digest.to_string(), manifest.clone());
        if !crate::validation::is_digest_form(reference) {
            repo.tags.insert(reference.to_string(), manifest.digest.clone());
        }
        repo.manifests.insert(reference.to_string(), manifest);
        Ok(())
    }

    async fn get_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<StoredManifest, ContentError> {
        let repos = self.repos.read();
        let repo = repos
            .get(repository)
            .ok_or_else(|| ContentError::RepositoryNotFound(repository.to_string()))?;
        repo.manifests
            .get(reference)
            .cloned()
            .ok_or_else(|| ContentError::ManifestNotFound {
                repository: repository.to_string(),
                reference: reference.to_string(),
            })
    }

    async fn delete_tag(&self, repository: &str, reference: &str) -> Result<bool, ContentError> {
        let mut repos = self.repos.write();
        let repo = repos
            .get_mut(repository)
            .ok_or_else(|| ContentError::RepositoryNotFound(repository.to_string()))?;

        if !repo.manifests.contains_key(reference) {
            return Err(ContentError::ManifestNotFound {
                repository: repository.to_string(),
                reference: reference.to_string(),
            });
        }

        let digest = if crate::validation::is_digest_form(reference) {
            Digest::parse(reference).ok()
        } else {
            repo.tags.remove(reference)
        };
        repo.manifests.remove(reference);

        // reference counting: only drop the digest-keyed manifest record
        // once no tag still points at it (spec.md's resolved Open Question).
        if let Some(digest) = digest {
            let still_referenced = repo.tags.values().any(|d| *d == digest);
            if !still_referenced {
                repo.manifests.remove(digest.as_str());
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn put_blob(&self, repository: &str, blob: StoredBlob) -> Result<(), ContentError> {
        let mut repos = self.repos.write();
        let repo = repos.entry(repository.to_string()).or_default();
        repo.blobs.insert(blob.digest, blob.bytes);
        Ok(())
    }

    async fn get_blob(&self, repository: &str, digest: &Digest) -> Result<Bytes, ContentError> {
        let repos = self.repos.read();
        let repo = repos
            .get(repository)
            .ok_or_else(|| ContentError::RepositoryNotFound(repository.to_string()))?;
        repo.blobs
            .get(digest)
            .cloned()
            .ok_or_else(|| ContentError::BlobNotFound(digest.to_string()))
    }

    async fn has_blob(&self, repository: &str, digest: &Digest) -> bool {
        self.repos
            .read()
            .get(repository)
            .map(|repo| repo.blobs.contains_key(digest))
            .unwrap_or(false)
    }

    async fn delete_blob(&self, repository: &str, digest: &Digest) -> Result<(), ContentError> {
        let mut repos = self.repos.write();
        let repo = repos
            .get_mut(repository)
            .ok_or_else(|| ContentError::RepositoryNotFound(repository.to_string()))?;
        repo.blobs
            .remove(digest)
            .map(|_| ())
            .ok_or_else(|| ContentError::BlobNotFound(digest.to_string()))
    }

    async fn start_upload(&self, repository: &str) -> Result<String, ContentError> {
        let session_id = Uuid::new_v4().to_string();
        self.uploads.write().insert(
            session_id.clone(),
            UploadSession {
                repository: repository.to_string(),
                data: Vec::new(),
            },
        );
        Ok(session_id)
    }

    async fn append_upload(&self, session_id: &str, chunk: &[u8]) -> Result<u64, ContentError> {
        let mut uploads = self.uploads.write();
        let session = uploads
            .get_mut(session_id)
            .ok_or_else(|| ContentError::UploadNotFound(session_id.to_string()))?;
        session.data.extend_from_slice(chunk);
        Ok(session.data.len() as u64)
    }

    async fn finish_upload(
        &self,
        repository: &str,
        session_id: &str,
        expected_digest: &Digest,
    ) -> Result<(), ContentError> {
        // Validate before removing the session: only `finalized`/`aborted`
        // are terminal states (spec.md §3), so a digest mismatch must
        // leave the session in place for a client to retry.
        let computed = {
            let uploads = self.uploads.read();
            let session = uploads
                .get(session_id)
                .ok_or_else(|| ContentError::UploadNotFound(session_id.to_string()))?;

            if session.repository != repository {
                return Err(ContentError::UploadNotFound(session_id.to_string()));
            }

            let computed = Digest::of(&session.data);
            if &computed != expected_digest {
                return Err(ContentError::DigestMismatch {
                    expected: expected_digest.to_string(),
                    computed: computed.to_string(),
                });
            }
            computed
        };

        let session = self
            .uploads
            .write()
            .remove(session_id)
            .ok_or_else(|| ContentError::UploadNotFound(session_id.to_string()))?;

        let mut repos = self.repos.write();
        let repo = repos.entry(repository.to_string()).or_default();
        repo.blobs.insert(computed, Bytes::from(session.data));
        Ok(())
    }

    async fn upload_offset(&self, session_id: &str) -> Result<u64, ContentError> {
        self.uploads
            .read()
            .get(session_id)
            .map(|s| s.data.len() as u64)
            .ok_or_else(|| ContentError::UploadNotFound(session_id.to_string()))
    }

    async fn abort_upload(&self, session_id: &str) -> Result<(), ContentError> {
        self.uploads
            .write()
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| ContentError::UploadNotFound(session_id.to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
