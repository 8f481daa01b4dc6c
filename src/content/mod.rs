//! Content Store: the local half of the V2 registry engine's persistence
//! (spec.md §3, §4). Holds repositories, tags, manifests, blobs, and
//! in-progress upload sessions.
//!
//! Grounded on `nora-registry/src/storage/mod.rs`'s `StorageBackend`
//! trait + validating wrapper, and `nora-registry/src/registry/docker.rs`'s
//! `UPLOAD_SESSIONS` cache and digest-on-write pattern.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::StatusCode;
use sha2::Digest as _;
use std::fmt;

use crate::validation::ValidationError;

/// A content digest, always `sha256:<64 lowercase hex>` (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(String);

impl Digest {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        crate::validation::validate_digest(raw)?;
        Ok(Self(raw.to_string()))
    }

    /// Compute the digest of `data`.
    pub fn of(data: &[u8]) -> Self {
        let hash = sha2::Sha256::digest(data);
        Self(format!("sha256:{:x}", hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A stored manifest: raw bytes plus the media type inferred at write time.
#[derive(Debug, Clone)]
pub struct StoredManifest {
    pub digest: Digest,
    pub media_type: String,
    pub bytes: Bytes,
}

/// A stored blob layer.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub digest: Digest,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ContentError {
    #[error("repository {0:?} not found")]
    RepositoryNotFound(String),
    #[error("manifest {reference:?} not found in {repository:?}")]
    ManifestNotFound { repository: String, reference: String },
    #[error("blob {0} not found")]
    BlobNotFound(String),
    #[error("upload session {0} not found")]
    UploadNotFound(String),
    #[error("digest mismatch: expected {expected}, computed {computed}")]
    DigestMismatch { expected: String, computed: String },
    #[error("invalid content: {0}")]
    Invalid(#[from] ValidationError),
    #[error("storage failure: {0}")]
    Storage(String),
}

impl ContentError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::RepositoryNotFound(_) => "NAME_UNKNOWN",
            Self::ManifestNotFound { .. } => "MANIFEST_UNKNOWN",
            Self::BlobNotFound(_) => "BLOB_UNKNOWN",
            Self::UploadNotFound(_) => "BLOB_UPLOAD_UNKNOWN",
            Self::DigestMismatch { .. } => "DIGEST_INVALID",
            Self::Invalid(_) => "NAME_INVALID",
            Self::Storage(_) => "UNKNOWN",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::RepositoryNotFound(_)
            | Self::ManifestNotFound { .. }
            | Self::BlobNotFound(_)
            | Self::UploadNotFound(_) => StatusCode::NOT_FOUND,
            Self::DigestMismatch { .. } | Self::Invalid(_) => StatusCode::BAD_REQUEST,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Backend-agnostic storage for registry content.
#[async_trait]
pub trait ContentStoreBackend: Send + Sync {
    async fn list_repositories(&self) -> Result<Vec<String>, ContentError>;
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>, ContentError>;

    async fn put_manifest(
        &self,
        repository: &str,
        reference: &str,
        manifest: StoredManifest,
    ) -> Result<(), ContentError>;
    async fn get_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<StoredManifest, ContentError>;
    /// Delete a tag. Returns `true` if the underlying digest record was
    /// also removed (no other tag referenced it).
    async fn delete_tag(&self, repository: &str, reference: &str) -> Result<bool, ContentError>;

    async fn put_blob(&self, repository: &str, blob: StoredBlob) -> Result<(), ContentError>;
    async fn get_blob(&self, repository: &str, digest: &Digest) -> Result<Bytes, ContentError>;
    async fn has_blob(&self, repository: &str, digest: &Digest) -> bool;
    async fn delete_blob(&self, repository: &str, digest: &Digest) -> Result<(), ContentError>;

    /// Begin a resumable upload session, returning its session id.
    async fn start_upload(&self, repository: &str) -> Result<String, ContentError>;
    /// Append a chunk, returning the new total byte offset.
    async fn append_upload(&self, session_id: &str, chunk: &[u8]) -> Result<u64, ContentError>;
    /// Finish an upload, verifying `expected_digest` against the
    /// accumulated bytes and persisting as a blob on success.
    async fn finish_upload(
        &self,
        repository: &str,
        session_id: &str,
        expected_digest: &Digest,
    ) -> Result<(), ContentError>;
    async fn upload_offset(&self, session_id: &str) -> Result<u64, ContentError>;
    /// Abort an in-progress upload, discarding accumulated bytes.
    async fn abort_upload(&self, session_id: &str) -> Result<(), ContentError>;

    fn backend_name(&self) -> &'static str;
}

impl fmt::Debug for dyn ContentStoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentStoreBackend({})", self.backend_name())
    }
}

/// Owning wrapper over a `ContentStoreBackend`, validating identifiers at
/// the boundary before any of them reach a backend.
pub struct ContentStore {
    backend: Box<dyn ContentStoreBackend>,
}

impl ContentStore {
    pub fn new(backend: Box<dyn ContentStoreBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    pub async fn list_repositories(&self) -> Result<Vec<String>, ContentError> {
        self.backend.list_repositories().await
    }

    pub async fn list_tags(&self, repository: &str) -> Result<Vec<String>, ContentError> {
        crate::validation::validate_repository(repository)?;
        self.backend.list_tags(repository).await
    }

    pub async fn put_manifest(
        &self,
        repository: &str,
        reference: &str,
        bytes: Bytes,
        media_type: String,
    ) -> Result<Digest, ContentError> {
        crate::validation::validate_repository(repository)?;
        crate::validation::validate_reference(reference)?;
        let digest = Digest::of(&bytes);
        let manifest = StoredManifest {
            digest: digest.clone(),
            media_type,
            bytes,
        };
        self.backend.put_manifest(repository, reference, manifest).await?;
        Ok(digest)
    }

    pub async fn get_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<StoredManifest, ContentError> {
        crate::validation::validate_repository(repository)?;
        crate::validation::validate_reference(reference)?;
        self.backend.get_manifest(repository, reference).await
    }

    pub async fn delete_tag(&self, repository: &str, reference: &str) -> Result<bool, ContentError> {
        crate::validation::validate_repository(repository)?;
        crate::validation::validate_reference(reference)?;
        self.backend.delete_tag(repository, reference).await
    }

    pub async fn put_blob(&self, repository: &str, bytes: Bytes) -> Result<Digest, ContentError> {
        crate::validation::validate_repository(repository)?;
        let digest = Digest::of(&bytes);
        self.backend
            .put_blob(repository, StoredBlob { digest: digest.clone(), bytes })
            .await?;
        Ok(digest)
    }

    pub async fn get_blob(&self, repository: &str, digest: &Digest) -> Result<Bytes, ContentError> {
        crate::validation::validate_repository(repository)?;
        self.backend.get_blob(repository, digest).await
    }

    pub async fn has_blob(&self, repository: &str, digest: &Digest) -> bool {
        self.backend.has_blob(repository, digest).await
    }

    pub async fn delete_blob(&self, repository: &str, digest: &Digest) -> Result<(), ContentError> {
        crate::validation::validate_repository(repository)?;
        self.backend.delete_blob(repository, digest).await
    }

    pub async fn start_upload(&self, repository: &str) -> Result<String, ContentError> {
        crate::validation::validate_repository(repository)?;
        self.backend.start_upload(repository).await
    }

    pub async fn append_upload(&self, session_id: &str, chunk: &[u8]) -> Result<u64, ContentError> {
        self.backend.append_upload(session_id, chunk).await
    }

    pub async fn finish_upload(
        &self,
        repository: &str,
        session_id: &str,
        expected_digest: &Digest,
    ) -> Result<(), ContentError> {
        crate::validation::validate_repository(repository)?;
        self.backend
            .finish_upload(repository, session_id, expected_digest)
            .await
    }

    pub async fn upload_offset(&self, session_id: &str) -> Result<u64, ContentError> {
        self.backend.upload_offset(session_id).await
    }

    pub async fn abort_upload(&self, session_id: &str) -> Result<(), ContentError> {
        self.backend.abort_upload(session_id).await
    }
}
