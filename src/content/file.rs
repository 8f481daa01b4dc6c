//! File-backed `ContentStoreBackend`, content-addressed on disk
//! (spec.md §4.2, §6): blobs and digest-addressed manifests are written
//! once under a `sha256/<hex>` path, tags are pointer files holding the
//! digest they resolve to, and upload sessions persist as plain files so
//! a restart never loses partial progress.
//!
//! Grounded on `nora-registry/src/storage/local.rs`'s key-to-path mapping
//! and `fs::write`/`spawn_blocking` directory-walk idiom.

use async_trait::async_trait;
use axum::body::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{ContentError, ContentStoreBackend, Digest, StoredBlob, StoredManifest};

pub struct FileContentStore {
    base_path: PathBuf,
}

fn io_err(e: std::io::Error) -> ContentError {
    ContentError::Storage(e.to_string())
}

impl FileContentStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn repo_dir(&self, repository: &str) -> PathBuf {
        self.base_path.join(repository)
    }

    fn blob_path(&self, repository: &str, digest: &Digest) -> PathBuf {
        let hex = digest.as_str().trim_start_matches("sha256:");
        self.repo_dir(repository).join("blobs/sha256").join(hex)
    }

    fn manifest_path(&self, repository: &str, digest: &Digest) -> PathBuf {
        let hex = digest.as_str().trim_start_matches("sha256:");
        self.repo_dir(repository)
            .join("manifests/sha256")
            .join(format!("{hex}.json"))
    }

    fn manifest_media_type_path(&self, repository: &str, digest: &Digest) -> PathBuf {
        let hex = digest.as_str().trim_start_matches("sha256:");
        self.repo_dir(repository)
            .join("manifests/sha256")
            .join(format!("{hex}.mediatype"))
    }

    fn tag_path(&self, repository: &str, tag: &str) -> PathBuf {
        self.repo_dir(repository).join("tags").join(tag)
    }

    fn tags_dir(&self, repository: &str) -> PathBuf {
        self.repo_dir(repository).join("tags")
    }

    fn upload_path(&self, session_id: &str) -> PathBuf {
        self.base_path.join("_uploads").join(session_id)
    }

    fn upload_repo_marker_path(&self, session_id: &str) -> PathBuf {
        self.base_path.join("_uploads").join(format!("{session_id}.repo"))
    }

    async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), ContentError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, data).await.map_err(io_err)?;
        fs::rename(&tmp_path, path).await.map_err(io_err)?;
        Ok(())
    }

    async fn list_tag_digests(&self, repository: &str) -> Result<Vec<(String, Digest)>, ContentError> {
        let dir = self.tags_dir(repository);
        let mut out = Vec::new();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(io_err(e)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let tag = entry.file_name().to_string_lossy().to_string();
            let raw = fs::read_to_string(entry.path()).await.map_err(io_err)?;
            if let Ok(digest) = Digest::parse(raw.trim()) {
                out.push((tag, digest));
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl ContentStoreBackend for FileContentStore {
    async fn list_repositories(&self) -> Result<Vec<String>, ContentError> {
        let base = self.base_path.clone();
        let names = tokio::task::spawn_blocking(move || {
            let mut names = Vec::new();
            if let Ok(entries) = std::fs::read_dir(&base) {
                for entry in entries.flatten() {
                    if entry.path().is_dir() {
                        let name = entry.file_name().to_string_lossy().to_string();
                        if name != "_uploads" {
                            names.push(name);
                        }
                    }
                }
            }
            names.sort();
            names
        })
        .await
        .map_err(|e| ContentError::Storage(e.to_string()))?;
        Ok(names)
    }

    async fn list_tags(&self, repository: &str) -> Result<Vec<String>, ContentError> {
        let mut tags: Vec<String> = self
            .list_tag_digests(repository)
            .await?
            .into_iter()
            .map(|(tag, _)| tag)
            .collect();
        tags.sort();
        Ok(tags)
    }

    async fn put_manifest(
        &self,
        repository: &str,
        reference: &str,
        manifest: StoredManifest,
    ) -> Result<(), ContentError> {
        let path = self.manifest_path(repository, &manifest.digest);
        Self::write_atomic(&path, &manifest.bytes).await?;

        let media_path = self.manifest_media_type_path(repository, &manifest.digest);
        Self::write_atomic(&media_path, manifest.media_type.as_bytes()).await?;

        if !crate::validation::is_digest_form(reference) {
            let tag_path = self.tag_path(repository, reference);
            Self::write_atomic(&tag_path, manifest.digest.as_str().as_bytes()).await?;
        }
        Ok(())
    }

    async fn get_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<StoredManifest, ContentError> {
        let digest = if crate::validation::is_digest_form(reference) {
            Digest::parse(reference).map_err(ContentError::Invalid)?
        } else {
            let tag_path = self.tag_path(repository, reference);
            let raw = fs::read_to_string(&tag_path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ContentError::ManifestNotFound {
                        repository: repository.to_string(),
                        reference: reference.to_string(),
                    }
                } else {
                    io_err(e)
                }
            })?;
            Digest::parse(raw.trim()).map_err(ContentError::Invalid)?
        };

        let path = self.manifest_path(repository, &digest);
        let bytes = fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ContentError::ManifestNotFound {
                    repository: repository.to_string(),
                    reference: reference.to_string(),
                }
            } else {
                io_err(e)
            }
        })?;

        let media_path = self.manifest_media_type_path(repository, &digest);
        let media_type = fs::read_to_string(&media_path)
            .await
            .unwrap_or_else(|_| "application/vnd.docker.distribution.manifest.v2+json".to_string());

        Ok(StoredManifest {
            digest,
            media_type,
            bytes: Bytes::from(bytes),
        })
    }

    async fn delete_tag(&self, repository: &str, reference: &str) -> Result<bool, ContentError> {
        let digest = if crate::validation::is_digest_form(reference) {
            Digest::parse(reference).map_err(ContentError::Invalid)?
        } else {
            let tag_path = self.tag_path(repository, reference);
            let raw = fs::read_to_string(&tag_path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ContentError::ManifestNotFound {
                        repository: repository.to_string(),
                        reference: reference.to_string(),
                    }
                } else {
                    io_err(e)
                }
            })?;
            fs::remove_file(&tag_path).await.map_err(io_err)?;
            Digest::parse(raw.trim()).map_err(ContentError::Invalid)?
        };

        let remaining = self.list_tag_digests(repository).await?;
        let still_referenced = remaining.iter().any(|(_, d)| *d == digest);
        if still_referenced {
            return Ok(false);
        }

        let manifest_path = self.manifest_path(repository, &digest);
        let media_path = self.manifest_media_type_path(repository, &digest);
        let _ = fs::remove_file(&manifest_path).await;
        let _ = fs::remove_file(&media_path).await;
        Ok(true)
    }

    async fn put_blob(&self, repository: &str, blob: StoredBlob) -> Result<(), ContentError> {
        let path = self.blob_path(repository, &blob.digest);
        Self::write_atomic(&path, &blob.bytes).await
    }

    async fn get_blob(&self, repository: &str, digest: &Digest) -> Result<Bytes, ContentError> {
        let path = self.blob_path(repository, digest);
        let bytes = fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ContentError::BlobNotFound(digest.to_string())
            } else {
                io_err(e)
            }
        })?;
        Ok(Bytes::from(bytes))
    }

    async fn has_blob(&self, repository: &str, digest: &Digest) -> bool {
        fs::metadata(self.blob_path(repository, digest)).await.is_ok()
    }

    async fn delete_blob(&self, repository: &str, digest: &Digest) -> Result<(), ContentError> {
        let path = self.blob_path(repository, digest);
        fs::remove_file(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ContentError::BlobNotFound(digest.to_string())
            } else {
                io_err(e)
            }
        })
    }

    async fn start_upload(&self, repository: &str) -> Result<String, ContentError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let path = self.upload_path(&session_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        fs::write(&path, []).await.map_err(io_err)?;
        fs::write(self.upload_repo_marker_path(&session_id), repository.as_bytes())
            .await
            .map_err(io_err)?;
        Ok(session_id)
    }

    async fn append_upload(&self, session_id: &str, chunk: &[u8]) -> Result<u64, ContentError> {
        let path = self.upload_path(session_id);
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ContentError::UploadNotFound(session_id.to_string())
                } else {
                    io_err(e)
                }
            })?;
        file.write_all(chunk).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;
        let meta = fs::metadata(&path).await.map_err(io_err)?;
        Ok(meta.len())
    }

    async fn finish_upload(
        &self,
        repository: &str,
        session_id: &str,
        expected_digest: &Digest,
    ) -> Result<(), ContentError> {
        let marker_path = self.upload_repo_marker_path(session_id);
        let recorded_repo = fs::read_to_string(&marker_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ContentError::UploadNotFound(session_id.to_string())
            } else {
                io_err(e)
            }
        })?;
        if recorded_repo != repository {
            return Err(ContentError::UploadNotFound(session_id.to_string()));
        }

        let upload_path = self.upload_path(session_id);
        let data = fs::read(&upload_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ContentError::UploadNotFound(session_id.to_string())
            } else {
                io_err(e)
            }
        })?;

        let computed = Digest::of(&data);
        if &computed != expected_digest {
            return Err(ContentError::DigestMismatch {
                expected: expected_digest.to_string(),
                computed: computed.to_string(),
            });
        }

        let blob_path = self.blob_path(repository, &computed);
        if let Some(parent) = blob_path.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        // promote via rename when possible; fall back to copy+delete across
        // filesystems (spec.md §4.2's atomicity contract).
        if fs::rename(&upload_path, &blob_path).await.is_err() {
            fs::copy(&upload_path, &blob_path).await.map_err(io_err)?;
            let _ = fs::remove_file(&upload_path).await;
        }
        let _ = fs::remove_file(&marker_path).await;
        Ok(())
    }

    async fn upload_offset(&self, session_id: &str) -> Result<u64, ContentError> {
        let path = self.upload_path(session_id);
        let meta = fs::metadata(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ContentError::UploadNotFound(session_id.to_string())
            } else {
                io_err(e)
            }
        })?;
        Ok(meta.len())
    }

    async fn abort_upload(&self, session_id: &str) -> Result<(), ContentError> {
        let path = self.upload_path(session_id);
        fs::remove_file(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ContentError::UploadNotFound(session_id.to_string())
            } else {
                io_err(e)
            }
        })?;
        let _ = fs::remove_file(self.upload_repo_marker_path(session_id)).await;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manifest(bytes: &[u8]) -> StoredManifest {
        StoredManifest {
            digest: Digest::of(bytes),
            media_type: "application/vnd.oci.image.manifest.v1+json".to_string(),
            bytes: Bytes::copy_from_slice(bytes),
        }
    }

    #[tokio::test]
    async fn manifest_roundtrip_by_tag_and_digest() {
        let dir = tempdir().unwrap();
        let store = FileContentStore::new(dir.path());
        let m = manifest(b"{}");
        let digest = m.digest.clone();
        store.put_manifest("library/nginx", "latest", m).await.unwrap();

        let by_tag = store.get_manifest("library/nginx", "latest").await.unwrap();
        assert_eq!(by_tag.digest, digest);

        let by_digest = store
            .get_manifest("library/nginx", digest.as_str())
            .await
            .unwrap();
        assert_eq!(by_digest.bytes, by_tag.bytes);
    }

    #[tokio::test]
    async fn delete_tag_keeps_digest_while_other_tag_refers_to_it() {
        let dir = tempdir().unwrap();
        let store = FileContentStore::new(dir.path());
        let m = manifest(b"{}");
        let digest = m.digest.clone();
        store.put_manifest("r", "v1", m.clone()).await.unwrap();
        store.put_manifest("r", "v2", m).await.unwrap();

        assert!(!store.delete_tag("r", "v1").await.unwrap());
        assert!(store.get_manifest("r", digest.as_str()).await.is_ok());

        assert!(store.delete_tag("r", "v2").await.unwrap());
        assert!(store.get_manifest("r", digest.as_str()).await.is_err());
    }

    #[tokio::test]
    async fn blob_put_get_delete_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FileContentStore::new(dir.path());
        let digest = Digest::of(b"layer-bytes");
        store
            .put_blob("r", StoredBlob { digest: digest.clone(), bytes: Bytes::from_static(b"layer-bytes") })
            .await
            .unwrap();

        assert!(store.has_blob("r", &digest).await);
        let bytes = store.get_blob("r", &digest).await.unwrap();
        assert_eq!(&bytes[..], b"layer-bytes");

        store.delete_blob("r", &digest).await.unwrap();
        assert!(!store.has_blob("r", &digest).await);
    }

    #[tokio::test]
    async fn upload_lifecycle_persists_across_offset_calls() {
        let dir = tempdir().unwrap();
        let store = FileContentStore::new(dir.path());
        let session_id = store.start_upload("r").await.unwrap();
        store.append_upload(&session_id, b"ab").await.unwrap();
        let offset = store.append_upload(&session_id, b"cd").await.unwrap();
        assert_eq!(offset, 4);
        assert_eq!(store.upload_offset(&session_id).await.unwrap(), 4);

        let digest = Digest::of(b"abcd");
        store.finish_upload("r", &session_id, &digest).await.unwrap();
        assert!(store.has_blob("r", &digest).await);
    }

    #[tokio::test]
    async fn finish_upload_rejects_mismatched_digest() {
        let dir = tempdir().unwrap();
        let store = FileContentStore::new(dir.path());
        let session_id = store.start_upload("r").await.unwrap();
        store.append_upload(&session_id, b"abcd").await.unwrap();

        let wrong = Digest::of(b"zzzz");
        let err = store.finish_upload("r", &session_id, &wrong).await.unwrap_err();
        assert!(matches!(err, ContentError::DigestMismatch { .. }));
    }
}
