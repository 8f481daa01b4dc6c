//! Manifest media-type inference and validation (spec.md §4.7).
//!
//! Grounded on `nora-registry/src/registry/docker.rs`'s
//! `detect_manifest_media_type`, generalized to also validate
//! `schemaVersion` on PUT per the spec's stricter contract.

use serde_json::Value;

pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const OCI_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("unsupported schemaVersion: {0}")]
    UnsupportedSchemaVersion(u64),
    #[error("manifest is missing schemaVersion")]
    MissingSchemaVersion,
}

/// Infer the media type of a stored manifest from its bytes, per
/// spec.md §4.7: prefer a declared `mediaType`; for manifest-list-shaped
/// bodies (non-empty `manifests[]`), default to the Docker list type if
/// no `mediaType` was declared; otherwise default to Docker manifest v2.
pub fn detect_media_type(data: &[u8]) -> String {
    let Ok(json) = serde_json::from_slice::<Value>(data) else {
        return DOCKER_MANIFEST_V2.to_string();
    };

    let is_list = json
        .get("manifests")
        .and_then(Value::as_array)
        .is_some_and(|arr| !arr.is_empty());

    if let Some(media_type) = json.get("mediaType").and_then(Value::as_str) {
        return media_type.to_string();
    }

    if is_list {
        return DOCKER_MANIFEST_LIST.to_string();
    }

    DOCKER_MANIFEST_V2.to_string()
}

/// Validate a manifest body for PUT: must parse as JSON with
/// `schemaVersion=2`. Returns the inferred media type on success.
pub fn validate_and_infer(data: &[u8]) -> Result<String, ManifestError> {
    let json: Value = serde_json::from_slice(data)?;
    let schema_version = json
        .get("schemaVersion")
        .and_then(Value::as_u64)
        .ok_or(ManifestError::MissingSchemaVersion)?;

    if schema_version != 2 {
        return Err(ManifestError::UnsupportedSchemaVersion(schema_version));
    }

    Ok(detect_media_type(data))
}
