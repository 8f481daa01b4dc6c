//! Input validation for registry identifiers and gateway mappings.
//!
//! Provides security validation to prevent path traversal attacks and
//! ensure inputs conform to the OCI distribution spec and to the
//! `RegistryMapping` invariants in spec.md §3.

use std::fmt;
use url::Url;

/// Validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Path contains traversal sequences (../, etc.)
    PathTraversal,
    /// Repository name is invalid
    InvalidRepository(String),
    /// Content digest is invalid
    InvalidDigest(String),
    /// Tag/reference is invalid
    InvalidReference(String),
    /// Hostname is empty or otherwise malformed
    InvalidHostname(String),
    /// Upstream URL does not parse to an absolute URL
    InvalidUpstreamUrl(String),
    /// Input is empty
    EmptyInput,
    /// Input exceeds maximum length
    TooLong { max: usize, actual: usize },
    /// Contains forbidden characters
    ForbiddenCharacter(char),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PathTraversal => write!(f, "path traversal detected"),
            Self::InvalidRepository(reason) => write!(f, "invalid repository name: {}", reason),
            Self::InvalidDigest(reason) => write!(f, "invalid digest: {}", reason),
            Self::InvalidReference(reason) => write!(f, "invalid reference: {}", reason),
            Self::InvalidHostname(reason) => write!(f, "invalid hostname: {}", reason),
            Self::InvalidUpstreamUrl(reason) => write!(f, "invalid upstream url: {}", reason),
            Self::EmptyInput => write!(f, "input cannot be empty"),
            Self::TooLong { max, actual } => {
                write!(f, "input exceeds maximum length ({} > {})", actual, max)
            }
            Self::ForbiddenCharacter(c) => write!(f, "forbidden character: {:?}", c),
        }
    }
}

impl std::error::Error for ValidationError {}

const MAX_REPOSITORY_LENGTH: usize = 256;
const MAX_REFERENCE_LENGTH: usize = 128;

/// Validate a repository name: slash-delimited, lowercase, each segment
/// starting with an alphanumeric, per the OCI distribution name grammar.
pub fn validate_repository(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyInput);
    }
    if name.len() > MAX_REPOSITORY_LENGTH {
        return Err(ValidationError::TooLong {
            max: MAX_REPOSITORY_LENGTH,
            actual: name.len(),
        });
    }
    if name.contains("..") {
        return Err(ValidationError::PathTraversal);
    }

    for c in name.chars() {
        if !matches!(c, 'a'..='z' | '0'..='9' | '_' | '.' | '-' | '/') {
            if c.is_ascii_uppercase() {
                return Err(ValidationError::InvalidRepository("must be lowercase".into()));
            }
            return Err(ValidationError::ForbiddenCharacter(c));
        }
    }

    if name.starts_with('/') || name.ends_with('/') {
        return Err(ValidationError::InvalidRepository(
            "cannot start or end with /".into(),
        ));
    }

    for segment in name.split('/') {
        if segment.is_empty() {
            return Err(ValidationError::InvalidRepository("empty path segment".into()));
        }
        let first = segment.chars().next().expect("segment checked non-empty");
        if !first.is_ascii_alphanumeric() {
            return Err(ValidationError::InvalidRepository(
                "segment must start with alphanumeric".into(),
            ));
        }
    }

    Ok(())
}

/// Validate a content digest of the form `sha256:<64 lowercase hex>`.
pub fn validate_digest(digest: &str) -> Result<(), ValidationError> {
    if digest.is_empty() {
        return Err(ValidationError::EmptyInput);
    }
    if digest.contains("..") || digest.contains('/') {
        return Err(ValidationError::PathTraversal);
    }

    let (algo, hash) = digest
        .split_once(':')
        .ok_or_else(|| ValidationError::InvalidDigest("missing algorithm prefix".into()))?;

    if algo != "sha256" {
        return Err(ValidationError::InvalidDigest(format!(
            "unsupported algorithm: {} (only sha256 is supported)",
            algo
        )));
    }
    if hash.len() != 64 {
        return Err(ValidationError::InvalidDigest(format!(
            "sha256 hash must be 64 characters, got {}",
            hash.len()
        )));
    }
    for c in hash.chars() {
        if !matches!(c, '0'..='9' | 'a'..='f') {
            return Err(ValidationError::InvalidDigest(
                "hash must be lowercase hex".into(),
            ));
        }
    }

    Ok(())
}

/// True if `reference` is syntactically a digest (`sha256:...`) rather
/// than a tag.
pub fn is_digest_form(reference: &str) -> bool {
    reference.starts_with("sha256:")
}

/// Validate a manifest reference: either a digest (validated as a digest)
/// or a tag (alphanumeric/./_/- , must start with alphanumeric).
pub fn validate_reference(reference: &str) -> Result<(), ValidationError> {
    if reference.is_empty() {
        return Err(ValidationError::EmptyInput);
    }
    if reference.len() > MAX_REFERENCE_LENGTH {
        return Err(ValidationError::TooLong {
            max: MAX_REFERENCE_LENGTH,
            actual: reference.len(),
        });
    }
    if reference.contains("..") || reference.contains('/') {
        return Err(ValidationError::PathTraversal);
    }

    if is_digest_form(reference) {
        return validate_digest(reference);
    }

    let first = reference.chars().next().expect("checked non-empty");
    if !first.is_ascii_alphanumeric() {
        return Err(ValidationError::InvalidReference(
            "tag must start with alphanumeric".into(),
        ));
    }
    for c in reference.chars() {
        if !matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-') {
            return Err(ValidationError::ForbiddenCharacter(c));
        }
    }

    Ok(())
}

/// Validate a `RegistryMapping` hostname: non-empty, no scheme/path.
pub fn validate_hostname(host: &str) -> Result<(), ValidationError> {
    if host.is_empty() {
        return Err(ValidationError::EmptyInput);
    }
    if host.contains('/') || host.contains(' ') {
        return Err(ValidationError::InvalidHostname(
            "must not contain '/' or spaces".into(),
        ));
    }
    Ok(())
}

/// Validate that `remote_url` parses to an absolute URL with a scheme and
/// host, per spec.md §3's `RegistryMapping` invariant.
pub fn validate_upstream_url(remote_url: &str) -> Result<Url, ValidationError> {
    let parsed =
        Url::parse(remote_url).map_err(|e| ValidationError::InvalidUpstreamUrl(e.to_string()))?;
    if parsed.host_str().is_none() {
        return Err(ValidationError::InvalidUpstreamUrl(
            "url has no host".into(),
        ));
    }
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ValidationError::InvalidUpstreamUrl(
            "scheme must be http or https".into(),
        ));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_valid() {
        assert!(validate_repository("library/nginx").is_ok());
        assert!(validate_repository("user/project/tool").is_ok());
        assert!(validate_repository("nginx").is_ok());
    }

    #[test]
    fn repository_rejects_uppercase_and_traversal() {
        assert!(validate_repository("NGINX").is_err());
        assert!(validate_repository("../escape").is_err());
        assert!(validate_repository("foo/../bar").is_err());
    }

    #[test]
    fn digest_valid_and_invalid() {
        let valid = format!("sha256:{}", "a".repeat(64));
        assert!(validate_digest(&valid).is_ok());
        assert!(validate_digest("sha256:abc").is_err());
        assert!(validate_digest("md5:abc").is_err());
        assert!(validate_digest(&format!("sha256:{}", "A".repeat(64))).is_err());
    }

    #[test]
    fn reference_digest_vs_tag() {
        let digest = format!("sha256:{}", "a".repeat(64));
        assert!(is_digest_form(&digest));
        assert!(!is_digest_form("latest"));
        assert!(validate_reference("latest").is_ok());
        assert!(validate_reference(&digest).is_ok());
        assert!(validate_reference(".hidden").is_err());
    }

    #[test]
    fn upstream_url_requires_scheme_and_host() {
        assert!(validate_upstream_url("https://registry-1.docker.io").is_ok());
        assert!(validate_upstream_url("not a url").is_err());
        assert!(validate_upstream_url("ftp://host").is_err());
    }

    #[test]
    fn hostname_rejects_path_like_values() {
        assert!(validate_hostname("docker.io").is_ok());
        assert!(validate_hostname("").is_err());
        assert!(validate_hostname("docker.io/foo").is_err());
    }
}
