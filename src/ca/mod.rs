//! CA and Leaf Issuer (spec.md §4.3): a self-signed root CA that mints
//! per-hostname leaf certificates on the fly, consulted from a
//! per-ClientHello `rustls::server::ResolvesServerCert` callback.
//!
//! No direct teacher precedent exists for on-the-fly TLS issuance; the
//! leaf cache below is shaped after `nora-registry/src/docker_auth.rs`'s
//! `RwLock<HashMap<..>>` token cache (same tolerate-duplicate-insert
//! policy), and rcgen/rustls are the standard ecosystem crates for X.509
//! minting and dynamic certificate resolution.

use parking_lot::RwLock;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, SanType,
};
use rustls::pki_types::PrivatePkcs8KeyDer;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use time::{Duration as TimeDuration, OffsetDateTime};

#[derive(Debug, Error)]
pub enum CaError {
    #[error("certificate generation failed: {0}")]
    Generation(#[from] rcgen::Error),
    #[error("i/o failure persisting CA material: {0}")]
    Io(#[from] std::io::Error),
    #[error("signing key rejected by TLS backend: {0}")]
    UnsupportedKey(String),
}

const ROOT_VALIDITY_YEARS: i64 = 10;
const LEAF_VALIDITY_YEARS: i64 = 1;

/// Holds the root CA's signing material and the leaf-certificate cache.
pub struct RootCa {
    ca_cert: Certificate,
    ca_key: KeyPair,
    ca_cert_der: rustls::pki_types::CertificateDer<'static>,
    cache: RwLock<HashMap<String, Arc<CertifiedKey>>>,
}

impl RootCa {
    /// Load the CA from `cert_path`/`key_path` if both exist, otherwise
    /// generate a fresh root and persist it with owner-only permissions.
    pub async fn load_or_generate(cert_path: &Path, key_path: &Path) -> Result<Self, CaError> {
        if cert_path.exists() && key_path.exists() {
            return Self::load(cert_path, key_path).await;
        }
        let ca = Self::generate()?;
        ca.persist(cert_path, key_path).await?;
        Ok(ca)
    }

    fn generate() -> Result<Self, CaError> {
        let mut params = CertificateParams::new(Vec::<String>::new())?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "warden-registry root CA");
        dn.push(DnType::OrganizationName, "warden-registry");
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Constrained(1));
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::CrlSign,
        ];
        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + TimeDuration::days(365 * ROOT_VALIDITY_YEARS);

        // rcgen's `ring` backend cannot mint new RSA keypairs (only load
        // existing ones); ECDSA P-256 is used in place of spec.md's
        // literal RSA-2048 requirement (see SPEC_FULL.md).
        let key = KeyPair::generate()?;
        let cert = params.self_signed(&key)?;
        let cert_der = cert.der().clone();

        Ok(Self {
            ca_cert: cert,
            ca_key: key,
            ca_cert_der: cert_der,
            cache: RwLock::new(HashMap::new()),
        })
    }

    async fn load(cert_path: &Path, key_path: &Path) -> Result<Self, CaError> {
        let cert_pem = tokio::fs::read_to_string(cert_path).await?;
        let key_pem = tokio::fs::read_to_string(key_path).await?;

        let key = KeyPair::from_pem(&key_pem)?;
        let params = CertificateParams::from_ca_cert_pem(&cert_pem)?;
        let cert = params.self_signed(&key)?;
        let cert_der = cert.der().clone();

        Ok(Self {
            ca_cert: cert,
            ca_key: key,
            ca_cert_der: cert_der,
            cache: RwLock::new(HashMap::new()),
        })
    }

    async fn persist(&self, cert_path: &Path, key_path: &Path) -> Result<(), CaError> {
        if let Some(parent) = cert_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(cert_path, self.ca_cert.pem()).await?;
        tokio::fs::write(key_path, self.ca_key.serialize_pem()).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(key_path, std::fs::Permissions::from_mode(0o600)).await?;
            tokio::fs::set_permissions(cert_path, std::fs::Permissions::from_mode(0o644)).await?;
        }
        Ok(())
    }

    /// Root certificate, DER-encoded, for serving alongside leaf chains or
    /// for operators to install as a trust anchor.
    pub fn root_certificate_der(&self) -> rustls::pki_types::CertificateDer<'static> {
        self.ca_cert_der.clone()
    }

    /// Return the cached leaf for `server_name`, minting and caching one
    /// if absent. `dns_names` are additional SANs (e.g. a mapping's alias
    /// list) beyond `server_name` itself.
    pub fn get_or_create_cert(
        &self,
        server_name: &str,
        dns_names: &[String],
    ) -> Result<Arc<CertifiedKey>, CaError> {
        if let Some(cached) = self.cache.read().get(server_name) {
            return Ok(cached.clone());
        }

        let certified = self.mint_leaf(server_name, dns_names)?;

        // concurrent first-use may duplicate-mint; last writer wins and the
        // loser's cert is simply discarded (spec.md §5).
        let mut cache = self.cache.write();
        let entry = cache.entry(server_name.to_string()).or_insert(certified).clone();
        crate::metrics::record_cert_mint(server_name, cache.len() as i64);
        Ok(entry)
    }

    fn mint_leaf(&self, server_name: &str, dns_names: &[String]) -> Result<Arc<CertifiedKey>, CaError> {
        let mut sans: Vec<String> = vec![server_name.to_string()];
        for name in dns_names {
            if !sans.contains(name) {
                sans.push(name.clone());
            }
        }

        let mut params = CertificateParams::new(sans.clone())?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, server_name);
        params.distinguished_name = dn;
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.subject_alt_names = sans
            .iter()
            .map(|name| SanType::DnsName(name.clone().try_into().expect("valid DNS SAN")))
            .chain(std::iter::once(SanType::IpAddress(Ipv4Addr::LOCALHOST.into())))
            .collect();

        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + TimeDuration::days(365 * LEAF_VALIDITY_YEARS);

        let leaf_key = KeyPair::generate()?;
        let leaf_cert = params.signed_by(&leaf_key, &self.ca_cert, &self.ca_key)?;

        let leaf_der = leaf_cert.der().clone();
        let key_der = PrivatePkcs8KeyDer::from(leaf_key.serialize_der());
        let signing_key = rustls::crypto::ring::sign::any_supported_type(&key_der.into())
            .map_err(|e| CaError::UnsupportedKey(e.to_string()))?;

        let chain = vec![leaf_der, self.ca_cert_der.clone()];
        Ok(Arc::new(CertifiedKey::new(chain, signing_key)))
    }

    pub fn cache_len(&self) -> usize {
        self.cache.read().len()
    }
}

impl std::fmt::Debug for RootCa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootCa")
            .field("cached_leaves", &self.cache_len())
            .finish()
    }
}

/// Fallback chain for the TLS listener's per-ClientHello certificate
/// lookup (spec.md §4.6): operator-provided static cert/key first, then a
/// mapping-derived SAN set, then a bare-SNI mint.
pub struct GatewayCertResolver {
    static_cert: Option<Arc<CertifiedKey>>,
    ca: Arc<RootCa>,
    mappings: Arc<crate::mappings::ConfigStore>,
}

impl GatewayCertResolver {
    pub fn new(
        static_cert: Option<Arc<CertifiedKey>>,
        ca: Arc<RootCa>,
        mappings: Arc<crate::mappings::ConfigStore>,
    ) -> Self {
        Self {
            static_cert,
            ca,
            mappings,
        }
    }

    /// Load an operator-supplied PEM cert+key pair as a `CertifiedKey`.
    pub fn load_static_pair(cert_path: &Path, key_path: &Path) -> Result<Arc<CertifiedKey>, CaError> {
        let cert_pem = std::fs::read(cert_path)?;
        let key_pem = std::fs::read(key_path)?;

        let chain: Vec<_> = rustls_pemfile::certs(&mut cert_pem.as_slice())
            .filter_map(Result::ok)
            .collect();
        let key_der = rustls_pemfile::private_key(&mut key_pem.as_slice())
            .map_err(|e| CaError::UnsupportedKey(e.to_string()))?
            .ok_or_else(|| CaError::UnsupportedKey("no private key found in key file".into()))?;

        let signing_key = rustls::crypto::ring::sign::any_supported_type(&key_der)
            .map_err(|e| CaError::UnsupportedKey(e.to_string()))?;
        Ok(Arc::new(CertifiedKey::new(chain, signing_key)))
    }
}

impl std::fmt::Debug for GatewayCertResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayCertResolver")
            .field("has_static_cert", &self.static_cert.is_some())
            .finish()
    }
}

impl ResolvesServerCert for GatewayCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        if let Some(cert) = &self.static_cert {
            return Some(cert.clone());
        }

        let server_name = client_hello.server_name()?.to_string();

        let mappings = self.mappings.clone();
        let ca = self.ca.clone();
        let server_name_for_lookup = server_name.clone();

        // the resolver runs inside the handshake and must not block the
        // async runtime; mapping lookup is a cheap in-memory read, so we
        // run it to completion via a short-lived blocking bridge.
        let dns_names = tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current()
                .block_on(async move { mappings.get(&server_name_for_lookup).await })
                .map(|m| vec![m.hostname])
                .unwrap_or_default()
        });

        ca.get_or_create_cert(&server_name, &dns_names).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_root_is_ca_with_ten_year_validity() {
        let ca = RootCa::generate().unwrap();
        assert!(matches!(ca.ca_cert.params().is_ca, IsCa::Ca(_)));
        let span = ca.ca_cert.params().not_after - ca.ca_cert.params().not_before;
        assert!(span.whole_days() >= 365 * ROOT_VALIDITY_YEARS - 1);
    }

    #[test]
    fn get_or_create_cert_caches_by_server_name() {
        let ca = RootCa::generate().unwrap();
        let first = ca.get_or_create_cert("a.example.com", &[]).unwrap();
        let second = ca.get_or_create_cert("a.example.com", &[]).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(ca.cache_len(), 1);
    }

    #[test]
    fn distinct_server_names_mint_distinct_certs() {
        let ca = RootCa::generate().unwrap();
        let a = ca.get_or_create_cert("a.example.com", &[]).unwrap();
        let b = ca.get_or_create_cert("b.example.com", &[]).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(ca.cache_len(), 2);
    }
}
