//! Minimal certificate authority for the transfer channel.
//!
//! Issues and persists a trust chain (root anchor, server leaf, client
//! leaf) so the listener can run TLS without external PKI dependencies.
//! All material lives as PEM files under one directory; issuance is
//! idempotent so restarts never invalidate already-distributed trust.

use std::fs;
use std::path::{Path, PathBuf};

use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

use crate::constants::{CERT_BACKDATE_DAYS, CERT_VALIDITY_DAYS, SERVER_LEAF_DNS_NAME};
use crate::error::{Error, Result};

// =============================================================================
// Persisted File Names
// =============================================================================

const CA_KEY_FILE: &str = "ca.key.pem";
const CA_CERT_FILE: &str = "ca.crt.pem";
const SERVER_KEY_FILE: &str = "server.key.pem";
const SERVER_CERT_FILE: &str = "server.crt.pem";
const CLIENT_KEY_FILE: &str = "client.key.pem";
const CLIENT_CERT_FILE: &str = "client.crt.pem";
const CLIENT_KEY_DER_FILE: &str = "client.key.der";

/// Combined key + certificate stream expected by the listener's loader.
const SERVER_BUNDLE_FILE: &str = "server.pem";

const ORGANIZATION: &str = "hotpush";

// =============================================================================
// Leaf Usage
// =============================================================================

/// Extended key usage a leaf certificate is issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafUsage {
    /// TLS server authentication (the transfer listener).
    ServerAuth,
    /// TLS client authentication (the uploading operator).
    ClientAuth,
}

impl LeafUsage {
    fn file_stems(&self) -> (&'static str, &'static str) {
        match self {
            LeafUsage::ServerAuth => (SERVER_KEY_FILE, SERVER_CERT_FILE),
            LeafUsage::ClientAuth => (CLIENT_KEY_FILE, CLIENT_CERT_FILE),
        }
    }
}

// =============================================================================
// Certificate Authority
// =============================================================================

/// Self-signed trust anchor plus the directory its material persists in.
///
/// The anchor's private key never leaves this struct; leaves are signed
/// here and written straight to disk.
pub struct CertificateAuthority {
    certs_dir: PathBuf,
    ca_key_pem: String,
    ca_cert_pem: String,
}

impl CertificateAuthority {
    /// Load the persisted trust anchor, or generate and persist a new one.
    ///
    /// Generation self-signs with a CA basic constraint, valid from one
    /// day in the past through ten years forward. If both anchor files
    /// already exist they are loaded verbatim, keeping the serial and
    /// fingerprint stable across restarts.
    pub fn ensure_trust_anchor(certs_dir: &Path) -> Result<Self> {
        fs::create_dir_all(certs_dir).map_err(|e| Error::Certificate {
            message: format!("failed to create certs dir {}: {}", certs_dir.display(), e),
        })?;

        let key_path = certs_dir.join(CA_KEY_FILE);
        let cert_path = certs_dir.join(CA_CERT_FILE);

        if key_path.exists() && cert_path.exists() {
            let ca_key_pem = read_pem(&key_path)?;
            let ca_cert_pem = read_pem(&cert_path)?;

            // Reject unreadable key material now rather than at first use
            KeyPair::from_pem(&ca_key_pem).map_err(|e| Error::Certificate {
                message: format!("failed to parse persisted anchor key: {}", e),
            })?;

            debug!(dir = %certs_dir.display(), "Loaded persisted trust anchor");
            return Ok(Self {
                certs_dir: certs_dir.to_path_buf(),
                ca_key_pem,
                ca_cert_pem,
            });
        }

        let key_pair = KeyPair::generate().map_err(|e| Error::Certificate {
            message: format!("failed to generate anchor key: {}", e),
        })?;

        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name("hotpush root");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let (not_before, not_after) = validity_window();
        params.not_before = not_before;
        params.not_after = not_after;

        let cert = params.self_signed(&key_pair).map_err(|e| Error::Certificate {
            message: format!("failed to self-sign anchor: {}", e),
        })?;

        let ca_key_pem = key_pair.serialize_pem();
        let ca_cert_pem = cert.pem();

        write_pem(&key_path, ca_key_pem.as_bytes())?;
        write_pem(&cert_path, ca_cert_pem.as_bytes())?;
        info!(
            key = %key_path.display(),
            cert = %cert_path.display(),
            "Generated trust anchor"
        );

        Ok(Self {
            certs_dir: certs_dir.to_path_buf(),
            ca_key_pem,
            ca_cert_pem,
        })
    }

    /// PEM-encoded anchor certificate (for distribution to clients).
    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    /// SHA-256 fingerprint of the anchor certificate DER.
    pub fn fingerprint(&self) -> Result<Vec<u8>> {
        let der = cert_der_from_pem(self.ca_cert_pem.as_bytes())?;
        Ok(cert_hash(&der))
    }

    /// Issue a leaf certificate signed by the anchor and persist it.
    ///
    /// Skipped entirely when the leaf's key and certificate files already
    /// exist: re-issuing would break trust already distributed to peers.
    /// The client leaf additionally persists a DER-encoded private key
    /// for interoperability. Returns true when material was written.
    pub fn issue_leaf(&self, subject: &str, usage: LeafUsage, alt_names: &[&str]) -> Result<bool> {
        let (key_file, cert_file) = usage.file_stems();
        let key_path = self.certs_dir.join(key_file);
        let cert_path = self.certs_dir.join(cert_file);

        if key_path.exists() && cert_path.exists() {
            debug!(subject, ?usage, "Leaf already persisted, skipping issuance");
            return Ok(false);
        }

        let key_pair = KeyPair::generate().map_err(|e| Error::Certificate {
            message: format!("failed to generate leaf key for {}: {}", subject, e),
        })?;

        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(subject);
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![match usage {
            LeafUsage::ServerAuth => ExtendedKeyUsagePurpose::ServerAuth,
            LeafUsage::ClientAuth => ExtendedKeyUsagePurpose::ClientAuth,
        }];
        let (not_before, not_after) = validity_window();
        params.not_before = not_before;
        params.not_after = not_after;

        for name in alt_names {
            let ia5 = Ia5String::try_from(name.to_string()).map_err(|e| Error::Certificate {
                message: format!("invalid subject alternative name {}: {}", name, e),
            })?;
            params.subject_alt_names.push(SanType::DnsName(ia5));
        }

        let ca_key = KeyPair::from_pem(&self.ca_key_pem).map_err(|e| Error::Certificate {
            message: format!("failed to load anchor key: {}", e),
        })?;
        let issuer =
            Issuer::from_ca_cert_pem(&self.ca_cert_pem, &ca_key).map_err(|e| Error::Certificate {
                message: format!("failed to build issuer from anchor: {}", e),
            })?;

        let cert = params.signed_by(&key_pair, &issuer).map_err(|e| Error::Certificate {
            message: format!("failed to sign leaf for {}: {}", subject, e),
        })?;

        write_pem(&key_path, key_pair.serialize_pem().as_bytes())?;
        write_pem(&cert_path, cert.pem().as_bytes())?;

        if usage == LeafUsage::ClientAuth {
            let der_path = self.certs_dir.join(CLIENT_KEY_DER_FILE);
            write_pem(&der_path, &key_pair.serialize_der())?;
        }

        info!(
            subject,
            ?usage,
            cert = %cert_path.display(),
            "Issued leaf certificate"
        );
        Ok(true)
    }

    /// Write the combined server key + certificate bundle.
    fn write_bundle(&self) -> Result<PathBuf> {
        let bundle_path = self.certs_dir.join(SERVER_BUNDLE_FILE);
        let key = read_pem(&self.certs_dir.join(SERVER_KEY_FILE))?;
        let cert = read_pem(&self.certs_dir.join(SERVER_CERT_FILE))?;

        let mut bundle = String::with_capacity(key.len() + cert.len());
        bundle.push_str(&key);
        bundle.push_str(&cert);
        write_pem(&bundle_path, bundle.as_bytes())?;

        info!(bundle = %bundle_path.display(), "Wrote server bundle");
        Ok(bundle_path)
    }
}

// =============================================================================
// Trust Material
// =============================================================================

/// Paths to the persisted trust chain, as consumed by the listener and
/// handed to operators for the upload client.
#[derive(Debug, Clone)]
pub struct TrustMaterial {
    /// Anchor certificate (clients pin this).
    pub ca_cert: PathBuf,
    /// Combined server key + certificate for the listener.
    pub server_bundle: PathBuf,
    /// Client leaf certificate.
    pub client_cert: PathBuf,
    /// Client leaf private key (PEM).
    pub client_key: PathBuf,
    /// Client leaf private key (DER, for interoperability).
    pub client_key_der: PathBuf,
}

/// Ensure the full trust chain exists under `certs_dir`.
///
/// Runs once at startup, before the listener binds. Any failure here is
/// fatal: there is no degraded mode without TLS material.
pub fn ensure_material(certs_dir: &Path) -> Result<TrustMaterial> {
    let ca = CertificateAuthority::ensure_trust_anchor(certs_dir)?;

    let server_issued = ca.issue_leaf(SERVER_LEAF_DNS_NAME, LeafUsage::ServerAuth, &[SERVER_LEAF_DNS_NAME])?;
    ca.issue_leaf("hotpush client", LeafUsage::ClientAuth, &[])?;

    let bundle_path = certs_dir.join(SERVER_BUNDLE_FILE);
    let server_bundle = if server_issued || !bundle_path.exists() {
        ca.write_bundle()?
    } else {
        bundle_path
    };

    Ok(TrustMaterial {
        ca_cert: certs_dir.join(CA_CERT_FILE),
        server_bundle,
        client_cert: certs_dir.join(CLIENT_CERT_FILE),
        client_key: certs_dir.join(CLIENT_KEY_FILE),
        client_key_der: certs_dir.join(CLIENT_KEY_DER_FILE),
    })
}

// =============================================================================
// PEM / Hashing Helpers
// =============================================================================

/// Extract the first certificate DER from PEM data.
pub fn cert_der_from_pem(pem_data: &[u8]) -> Result<Vec<u8>> {
    let mut reader = std::io::BufReader::new(pem_data);
    let result = match rustls_pemfile::certs(&mut reader).next() {
        Some(Ok(der)) => Ok(der.to_vec()),
        Some(Err(e)) => Err(Error::Certificate {
            message: format!("failed to parse certificate: {}", e),
        }),
        None => Err(Error::Certificate {
            message: "no certificates found in PEM data".to_string(),
        }),
    };
    result
}

/// Compute SHA-256 hash of certificate DER bytes.
pub fn cert_hash(cert_der: &[u8]) -> Vec<u8> {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(cert_der);
    hasher.finalize().to_vec()
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
    dn.push(DnType::OrganizationName, DnValue::Utf8String(ORGANIZATION.to_string()));
    dn
}

fn validity_window() -> (OffsetDateTime, OffsetDateTime) {
    let now = OffsetDateTime::now_utc();
    (
        now - Duration::days(CERT_BACKDATE_DAYS),
        now + Duration::days(CERT_VALIDITY_DAYS),
    )
}

fn read_pem(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| Error::Certificate {
        message: format!("failed to read {}: {}", path.display(), e),
    })
}

fn write_pem(path: &Path, data: &[u8]) -> Result<()> {
    fs::write(path, data).map_err(|e| Error::Certificate {
        message: format!("failed to write {}: {}", path.display(), e),
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use x509_parser::prelude::*;

    fn parse_cert(pem_bytes: &[u8]) -> Vec<u8> {
        cert_der_from_pem(pem_bytes).unwrap()
    }

    #[test]
    fn anchor_is_generated_and_persisted() {
        let tmp = tempdir().unwrap();
        let ca = CertificateAuthority::ensure_trust_anchor(tmp.path()).unwrap();

        assert!(ca.ca_cert_pem().contains("BEGIN CERTIFICATE"));
        assert!(tmp.path().join(CA_KEY_FILE).exists());
        assert!(tmp.path().join(CA_CERT_FILE).exists());
    }

    #[test]
    fn anchor_is_stable_across_restarts() {
        let tmp = tempdir().unwrap();

        let first = CertificateAuthority::ensure_trust_anchor(tmp.path()).unwrap();
        let first_fp = first.fingerprint().unwrap();

        // Simulated restart: a second ensure must load, not regenerate
        let second = CertificateAuthority::ensure_trust_anchor(tmp.path()).unwrap();
        let second_fp = second.fingerprint().unwrap();

        assert_eq!(first_fp, second_fp);
        assert_eq!(first.ca_cert_pem(), second.ca_cert_pem());

        // Serial number is part of the DER, so identical DER implies an
        // unchanged serial as well
        let der_a = parse_cert(first.ca_cert_pem().as_bytes());
        let der_b = parse_cert(second.ca_cert_pem().as_bytes());
        assert_eq!(der_a, der_b);
    }

    #[test]
    fn leaf_validates_against_anchor() {
        let tmp = tempdir().unwrap();
        let ca = CertificateAuthority::ensure_trust_anchor(tmp.path()).unwrap();
        ca.issue_leaf("localhost", LeafUsage::ServerAuth, &["localhost"])
            .unwrap();

        let leaf_pem = fs::read(tmp.path().join(SERVER_CERT_FILE)).unwrap();
        let leaf_der = parse_cert(&leaf_pem);
        let ca_der = parse_cert(ca.ca_cert_pem().as_bytes());

        let (_, leaf) = X509Certificate::from_der(&leaf_der).unwrap();
        let (_, anchor) = X509Certificate::from_der(&ca_der).unwrap();

        assert!(leaf.verify_signature(Some(anchor.public_key())).is_ok());
        assert_eq!(leaf.issuer(), anchor.subject());
    }

    #[test]
    fn server_leaf_has_san_and_server_auth() {
        let tmp = tempdir().unwrap();
        let ca = CertificateAuthority::ensure_trust_anchor(tmp.path()).unwrap();
        ca.issue_leaf("localhost", LeafUsage::ServerAuth, &["localhost"])
            .unwrap();

        let leaf_pem = fs::read(tmp.path().join(SERVER_CERT_FILE)).unwrap();
        let leaf_der = parse_cert(&leaf_pem);
        let (_, leaf) = X509Certificate::from_der(&leaf_der).unwrap();

        let eku = leaf.extended_key_usage().unwrap().unwrap();
        assert!(eku.value.server_auth);
        assert!(!eku.value.client_auth);

        let san = leaf.subject_alternative_name().unwrap().unwrap();
        let has_localhost = san.value.general_names.iter().any(|n| {
            matches!(n, GeneralName::DNSName(d) if *d == "localhost")
        });
        assert!(has_localhost);
    }

    #[test]
    fn client_leaf_has_client_auth_and_no_san() {
        let tmp = tempdir().unwrap();
        let ca = CertificateAuthority::ensure_trust_anchor(tmp.path()).unwrap();
        ca.issue_leaf("hotpush client", LeafUsage::ClientAuth, &[])
            .unwrap();

        let leaf_pem = fs::read(tmp.path().join(CLIENT_CERT_FILE)).unwrap();
        let leaf_der = parse_cert(&leaf_pem);
        let (_, leaf) = X509Certificate::from_der(&leaf_der).unwrap();

        let eku = leaf.extended_key_usage().unwrap().unwrap();
        assert!(eku.value.client_auth);
        assert!(!eku.value.server_auth);
        assert!(leaf.subject_alternative_name().unwrap().is_none());

        // DER private key persisted alongside the PEM
        assert!(tmp.path().join(CLIENT_KEY_DER_FILE).exists());
    }

    #[test]
    fn issuance_is_skipped_when_persisted() {
        let tmp = tempdir().unwrap();
        let ca = CertificateAuthority::ensure_trust_anchor(tmp.path()).unwrap();

        let issued = ca
            .issue_leaf("localhost", LeafUsage::ServerAuth, &["localhost"])
            .unwrap();
        assert!(issued);
        let first = fs::read(tmp.path().join(SERVER_CERT_FILE)).unwrap();

        let issued_again = ca
            .issue_leaf("localhost", LeafUsage::ServerAuth, &["localhost"])
            .unwrap();
        assert!(!issued_again);
        let second = fs::read(tmp.path().join(SERVER_CERT_FILE)).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn validity_window_is_backdated_ten_years() {
        let tmp = tempdir().unwrap();
        let ca = CertificateAuthority::ensure_trust_anchor(tmp.path()).unwrap();

        let der = parse_cert(ca.ca_cert_pem().as_bytes());
        let (_, cert) = X509Certificate::from_der(&der).unwrap();

        let now = OffsetDateTime::now_utc().unix_timestamp();
        let not_before = cert.validity().not_before.timestamp();
        let not_after = cert.validity().not_after.timestamp();

        assert!(not_before < now);
        assert!(not_after > now);

        let span_days = (not_after - not_before) / 86400;
        assert_eq!(span_days, CERT_VALIDITY_DAYS + CERT_BACKDATE_DAYS);
    }

    #[test]
    fn ensure_material_produces_bundle() {
        let tmp = tempdir().unwrap();
        let material = ensure_material(tmp.path()).unwrap();

        let bundle = fs::read_to_string(&material.server_bundle).unwrap();
        let key_pos = bundle.find("PRIVATE KEY").unwrap();
        let cert_pos = bundle.find("BEGIN CERTIFICATE").unwrap();
        assert!(key_pos < cert_pos, "bundle must be key then certificate");

        assert!(material.ca_cert.exists());
        assert!(material.client_cert.exists());
        assert!(material.client_key.exists());
        assert!(material.client_key_der.exists());
    }

    #[test]
    fn ensure_material_is_idempotent() {
        let tmp = tempdir().unwrap();
        ensure_material(tmp.path()).unwrap();
        let bundle_before = fs::read(tmp.path().join(SERVER_BUNDLE_FILE)).unwrap();

        ensure_material(tmp.path()).unwrap();
        let bundle_after = fs::read(tmp.path().join(SERVER_BUNDLE_FILE)).unwrap();

        assert_eq!(bundle_before, bundle_after);
    }

    #[test]
    fn cert_hash_sha256() {
        let hash = cert_hash(b"test certificate data");
        assert_eq!(hash.len(), 32);
    }

    #[test]
    fn corrupted_anchor_key_is_rejected() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join(CA_KEY_FILE), "not a key").unwrap();
        fs::write(tmp.path().join(CA_CERT_FILE), "not a cert").unwrap();

        let result = CertificateAuthority::ensure_trust_anchor(tmp.path());
        assert!(matches!(result, Err(Error::Certificate { .. })));
    }
}
