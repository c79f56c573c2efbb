//! TLS acceptor construction for the transfer listener.
//!
//! Both the control channel (after `AUTH TLS`) and every passive data
//! connection are wrapped by the same acceptor, built from the combined
//! key + certificate bundle the certificate authority persists.

use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;
use tracing::debug;

use hotpush_core::{Error, Result};

/// Build a [`TlsAcceptor`] from a combined PEM bundle (private key and
/// certificate chain in one file, in either order).
pub fn acceptor_from_bundle(bundle: &Path) -> Result<TlsAcceptor> {
    let pem = std::fs::read(bundle).map_err(|e| Error::Certificate {
        message: format!("failed to read {}: {}", bundle.display(), e),
    })?;

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::Certificate {
            message: format!("failed to parse certificates in {}: {}", bundle.display(), e),
        })?;
    if certs.is_empty() {
        return Err(Error::Certificate {
            message: format!("no certificates in {}", bundle.display()),
        });
    }

    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|e| Error::Certificate {
            message: format!("failed to parse private key in {}: {}", bundle.display(), e),
        })?
        .ok_or_else(|| Error::Certificate {
            message: format!("no private key in {}", bundle.display()),
        })?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Certificate {
            message: format!("invalid TLS material in {}: {}", bundle.display(), e),
        })?;

    debug!(bundle = %bundle.display(), "TLS acceptor ready");
    Ok(TlsAcceptor::from(Arc::new(config)))
}
